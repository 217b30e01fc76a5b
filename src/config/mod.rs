use crate::error::SenderError;
use serde::Deserialize;
use std::path::PathBuf;

pub use crate::delivery::{DeliveryConfig, PartitionKey};
pub use crate::nats::NatsConfig;

/// Complete sender configuration.
///
/// Built once at startup (defaults, then optional TOML file, then
/// environment overrides) and passed by reference to everything that needs it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub fixtures: FixtureConfig,
}

/// Topic (JetStream subject) per channel
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_mail_topic")]
    pub mail: String,
    #[serde(default = "default_whatsapp_topic")]
    pub whatsapp: String,
}

fn default_mail_topic() -> String {
    "support.mail.raw".to_string()
}

fn default_whatsapp_topic() -> String {
    "support.whatsapp.raw".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            mail: default_mail_topic(),
            whatsapp: default_whatsapp_topic(),
        }
    }
}

impl TopicConfig {
    pub fn all(&self) -> Vec<String> {
        vec![self.mail.clone(), self.whatsapp.clone()]
    }
}

/// Fixture file locations. File names are resolved against `directory`.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureConfig {
    #[serde(default = "default_fixture_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_mail_file")]
    pub mail: String,
    #[serde(default = "default_whatsapp_file")]
    pub whatsapp: String,
    #[serde(default = "default_malformed_mail_file")]
    pub malformed_mail: String,
    #[serde(default = "default_malformed_whatsapp_file")]
    pub malformed_whatsapp: String,
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_mail_file() -> String {
    "mail.json".to_string()
}

fn default_whatsapp_file() -> String {
    "whatsapp.json".to_string()
}

fn default_malformed_mail_file() -> String {
    "mail_malformed.json".to_string()
}

fn default_malformed_whatsapp_file() -> String {
    "whatsapp_malformed.json".to_string()
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            directory: default_fixture_dir(),
            mail: default_mail_file(),
            whatsapp: default_whatsapp_file(),
            malformed_mail: default_malformed_mail_file(),
            malformed_whatsapp: default_malformed_whatsapp_file(),
        }
    }
}

impl FixtureConfig {
    pub fn path(&self, file: &str) -> PathBuf {
        self.directory.join(file)
    }
}

impl SenderConfig {
    /// Build from `SENDER_CONFIG` (if set) plus environment overrides.
    pub fn from_env() -> Result<Self, SenderError> {
        let mut config = match std::env::var("SENDER_CONFIG") {
            Ok(path) if !path.is_empty() => load_config(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NATS_URL") {
            self.nats.url = v;
        }
        if let Some(v) = get("SENDER_MAIL_TOPIC") {
            self.topics.mail = v;
        }
        if let Some(v) = get("SENDER_WHATSAPP_TOPIC") {
            self.topics.whatsapp = v;
        }
        if let Some(v) = get("SENDER_FIXTURE_DIR") {
            self.fixtures.directory = PathBuf::from(v);
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SenderConfig, SenderError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SenderError::Config(format!("cannot read {}: {}", path, e)))?;
    parse_config(&contents)
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<SenderConfig, SenderError> {
    toml::from_str(contents).map_err(|e| SenderError::Config(e.to_string()))
}
