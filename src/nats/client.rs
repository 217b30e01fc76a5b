use crate::error::SenderError;
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::{info, warn};

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Automatic reconnect attempts made by the client, below the pipeline
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
    /// Create the stream covering the topics when it does not exist
    #[serde(default = "default_ensure_stream")]
    pub ensure_stream: bool,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "SUPPORT_RAW".to_string()
}

fn default_connect_retries() -> usize {
    3
}

fn default_ensure_stream() -> bool {
    true
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            connect_retries: default_connect_retries(),
            ensure_stream: default_ensure_stream(),
        }
    }
}

/// NATS client with JetStream.
///
/// One client is shared by every batch of a run. Call [`NatsClient::close`]
/// exactly once when the run ends. If it is never called (a panic, a
/// cancelled run future), dropping the client drops the last
/// `async_nats::Client` handle, which stops the connection task and closes
/// the socket.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and make sure `subjects` are captured by a stream
    pub async fn connect(config: NatsConfig, subjects: Vec<String>) -> Result<Self, SenderError> {
        info!(
            url = %config.url,
            retries = config.connect_retries,
            "Connecting to NATS"
        );

        let client = async_nats::ConnectOptions::new()
            .name("signal-sender")
            .max_reconnects(Some(config.connect_retries))
            .connect(config.url.as_str())
            .await
            .map_err(|e| SenderError::Connection {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        let jetstream = jetstream::new(client.clone());

        let nats_client = Self {
            client,
            jetstream,
            config,
        };

        if nats_client.config.ensure_stream {
            nats_client.ensure_stream(subjects).await?;
        }

        Ok(nats_client)
    }

    /// Ensure a JetStream stream exists and captures every subject.
    ///
    /// An existing stream that misses some of `subjects` is updated to
    /// capture them too; its other settings are left alone.
    async fn ensure_stream(&self, subjects: Vec<String>) -> Result<(), SenderError> {
        let name = &self.config.stream_name;

        if let Ok(existing) = self.jetstream.get_stream(name).await {
            let mut stream_config = existing.cached_info().config.clone();
            let missing = missing_subjects(&stream_config.subjects, &subjects);

            if missing.is_empty() {
                info!(stream = %name, "Stream already exists");
                return Ok(());
            }

            warn!(
                stream = %name,
                missing = ?missing,
                "Stream does not capture every topic, adding subjects"
            );
            stream_config.subjects.extend(missing);

            self.jetstream
                .update_stream(&stream_config)
                .await
                .map_err(|e| self.setup_error(e))?;

            info!(stream = %name, subjects = ?stream_config.subjects, "Updated JetStream stream");
            return Ok(());
        }

        info!(stream = %name, subjects = ?subjects, "Stream does not exist, creating");

        let stream_config = stream::Config {
            name: name.clone(),
            subjects,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .map_err(|e| self.setup_error(e))?;

        info!(stream = %name, "Created JetStream stream");
        Ok(())
    }

    fn setup_error(&self, reason: impl std::fmt::Display) -> SenderError {
        SenderError::StreamSetup {
            stream: self.config.stream_name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Get JetStream context for publishing
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Flush pending publishes and release the connection
    pub async fn close(self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection on close");
        }
        drop(self.client);
        info!(url = %self.config.url, "NATS connection closed");
    }
}

/// Subjects in `wanted` that no pattern in `existing` captures
pub(super) fn missing_subjects(existing: &[String], wanted: &[String]) -> Vec<String> {
    wanted
        .iter()
        .filter(|subject| !existing.iter().any(|pattern| subject_matches(pattern, subject)))
        .cloned()
        .collect()
}

/// NATS subject matching: `*` matches one token, a trailing `>` one or more
pub(super) fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut tokens = subject.split('.');

    for part in pattern.split('.') {
        match (part, tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (part, Some(token)) if part == token => {}
            _ => return false,
        }
    }

    tokens.next().is_none()
}
