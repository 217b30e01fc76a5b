use crate::event::{normalize, ChannelType, RawEvent};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// A fixture record that can be turned into a canonical event.
///
/// Fields are never validated. Missing or null fields become empty strings
/// so malformed fixtures still reach the broker.
pub trait SourceRecord: DeserializeOwned {
    const CHANNEL: ChannelType;

    fn to_event(&self, source_message_id: String) -> RawEvent;
}

/// `{ "mail": string, "message": string, "date": string }`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MailRecord {
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// `{ "telephone": number|string, "message": string, "date": string }`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WhatsappRecord {
    #[serde(default)]
    pub telephone: Option<Telephone>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Phone numbers arrive either as JSON numbers or strings
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Telephone {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Telephone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Telephone::Number(n) => write!(f, "{}", n),
            Telephone::Text(s) => f.write_str(s),
        }
    }
}

impl SourceRecord for MailRecord {
    const CHANNEL: ChannelType = ChannelType::Mail;

    fn to_event(&self, source_message_id: String) -> RawEvent {
        let date = self.date.clone().unwrap_or_default();
        let metadata = channel_metadata("client", "sender-script", &date);

        normalize(
            Self::CHANNEL,
            source_message_id,
            self.mail.clone().unwrap_or_default(),
            self.message.clone().unwrap_or_default(),
            &date,
            Some(metadata),
        )
    }
}

impl SourceRecord for WhatsappRecord {
    const CHANNEL: ChannelType = ChannelType::Whatsapp;

    fn to_event(&self, source_message_id: String) -> RawEvent {
        let date = self.date.clone().unwrap_or_default();
        let metadata = channel_metadata("platform", "whatsapp", &date);
        let contact = self
            .telephone
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_default();

        normalize(
            Self::CHANNEL,
            source_message_id,
            contact,
            self.message.clone().unwrap_or_default(),
            &date,
            Some(metadata),
        )
    }
}

fn channel_metadata(tag: &str, value: &str, original_date: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(tag.to_string(), value.to_string());
    metadata.insert("originalDate".to_string(), original_date.to_string());
    metadata.insert(
        "sentAt".to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    metadata
}
