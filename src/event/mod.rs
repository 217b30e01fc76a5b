use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

mod normalizer;

pub use normalizer::{normalize, source_message_id, with_timezone};

/// Schema version stamped on every published event.
pub const SCHEMA_VERSION: u32 = 1;

/// Source channel of an inbound support message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Mail,
    Whatsapp,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Mail => "MAIL",
            ChannelType::Whatsapp => "WHATSAPP",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RawEvent is the canonical, channel-independent form of an inbound
/// message as published to a channel topic.
///
/// Built once by [`normalize`], serialized, then dropped. Consumers must
/// read fields by name; field order in the JSON payload is not part of the
/// contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Random v4 identifier, fresh for every event
    pub event_id: Uuid,

    pub channel_type: ChannelType,

    /// `{prefix}-{index}-{suffix}`, unique within a run
    pub source_message_id: String,

    /// ISO-8601 string, always ending in `Z` or carrying a `+` offset
    pub timestamp: String,

    /// Email address or phone number
    pub contact: String,

    /// Message text, passed through as-is
    pub body: String,

    /// Channel-specific context (platform tag, original date, ...)
    pub metadata: BTreeMap<String, String>,

    pub schema_version: u32,
}
