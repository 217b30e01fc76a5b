use super::{ChannelType, RawEvent, SCHEMA_VERSION};
use rand::Rng;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Builds the canonical event for one source record.
///
/// Treats every input as an opaque string: nothing is parsed or validated,
/// so this never fails. The only rewrite applied is [`with_timezone`] on the
/// original date.
pub fn normalize(
    channel_type: ChannelType,
    source_message_id: String,
    contact: String,
    body: String,
    original_date: &str,
    metadata: Option<BTreeMap<String, String>>,
) -> RawEvent {
    RawEvent {
        event_id: Uuid::new_v4(),
        channel_type,
        source_message_id,
        timestamp: with_timezone(original_date),
        contact,
        body,
        metadata: metadata.unwrap_or_default(),
        schema_version: SCHEMA_VERSION,
    }
}

/// Appends `Z` unless the date already ends in `Z` or contains a `+` offset.
///
/// Textual only. A date such as `2024-13-45` comes out as `2024-13-45Z`.
pub fn with_timezone(date: &str) -> String {
    if date.ends_with('Z') || date.contains('+') {
        date.to_string()
    } else {
        format!("{}Z", date)
    }
}

/// Generates a source message id: `{prefix}-{index}-{8 hex chars}`.
pub fn source_message_id(prefix: &str, index: usize) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{}-{:08x}", prefix, index, suffix)
}
