use std::path::PathBuf;
use thiserror::Error;

/// Run-level errors. Any of these ends the run.
///
/// Per-record delivery problems are not errors; they are reported as
/// [`DeliveryFailure`](crate::delivery::DeliveryFailure) values inside a
/// batch report.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed to connect to broker at {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("failed to prepare stream '{stream}': {reason}")]
    StreamSetup { stream: String, reason: String },

    #[error("source file not found: {}", path.display())]
    SourceFileMissing { path: PathBuf },

    #[error("failed to read source file {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source file {} is not a JSON array of records: {source}", path.display())]
    SourceParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize event {event_id}: {source}")]
    Serialization {
        event_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}
