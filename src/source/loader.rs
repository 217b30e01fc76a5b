use crate::error::SenderError;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

/// Load a JSON array of records from a fixture file.
///
/// A missing file is a [`SenderError::SourceFileMissing`].
pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SenderError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SenderError::SourceFileMissing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(SenderError::SourceRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let records: Vec<T> =
        serde_json::from_str(&contents).map_err(|source| SenderError::SourceParse {
            path: path.to_path_buf(),
            source,
        })?;

    info!(path = %path.display(), count = records.len(), "Loaded source records");
    Ok(records)
}

/// Like [`load_records`], but a missing file is an empty batch
pub fn load_optional_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SenderError> {
    match load_records(path) {
        Err(SenderError::SourceFileMissing { .. }) => {
            info!(path = %path.display(), "Optional source file absent, nothing to send");
            Ok(Vec::new())
        }
        other => other,
    }
}
