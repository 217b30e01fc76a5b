// Fixture loading and per-channel record adapters

mod loader;
mod records;

pub use loader::{load_optional_records, load_records};
pub use records::{MailRecord, SourceRecord, Telephone, WhatsappRecord};
