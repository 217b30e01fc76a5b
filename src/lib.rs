// Canonical event model and normalization
pub mod event;

// Fixture loading and channel records
pub mod source;

// Sequential publish pipeline
pub mod delivery;

// NATS JetStream binding
pub mod nats;

// Source sets and run lifecycle
pub mod runner;

pub mod config;
pub mod error;

pub use error::SenderError;
pub use event::{normalize, ChannelType, RawEvent};
pub use runner::{run, run_with_broker, RunMode, RunSummary};
