use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

mod pipeline;

pub use pipeline::DeliveryPipeline;

/// Broker acknowledgment for one published record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub stream: String,
    /// Position of the record in the stream (its offset)
    pub sequence: u64,
}

/// Publish capability consumed by the pipeline.
///
/// Implementations publish durably and resolve once the broker has
/// acknowledged the record. Connection-level retries, if any, happen inside
/// the implementation; the pipeline never retries a record. An ack that
/// does not arrive in time is reported as [`DeliveryFailure::AckTimeout`].
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<Ack, DeliveryFailure>;
}

/// Why a single record was not delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The broker rejected the publish or the connection failed
    Publish(String),
    /// No acknowledgment within the configured timeout
    AckTimeout(Duration),
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Publish(msg) => write!(f, "publish failed: {}", msg),
            DeliveryFailure::AckTimeout(after) => {
                write!(f, "no acknowledgment after {} ms", after.as_millis())
            }
        }
    }
}

/// Outcome of one record of a batch
#[derive(Clone, Debug)]
pub struct DeliveryOutcome {
    /// 1-based position in the source file
    pub index: usize,
    pub event_id: String,
    pub source_message_id: String,
    pub result: Result<Ack, DeliveryFailure>,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-record outcomes of a `send_batch` call, in source order
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub topic: String,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl BatchReport {
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Optional grouping key attached to each publish
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKey {
    /// No key; ordering across the topic is not guaranteed
    #[default]
    None,
    /// The event contact, or its source message id when the contact is empty
    Contact,
}

/// Delivery pacing
#[derive(Clone, Debug, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Pause after each acknowledged record
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default)]
    pub partition_key: PartitionKey,
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_send_interval_ms() -> u64 {
    500
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            send_interval_ms: default_send_interval_ms(),
            partition_key: PartitionKey::None,
        }
    }
}

impl DeliveryConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}
