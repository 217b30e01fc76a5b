use crate::delivery::{Ack, BrokerClient, DeliveryFailure};
use async_nats::jetstream::{
    self,
    context::{PublishError, PublishErrorKind},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Header carrying the optional partition key
pub const PARTITION_KEY_HEADER: &str = "Partition-Key";

/// Event publisher for NATS JetStream
#[derive(Clone)]
pub struct EventPublisher {
    jetstream: jetstream::Context,
    ack_timeout: Duration,
}

impl EventPublisher {
    /// Create a new event publisher.
    ///
    /// The context's request timeout is set to `ack_timeout`, so JetStream
    /// waits exactly as long as the pipeline for each ack.
    pub fn new(mut jetstream: jetstream::Context, ack_timeout: Duration) -> Self {
        jetstream.set_timeout(ack_timeout);
        Self {
            jetstream,
            ack_timeout,
        }
    }

    fn failure(&self, topic: &str, error: PublishError) -> DeliveryFailure {
        match error.kind() {
            PublishErrorKind::TimedOut => DeliveryFailure::AckTimeout(self.ack_timeout),
            _ => DeliveryFailure::Publish(format!("subject '{}': {}", topic, error)),
        }
    }
}

#[async_trait]
impl BrokerClient for EventPublisher {
    /// Publish a payload and wait for the JetStream ack.
    ///
    /// The stream sequence in the ack is reported as the record offset.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<Ack, DeliveryFailure> {
        debug!(topic = %topic, bytes = payload.len(), key = ?key, "Publishing event to NATS");

        let ack_future = match key {
            Some(key) => {
                let mut headers = async_nats::HeaderMap::new();
                headers.insert(PARTITION_KEY_HEADER, key);
                self.jetstream
                    .publish_with_headers(topic.to_string(), headers, payload.into())
                    .await
            }
            None => self.jetstream.publish(topic.to_string(), payload.into()).await,
        }
        .map_err(|e| self.failure(topic, e))?;

        let ack = ack_future.await.map_err(|e| self.failure(topic, e))?;

        Ok(Ack {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }
}
