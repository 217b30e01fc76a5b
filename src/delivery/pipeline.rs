use super::{
    Ack, BatchReport, BrokerClient, DeliveryConfig, DeliveryFailure, DeliveryOutcome, PartitionKey,
};
use crate::error::SenderError;
use crate::event::RawEvent;
use tracing::{error, info};

/// Publishes batches of source records one at a time.
///
/// Each record is normalized, serialized, published, and its ack awaited
/// before the next record is touched. A failed record is reported and
/// skipped; it never aborts the batch.
pub struct DeliveryPipeline<'a, B: BrokerClient + ?Sized> {
    broker: &'a B,
    config: DeliveryConfig,
}

impl<'a, B: BrokerClient + ?Sized> DeliveryPipeline<'a, B> {
    pub fn new(broker: &'a B, config: DeliveryConfig) -> Self {
        Self { broker, config }
    }

    /// Send `records` to `topic` in source order.
    ///
    /// `normalize` receives the 1-based index and the record. Only a
    /// serialization failure is returned as an error; delivery failures
    /// land in the report.
    pub async fn send_batch<R, F>(
        &self,
        topic: &str,
        records: &[R],
        normalize: F,
    ) -> Result<BatchReport, SenderError>
    where
        F: Fn(usize, &R) -> RawEvent,
    {
        let total = records.len();
        let mut report = BatchReport {
            topic: topic.to_string(),
            outcomes: Vec::with_capacity(total),
        };

        info!(topic = %topic, count = total, "Sending batch");

        for (i, record) in records.iter().enumerate() {
            let index = i + 1;
            let event = normalize(index, record);
            let result = self.deliver(topic, &event).await?;

            match &result {
                Ok(ack) => {
                    info!(
                        topic = %topic,
                        index,
                        total,
                        event_id = %event.event_id,
                        sequence = ack.sequence,
                        "[{}/{}] Event acknowledged",
                        index,
                        total
                    );
                }
                Err(failure) => {
                    error!(
                        topic = %topic,
                        index,
                        total,
                        event_id = %event.event_id,
                        source_message_id = %event.source_message_id,
                        error = %failure,
                        "Failed to deliver event"
                    );
                }
            }

            let delivered = result.is_ok();
            report.outcomes.push(DeliveryOutcome {
                index,
                event_id: event.event_id.to_string(),
                source_message_id: event.source_message_id,
                result,
            });

            if delivered && !self.config.send_interval().is_zero() {
                tokio::time::sleep(self.config.send_interval()).await;
            }
        }

        info!(
            topic = %topic,
            successful = report.successful(),
            failed = report.failed(),
            "Batch finished"
        );

        Ok(report)
    }

    /// Publish one event and wait for its ack, bounded by the ack timeout
    async fn deliver(
        &self,
        topic: &str,
        event: &RawEvent,
    ) -> Result<Result<Ack, DeliveryFailure>, SenderError> {
        let payload = serde_json::to_vec(event).map_err(|source| SenderError::Serialization {
            event_id: event.event_id.to_string(),
            source,
        })?;

        let key = partition_key(self.config.partition_key, event);
        let timeout = self.config.ack_timeout();

        let publish = self.broker.publish(topic, key, payload);

        Ok(tokio::time::timeout(timeout, publish)
            .await
            .unwrap_or(Err(DeliveryFailure::AckTimeout(timeout))))
    }
}

fn partition_key(mode: PartitionKey, event: &RawEvent) -> Option<&str> {
    match mode {
        PartitionKey::None => None,
        PartitionKey::Contact if event.contact.is_empty() => {
            Some(event.source_message_id.as_str())
        }
        PartitionKey::Contact => Some(event.contact.as_str()),
    }
}
