// NATS JetStream binding for the broker seam

mod client;
mod publisher;
#[cfg(test)]
mod tests;

pub use client::{NatsClient, NatsConfig};
pub use publisher::{EventPublisher, PARTITION_KEY_HEADER};
