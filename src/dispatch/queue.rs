//! Queue transport: hand the event to the broker and return.

use async_trait::async_trait;

use super::{Deliver, Submission};
use crate::error::DeliveryError;
use crate::event::RoutingKey;
use crate::publisher::EventPublisher;

/// Publishes under `log.<SEVERITY>`. Success only means the broker accepted
/// the message.
pub struct QueueTransport {
    publisher: EventPublisher,
}

impl QueueTransport {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Deliver for QueueTransport {
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError> {
        let routing_key = RoutingKey::log(submission.severity);
        self.publisher.publish(&submission.event, &routing_key).await?;
        Ok(format!("accepted by broker as {routing_key}"))
    }
}
