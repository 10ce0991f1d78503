//! EventPublisher - one channel, one publish, no confirmation.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::broker::topology::{self, LOGS_EXCHANGE};
use crate::broker::{Channel, Connection};
use crate::error::DeliveryError;
use crate::event::{Event, RoutingKey};

/// Publishes events to the logs exchange over a shared connection.
///
/// Every call opens its own channel and closes it before returning, whatever
/// the outcome. Success means the broker accepted the frame; whether any
/// queue was bound to receive it is not observable here.
#[derive(Clone)]
pub struct EventPublisher {
    connection: Arc<dyn Connection>,
}

impl EventPublisher {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// Publish `event` under `routing_key`.
    #[instrument(name = "publish", skip_all, fields(event = %event.name, routing_key = %routing_key))]
    pub async fn publish(&self, event: &Event, routing_key: &RoutingKey) -> Result<(), DeliveryError> {
        let body = event.to_wire()?;
        let channel = self.connection.open_channel().await?;

        let outcome = publish_on(channel.as_ref(), routing_key, body).await;

        if let Err(err) = channel.close().await {
            warn!(error = %err, "failed to close publish channel");
        }
        if outcome.is_ok() {
            debug!("event published");
        }
        outcome
    }
}

async fn publish_on(
    channel: &dyn Channel,
    routing_key: &RoutingKey,
    body: Vec<u8>,
) -> Result<(), DeliveryError> {
    topology::declare_exchange(channel).await?;
    channel
        .publish(LOGS_EXCHANGE, routing_key.as_str(), body)
        .await?;
    Ok(())
}
