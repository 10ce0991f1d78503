//! Broker abstraction - connections, channels and deliveries.
//!
//! The relay talks to a topic-exchange broker through three object-safe
//! traits. One [`Connection`] is created per process at startup (see
//! [`connect`]) and shared by reference; every publish or consume operation
//! opens its own [`Channel`] and closes it when done.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ connect(connector, address, policy)   retry + backoff gate   │
//! └──────────────────────────────────────────────────────────────┘
//!                            │ Arc<dyn Connection>
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Connection::open_channel() -> Box<dyn Channel>               │
//! │ Channel: declare_exchange / declare_queue / bind_queue       │
//! │          publish / consume / close                           │
//! └──────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌──────────────────┐               ┌─────────────────────────┐
//! │ InMemoryBroker   │               │ AmqpConnector (lapin)   │
//! │ (always built)   │               │ feature = "amqp"        │
//! └──────────────────┘               └─────────────────────────┘
//! ```

#[cfg(feature = "amqp")]
pub mod amqp;
mod connection;
mod in_memory;
pub mod topology;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerError;

pub use connection::{backoff_delay, connect, RetryPolicy};
pub use in_memory::{BrokerStats, InMemoryBroker, InMemoryConnection};
pub use topology::{ExchangeKind, ExchangeSpec, QueueSpec};

/// Stream of messages handed to a consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// When the broker considers a message delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledged the moment the broker hands it over. A crash before
    /// the forward completes loses the message (at-most-once).
    #[default]
    Auto,
    /// Acknowledged by the consumer after a successful forward; failures
    /// are requeued (at-least-once, downstream writes must be idempotent).
    Manual,
}

/// Dials a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn Connection>, BrokerError>;
}

/// A live session to the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a channel owned by the caller.
    async fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError>;

    /// Close the connection. Open channels and consumers fail afterwards.
    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// A per-operation session on a [`Connection`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare an exchange. Identical redeclaration is a no-op; differing
    /// parameters fail with [`BrokerError::PreconditionFailed`].
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Declare a queue, returning its (possibly broker-assigned) name.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &str,
        exchange: &str,
    ) -> Result<(), BrokerError>;

    /// Fire-and-forget publish; no confirmation is awaited.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str, ack_mode: AckMode) -> Result<DeliveryStream, BrokerError>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Settles a manually acknowledged delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message received from a queue.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// A delivery that was acknowledged by the broker on hand-over.
    pub fn auto_acked(routing_key: impl Into<String>, body: Vec<u8>, redelivered: bool) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            redelivered,
            acker: None,
        }
    }

    /// A delivery the consumer must settle with [`Delivery::ack`] or
    /// [`Delivery::reject`].
    pub fn manual(
        routing_key: impl Into<String>,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            redelivered,
            acker: Some(acker),
        }
    }

    pub fn needs_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge. A no-op for auto-acknowledged deliveries.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject, optionally requeueing. A no-op for auto-acknowledged deliveries.
    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.reject(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .field("needs_ack", &self.needs_ack())
            .finish()
    }
}
