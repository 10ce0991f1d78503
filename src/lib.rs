pub mod broker;
pub mod config;
pub mod consumer;
pub mod dispatch;
mod error;
mod event;
pub mod gateway;
pub mod persistence;
mod publisher;
pub mod telemetry;

pub use broker::{connect, AckMode, Connection, Connector, InMemoryBroker, RetryPolicy};
pub use config::{ConfigError, RelayConfig};
pub use consumer::{
    ConsumerConfig, ConsumerError, ConsumerHandle, ConsumerState, ConsumerStats, EventConsumer,
};
pub use dispatch::{
    Acknowledgment, Deliver, DeliveryResult, Receipt, Submission, Transport, TransportDispatcher,
};
pub use error::{BrokerError, DeliveryError, FailureKind};
pub use event::{Event, RoutingKey, Severity};
pub use persistence::{InMemoryLogStore, LogEntry, LogStore};
pub use publisher::EventPublisher;

#[cfg(feature = "amqp")]
pub use broker::amqp::AmqpConnector;
