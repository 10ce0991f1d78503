//! TransportDispatcher - deliver one submission over the transport it names.
//!
//! ## Transports
//!
//! | [`Transport`] | path                                   | acknowledgment            |
//! |---------------|----------------------------------------|---------------------------|
//! | `Direct`      | `POST /log` on the persistence service | persisted                 |
//! | `BinaryRpc`   | `RPCServer.LogInfo` over framed TCP    | persisted                 |
//! | `TypedRpc`    | gRPC `WriteLog`, one second deadline   | persisted                 |
//! | `Queue`       | publish to `logs_topic`                | **accepted by broker only** |
//!
//! The first three answer only after the persistence service has written
//! the event (or refused to). A `Queue` receipt means the broker took the
//! message; persistence happens later in the consumer and a failure there
//! is logged, never reported back to the submitter.
//!
//! ## Example
//!
//! ```ignore
//! let dispatcher = TransportDispatcher::new(&config.dispatch, connection);
//! let receipt = dispatcher
//!     .dispatch(&Submission::new(Event::log("user alice logged in"), Transport::Direct))
//!     .await?;
//! assert_eq!(receipt.acknowledgment, Acknowledgment::Persisted);
//! ```

mod direct;
mod grpc;
mod queue;
mod rpc;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::broker::Connection;
use crate::config::DispatchConfig;
use crate::error::DeliveryError;
use crate::event::{Event, Severity};
use crate::publisher::EventPublisher;

pub use direct::HttpTransport;
pub use grpc::GrpcTransport;
pub use queue::QueueTransport;
pub use rpc::RpcTransport;

/// The closed set of delivery strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// JSON over HTTP straight to the persistence service.
    #[serde(rename = "direct")]
    Direct,
    /// Framed binary RPC.
    #[serde(rename = "rpc")]
    BinaryRpc,
    /// gRPC over HTTP/2 with a deadline.
    #[serde(rename = "grpc")]
    TypedRpc,
    /// Publish to the topic exchange for the consumer to persist later.
    #[default]
    #[serde(rename = "queue")]
    Queue,
}

impl Transport {
    pub const ALL: [Transport; 4] = [
        Transport::Direct,
        Transport::BinaryRpc,
        Transport::TypedRpc,
        Transport::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Direct => "direct",
            Transport::BinaryRpc => "rpc",
            Transport::TypedRpc => "grpc",
            Transport::Queue => "queue",
        }
    }

    /// What a successful delivery over this transport guarantees.
    pub fn acknowledgment(&self) -> Acknowledgment {
        match self {
            Transport::Direct | Transport::BinaryRpc | Transport::TypedRpc => {
                Acknowledgment::Persisted
            }
            Transport::Queue => Acknowledgment::AcceptedByBroker,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transport::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown transport: {s}"))
    }
}

/// How far a successful delivery got.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgment {
    /// The persistence service confirmed the write.
    Persisted,
    /// The broker accepted the message. It may still be lost downstream.
    AcceptedByBroker,
}

/// One event to deliver, with the transport chosen by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub event: Event,
    pub transport: Transport,
    /// Selects the routing key on the queue transport.
    pub severity: Severity,
}

impl Submission {
    pub fn new(event: Event, transport: Transport) -> Self {
        Self {
            event,
            transport,
            severity: Severity::default(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Successful outcome of a dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transport: Transport,
    pub acknowledgment: Acknowledgment,
    pub message: String,
}

pub type DeliveryResult = Result<Receipt, DeliveryError>;

/// A delivery strategy.
///
/// Implementations must release every connection or channel they open
/// before returning, on success and on failure.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Deliver the submission, returning a human-readable success message.
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError>;
}

/// Routes each submission to the transport it names.
#[derive(Clone)]
pub struct TransportDispatcher {
    direct: Arc<dyn Deliver>,
    binary_rpc: Arc<dyn Deliver>,
    typed_rpc: Arc<dyn Deliver>,
    queue: Arc<dyn Deliver>,
}

impl TransportDispatcher {
    /// Build the four standard transports from configuration. `connection`
    /// is the process-wide broker connection used by the queue transport.
    pub fn new(config: &DispatchConfig, connection: Arc<dyn Connection>) -> Self {
        Self {
            direct: Arc::new(HttpTransport::new(config.http_endpoint.clone())),
            binary_rpc: Arc::new(RpcTransport::new(config.rpc_address.clone())),
            typed_rpc: Arc::new(GrpcTransport::new(
                config.grpc_endpoint.clone(),
                config.grpc_timeout,
            )),
            queue: Arc::new(QueueTransport::new(EventPublisher::new(connection))),
        }
    }

    /// Assemble a dispatcher from explicit transports.
    pub fn from_transports(
        direct: Arc<dyn Deliver>,
        binary_rpc: Arc<dyn Deliver>,
        typed_rpc: Arc<dyn Deliver>,
        queue: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            direct,
            binary_rpc,
            typed_rpc,
            queue,
        }
    }

    fn transport(&self, transport: Transport) -> &dyn Deliver {
        match transport {
            Transport::Direct => self.direct.as_ref(),
            Transport::BinaryRpc => self.binary_rpc.as_ref(),
            Transport::TypedRpc => self.typed_rpc.as_ref(),
            Transport::Queue => self.queue.as_ref(),
        }
    }

    /// Deliver `submission` over exactly one transport.
    #[instrument(
        name = "dispatch",
        skip_all,
        fields(transport = %submission.transport, event = %submission.event.name)
    )]
    pub async fn dispatch(&self, submission: &Submission) -> DeliveryResult {
        let transport = submission.transport;
        match self.transport(transport).deliver(submission).await {
            Ok(message) => {
                info!(%message, "delivered");
                Ok(Receipt {
                    transport,
                    acknowledgment: transport.acknowledgment(),
                    message,
                })
            }
            Err(err) => {
                warn!(kind = %err.kind, detail = %err.detail, "delivery failed");
                Err(err)
            }
        }
    }
}
