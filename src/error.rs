//! Error types shared across the relay.

use std::fmt;

use thiserror::Error;

/// Failures reported by a broker backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Dialing the broker kept failing past the retry ceiling.
    #[error("broker unavailable after {attempts} attempts: {reason}")]
    ConnectionUnavailable { attempts: u32, reason: String },
    /// A single dial attempt failed.
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),
    /// The connection is gone; no reconnection is attempted.
    #[error("broker connection closed")]
    ConnectionClosed,
    /// The channel was closed before or during the operation.
    #[error("channel closed")]
    ChannelClosed,
    /// Redeclaration with different parameters.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// Exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Exclusive queue accessed from a connection that does not own it.
    #[error("resource locked: {0}")]
    ResourceLocked(String),
    /// Anything else the backend reports.
    #[error("broker protocol error: {0}")]
    Protocol(String),
}

/// Why a delivery failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Could not reach the remote endpoint (or open a broker channel).
    ConnectFailed,
    /// The remote answered with a non-success status or an error.
    DeliveryRejected,
    /// The typed RPC call did not finish inside its deadline.
    Timeout,
    /// The event could not be encoded or decoded.
    SerializationFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ConnectFailed => "connect failed",
            FailureKind::DeliveryRejected => "delivery rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::SerializationFailed => "serialization failed",
        };
        f.write_str(s)
    }
}

/// Failed outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct DeliveryError {
    pub kind: FailureKind,
    pub detail: String,
}

impl DeliveryError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn connect(detail: impl fmt::Display) -> Self {
        Self::new(FailureKind::ConnectFailed, detail.to_string())
    }

    pub fn rejected(detail: impl fmt::Display) -> Self {
        Self::new(FailureKind::DeliveryRejected, detail.to_string())
    }

    pub fn timeout(detail: impl fmt::Display) -> Self {
        Self::new(FailureKind::Timeout, detail.to_string())
    }

    pub fn serialization(detail: impl fmt::Display) -> Self {
        Self::new(FailureKind::SerializationFailed, detail.to_string())
    }

    /// Map this error to an HTTP status code for the gateway.
    pub fn status_code(&self) -> u16 {
        match self.kind {
            FailureKind::ConnectFailed => 503,
            FailureKind::DeliveryRejected => 502,
            FailureKind::Timeout => 504,
            FailureKind::SerializationFailed => 400,
        }
    }
}

impl From<BrokerError> for DeliveryError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::ConnectionUnavailable { .. }
            | BrokerError::ConnectFailed(_)
            | BrokerError::ConnectionClosed
            | BrokerError::ChannelClosed => DeliveryError::connect(err),
            BrokerError::PreconditionFailed(_)
            | BrokerError::NotFound(_)
            | BrokerError::ResourceLocked(_)
            | BrokerError::Protocol(_) => DeliveryError::rejected(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_map_to_delivery_kinds() {
        let err: DeliveryError = BrokerError::ConnectionClosed.into();
        assert_eq!(err.kind, FailureKind::ConnectFailed);

        let err: DeliveryError = BrokerError::NotFound("exchange logs_topic".into()).into();
        assert_eq!(err.kind, FailureKind::DeliveryRejected);
        assert!(err.detail.contains("logs_topic"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(DeliveryError::connect("x").status_code(), 503);
        assert_eq!(DeliveryError::rejected("x").status_code(), 502);
        assert_eq!(DeliveryError::timeout("x").status_code(), 504);
        assert_eq!(DeliveryError::serialization("x").status_code(), 400);
    }

    #[test]
    fn display_includes_kind_and_detail() {
        let err = DeliveryError::rejected("status 500");
        assert_eq!(err.to_string(), "delivery rejected: status 500");
    }
}
