//! The event value and its wire form.
//!
//! Every transport carries the same payload, `{ "name": ..., "data": ... }`,
//! serialized as compact JSON. The binary RPC transport wraps the same two
//! fields in its own frame (see [`crate::persistence::rpc`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// An event submitted for persistence.
///
/// `name` is the event category (`"log"`, `"event"`, `"auth"`, ...) and
/// decides which handler the consumer routes it to. `data` is opaque.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub data: String,
}

impl Event {
    /// Create a new event.
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Shorthand for a `"log"` event.
    pub fn log(data: impl Into<String>) -> Self {
        Self::new("log", data)
    }

    /// Serialize to the wire form shared by every transport.
    pub fn to_wire(&self) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(self).map_err(DeliveryError::serialization)
    }

    /// Parse the wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, DeliveryError> {
        serde_json::from_slice(bytes).map_err(DeliveryError::serialization)
    }
}

/// Severity of a log event, the last segment of its routing key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Tag attached to a published message; the broker matches it against
/// queue binding patterns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Category prefix for every key the queue transport emits.
    pub const LOG_CATEGORY: &'static str = "log";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `log.INFO`, `log.WARNING` or `log.ERROR`.
    pub fn log(severity: Severity) -> Self {
        Self(format!("{}.{}", Self::LOG_CATEGORY, severity))
    }

    /// The binding patterns that together cover every key from [`RoutingKey::log`].
    pub fn log_bindings() -> Vec<String> {
        Severity::ALL
            .iter()
            .map(|s| RoutingKey::log(*s).0)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}
