//! Network surface of the persistence service.
//!
//! The relay delivers to a logger service that accepts a write over three
//! protocols. This module provides those front ends over a pluggable
//! [`LogStore`], so the service can be stood up in-process for tests and in
//! the `logger` binary. Storage engines themselves live elsewhere.
//!
//! | protocol    | entry point                | success signal            |
//! |-------------|----------------------------|---------------------------|
//! | JSON/HTTP   | `POST /log`                | `202 Accepted`            |
//! | binary RPC  | `RPCServer.LogInfo`        | reply with a result text  |
//! | gRPC        | `logs.LogService/WriteLog` | `LogResponse`             |

pub mod grpc;
pub mod http;
pub mod rpc;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use thiserror::Error;

use crate::event::Event;

/// A persisted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub name: String,
    pub data: String,
    pub created_at: SystemTime,
}

impl LogEntry {
    pub fn from_event(event: Event) -> Self {
        Self {
            name: event.name,
            data: event.data,
            created_at: SystemTime::now(),
        }
    }

    pub fn event(&self) -> Event {
        Event::new(self.name.clone(), self.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("log store error: {0}")]
pub struct StoreError(pub String);

/// Where the persistence front ends write to.
pub trait LogStore: Send + Sync {
    fn insert(&self, entry: LogEntry) -> Result<(), StoreError>;
}

impl<T: LogStore + ?Sized> LogStore for Arc<T> {
    fn insert(&self, entry: LogEntry) -> Result<(), StoreError> {
        (**self).insert(entry)
    }
}

/// Thread-safe in-memory store. Clones share the same entries.
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail (or succeed again).
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stored entries as events, in insertion order.
    pub fn events(&self) -> Vec<Event> {
        self.entries().iter().map(LogEntry::event).collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for InMemoryLogStore {
    fn insert(&self, entry: LogEntry) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError("store unavailable".into()));
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}
