//! In-memory topic-exchange broker for tests and single-process setups.
//!
//! Implements the subset of broker behaviour the relay relies on:
//! - exchanges are declared idempotently; inequivalent redeclaration fails
//! - exclusive queues belong to the declaring connection and disappear with it
//! - auto-delete queues disappear when their consumer's channel closes
//! - a publish is copied to every queue whose binding matches (fan-out)
//! - unroutable messages are dropped, never dead-lettered
//!
//! ## Example
//!
//! ```
//! use event_relay::broker::{topology, AckMode, Channel, Connection, InMemoryBroker};
//! use futures::StreamExt;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = InMemoryBroker::new();
//! let conn = broker.open_connection();
//! let channel = conn.open_channel().await.unwrap();
//!
//! topology::declare_exchange(channel.as_ref()).await.unwrap();
//! let queue = topology::declare_queue(channel.as_ref()).await.unwrap();
//! topology::bind(channel.as_ref(), &queue, &["log.*".to_string()]).await.unwrap();
//!
//! let mut deliveries = channel.consume(&queue, AckMode::Auto).await.unwrap();
//! channel.publish("logs_topic", "log.INFO", b"hello".to_vec()).await.unwrap();
//!
//! let delivery = deliveries.next().await.unwrap().unwrap();
//! assert_eq!(delivery.routing_key, "log.INFO");
//! # });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::topology::{topic_matches, ExchangeKind, ExchangeSpec, QueueSpec};
use super::{AckMode, Acknowledger, Channel, Connection, Connector, Delivery, DeliveryStream};
use crate::error::BrokerError;

/// Counters exposed for assertions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages accepted by an exchange.
    pub published: u64,
    /// Queue copies made (one publish may be routed to many queues).
    pub routed: u64,
    /// Publishes that matched no binding and were dropped.
    pub unroutable: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
}

#[derive(Clone, Debug)]
struct Message {
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct QueueState {
    spec: QueueSpec,
    owner: u64,
    /// (exchange, pattern)
    bindings: Vec<(String, String)>,
    tx: mpsc::UnboundedSender<Message>,
    /// Taken by the (single) consumer.
    rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl QueueState {
    fn locked_for(&self, connection: u64) -> bool {
        self.spec.exclusive && self.owner != connection
    }
}

#[derive(Default)]
struct BrokerState {
    unavailable: bool,
    failing_dials: u32,
    dial_attempts: u32,
    next_id: u64,
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, Arc<watch::Sender<bool>>>,
    stats: BrokerStats,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

type Shared = Arc<Mutex<BrokerState>>;

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn routes(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Topic => topic_matches(pattern, routing_key),
    }
}

/// Process-local broker. Cloning shares the same exchanges and queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Shared,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection directly, bypassing availability toggles.
    pub fn open_connection(&self) -> Arc<InMemoryConnection> {
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id();
            state.connections.insert(id, Arc::clone(&closed));
            id
        };
        trace!(connection = id, "in-memory connection opened");
        Arc::new(InMemoryConnection {
            id,
            state: Arc::clone(&self.state),
            closed,
        })
    }

    /// While unavailable every dial is refused.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).unavailable = !available;
    }

    /// Refuse the next `n` dials, then accept again.
    pub fn fail_next_dials(&self, n: u32) {
        lock(&self.state).failing_dials = n;
    }

    pub fn dial_attempts(&self) -> u32 {
        lock(&self.state).dial_attempts
    }

    pub fn stats(&self) -> BrokerStats {
        lock(&self.state).stats
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        lock(&self.state).exchanges.contains_key(name)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every open connection, as if the broker went away.
    pub fn disconnect_all(&self) {
        let mut state = lock(&self.state);
        for (_, closed) in state.connections.drain() {
            closed.send_replace(true);
        }
        state.queues.retain(|_, q| !q.spec.exclusive);
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn dial(&self, _address: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        {
            let mut state = lock(&self.state);
            state.dial_attempts += 1;
            if state.unavailable {
                return Err(BrokerError::ConnectFailed("connection refused".into()));
            }
            if state.failing_dials > 0 {
                state.failing_dials -= 1;
                return Err(BrokerError::ConnectFailed("connection refused".into()));
            }
        }
        Ok(self.open_connection())
    }
}

/// A connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    id: u64,
    state: Shared,
    closed: Arc<watch::Sender<bool>>,
}

impl InMemoryConnection {
    fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut state = lock(&self.state);
        state.connections.remove(&self.id);
        let id = self.id;
        state.queues.retain(|_, q| !(q.spec.exclusive && q.owner == id));
        trace!(connection = id, "in-memory connection closed");
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }
        let (closed, _) = watch::channel(false);
        Ok(Box::new(InMemoryChannel {
            connection: self.id,
            state: Arc::clone(&self.state),
            connection_closed: Arc::clone(&self.closed),
            closed,
            consuming: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shutdown();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct InMemoryChannel {
    connection: u64,
    state: Shared,
    connection_closed: Arc<watch::Sender<bool>>,
    closed: watch::Sender<bool>,
    /// Queues this channel consumes from.
    consuming: Mutex<Vec<String>>,
}

impl InMemoryChannel {
    fn check_open(&self) -> Result<(), BrokerError> {
        if *self.connection_closed.borrow() {
            return Err(BrokerError::ConnectionClosed);
        }
        if *self.closed.borrow() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let consumed: Vec<String> = self
            .consuming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut state = lock(&self.state);
        for name in consumed {
            if state.queues.get(&name).is_some_and(|q| q.spec.auto_delete) {
                state.queues.remove(&name);
                trace!(queue = %name, "auto-delete queue removed");
            }
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        match state.exchanges.get(&spec.name) {
            Some(existing) if existing != spec => Err(BrokerError::PreconditionFailed(format!(
                "inequivalent arguments for exchange '{}'",
                spec.name
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        let name = if spec.name.is_empty() {
            format!("amq.gen-{}", state.next_id())
        } else {
            spec.name.clone()
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.locked_for(self.connection) {
                return Err(BrokerError::ResourceLocked(format!("queue '{name}'")));
            }
            let requested = QueueSpec {
                name: name.clone(),
                ..spec.clone()
            };
            if existing.spec != requested {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{name}'"
                )));
            }
            return Ok(name);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.queues.insert(
            name.clone(),
            QueueState {
                spec: QueueSpec {
                    name: name.clone(),
                    ..spec.clone()
                },
                owner: self.connection,
                bindings: Vec::new(),
                tx,
                rx: Some(rx),
            },
        );
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &str,
        exchange: &str,
    ) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{exchange}'")));
        }
        let connection = self.connection;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        if q.locked_for(connection) {
            return Err(BrokerError::ResourceLocked(format!("queue '{queue}'")));
        }
        let binding = (exchange.to_string(), pattern.to_string());
        if !q.bindings.contains(&binding) {
            q.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        let kind = state
            .exchanges
            .get(exchange)
            .map(|spec| spec.kind)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;

        let message = Message {
            routing_key: routing_key.to_string(),
            body,
            redelivered: false,
        };
        let mut routed = 0;
        for q in state.queues.values() {
            let matched = q
                .bindings
                .iter()
                .any(|(ex, pattern)| ex == exchange && routes(kind, pattern, routing_key));
            if matched && q.tx.send(message.clone()).is_ok() {
                routed += 1;
            }
        }

        state.stats.published += 1;
        state.stats.routed += routed;
        if routed == 0 {
            state.stats.unroutable += 1;
            trace!(exchange, routing_key, "message unroutable, dropped");
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, ack_mode: AckMode) -> Result<DeliveryStream, BrokerError> {
        self.check_open()?;
        let (rx, requeue) = {
            let mut state = lock(&self.state);
            let connection = self.connection;
            let q = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
            if q.locked_for(connection) {
                return Err(BrokerError::ResourceLocked(format!("queue '{queue}'")));
            }
            let rx = q.rx.take().ok_or_else(|| {
                BrokerError::ResourceLocked(format!("queue '{queue}' already has a consumer"))
            })?;
            (rx, q.tx.clone())
        };
        self.consuming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(queue.to_string());

        let channel_closed = self.closed.subscribe();
        let connection_closed = self.connection_closed.subscribe();
        let closed = async move {
            tokio::select! {
                _ = wait_closed(channel_closed) => {}
                _ = wait_closed(connection_closed) => {}
            }
        };

        let state = Arc::clone(&self.state);
        let stream = UnboundedReceiverStream::new(rx)
            .map(move |message| {
                let delivery = match ack_mode {
                    AckMode::Auto => Delivery::auto_acked(
                        message.routing_key,
                        message.body,
                        message.redelivered,
                    ),
                    AckMode::Manual => {
                        let acker = InMemoryAcker {
                            state: Arc::clone(&state),
                            requeue: requeue.clone(),
                            message: message.clone(),
                            settled: AtomicBool::new(false),
                        };
                        Delivery::manual(
                            message.routing_key,
                            message.body,
                            message.redelivered,
                            Box::new(acker),
                        )
                    }
                };
                Ok(delivery)
            })
            .take_until(closed)
            .boxed();
        Ok(stream)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolves once the flag flips to `true` or its sender goes away.
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

struct InMemoryAcker {
    state: Shared,
    requeue: mpsc::UnboundedSender<Message>,
    message: Message,
    settled: AtomicBool,
}

impl InMemoryAcker {
    fn settle(&self) -> Result<(), BrokerError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Protocol("delivery already settled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle()?;
        lock(&self.state).stats.acked += 1;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle()?;
        {
            let mut state = lock(&self.state);
            state.stats.rejected += 1;
            if requeue {
                state.stats.requeued += 1;
            }
        }
        if requeue {
            let message = Message {
                redelivered: true,
                ..self.message.clone()
            };
            self.requeue
                .send(message)
                .map_err(|_| BrokerError::ChannelClosed)?;
        }
        Ok(())
    }
}
