//! EventConsumer - bind a private queue, pull deliveries, forward events.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──bind()──▶ Bound ──start()──▶ Consuming ──shutdown()──▶ Draining ──▶ Closed
//! ```
//!
//! `start` consumes the [`EventConsumer`] and `shutdown` consumes the
//! [`ConsumerHandle`], so a closed consumer cannot be restarted. A new
//! cycle needs a new `EventConsumer`.
//!
//! ## Worker pool
//!
//! ```text
//! DeliveryStream ─▶ reader task ─▶ mpsc (queue_capacity) ─▶ N worker tasks ─▶ forwarder
//! ```
//!
//! The reader waits when the queue is full, which is where backpressure
//! reaches the broker. Messages are handled in no particular order.
//!
//! ## Acknowledgment
//!
//! With [`AckMode::Auto`] a message counts as delivered the moment the
//! broker hands it over: a crash or failed forward loses it. With
//! [`AckMode::Manual`] the worker acks after a successful forward and
//! rejects with requeue after a failed one, so the persistence service may
//! see the same event more than once. A requeue waits [`REQUEUE_DELAY`]
//! first, which paces redelivery while the persistence service is down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::topology;
use crate::broker::{AckMode, Channel, Connection, Delivery, DeliveryStream};
use crate::dispatch::{Deliver, Submission, Transport};
use crate::error::BrokerError;
use crate::event::{Event, RoutingKey};

/// Pause before a failed forward is handed back to the broker in
/// [`AckMode::Manual`]. The worker holds the message for this long.
pub const REQUEUE_DELAY: Duration = Duration::from_millis(250);

/// Lifecycle position of a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Bound,
    Consuming,
    Draining,
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Bound => "bound",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Draining => "draining",
            ConsumerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("consumer is {actual}, expected {expected}")]
    InvalidState {
        actual: ConsumerState,
        expected: ConsumerState,
    },
}

/// Consumer settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Routing-key patterns bound to the private queue.
    pub bindings: Vec<String>,
    /// Concurrent forward tasks.
    pub workers: usize,
    /// Deliveries buffered between the reader and the workers.
    pub queue_capacity: usize,
    pub ack_mode: AckMode,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bindings: RoutingKey::log_bindings(),
            workers: 16,
            queue_capacity: 256,
            ack_mode: AckMode::Auto,
        }
    }
}

/// Which handler an event name is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// Forward to the persistence service. `"log"`, `"event"` and any
    /// unrecognized name.
    Forward,
    /// `"auth"`: reserved, nothing is done with it yet.
    Reserved,
}

impl Handler {
    pub fn for_event(event: &Event) -> Self {
        match event.name.as_str() {
            "auth" => Handler::Reserved,
            _ => Handler::Forward,
        }
    }
}

/// Counts of what the consumer did with its deliveries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries pulled off the stream.
    pub received: u64,
    /// Events the persistence service accepted.
    pub forwarded: u64,
    /// Forwards that failed. Logged and dropped (or requeued in manual mode).
    pub failed: u64,
    /// Bodies that did not decode as an event.
    pub undecodable: u64,
    /// Events routed to the reserved handler.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
    undecodable: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

struct BoundQueue {
    channel: Box<dyn Channel>,
    name: String,
}

/// A consumer that has not started consuming yet.
pub struct EventConsumer {
    connection: Arc<dyn Connection>,
    forwarder: Arc<dyn Deliver>,
    config: ConsumerConfig,
    bound: Option<BoundQueue>,
}

impl EventConsumer {
    pub fn new(
        connection: Arc<dyn Connection>,
        forwarder: Arc<dyn Deliver>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            connection,
            forwarder,
            config,
            bound: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        match self.bound {
            Some(_) => ConsumerState::Bound,
            None => ConsumerState::Idle,
        }
    }

    /// Broker-assigned name of the private queue, once bound.
    pub fn queue_name(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.name.as_str())
    }

    /// Idle → Bound: open a channel, declare the exchange and a private
    /// queue, and bind every configured pattern.
    #[instrument(name = "consumer_bind", skip(self))]
    pub async fn bind(&mut self) -> Result<&str, ConsumerError> {
        if self.bound.is_some() {
            return Err(ConsumerError::InvalidState {
                actual: ConsumerState::Bound,
                expected: ConsumerState::Idle,
            });
        }
        let bound = self.open_queue().await?;
        info!(queue = %bound.name, bindings = ?self.config.bindings, "consumer bound");
        Ok(self.bound.insert(bound).name.as_str())
    }

    async fn open_queue(&self) -> Result<BoundQueue, BrokerError> {
        let channel = self.connection.open_channel().await?;
        match declare_and_bind(channel.as_ref(), &self.config.bindings).await {
            Ok(name) => Ok(BoundQueue { channel, name }),
            Err(err) => {
                if let Err(close_err) = channel.close().await {
                    warn!(error = %close_err, "failed to close channel after bind failure");
                }
                Err(err)
            }
        }
    }

    /// Bound → Consuming. Binds first when still idle.
    #[instrument(name = "consumer_start", skip(self))]
    pub async fn start(mut self) -> Result<ConsumerHandle, ConsumerError> {
        let bound = match self.bound.take() {
            Some(bound) => bound,
            None => self.open_queue().await?,
        };

        let deliveries = match bound
            .channel
            .consume(&bound.name, self.config.ack_mode)
            .await
        {
            Ok(deliveries) => deliveries,
            Err(err) => {
                if let Err(close_err) = bound.channel.close().await {
                    warn!(error = %close_err, "failed to close channel after consume failure");
                }
                return Err(err.into());
            }
        };

        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..self.config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&self.forwarder),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        let (stop_tx, stop_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(deliveries, tx, stop_rx, Arc::clone(&counters)));

        info!(
            queue = %bound.name,
            workers = self.config.workers.max(1),
            queue_capacity = self.config.queue_capacity.max(1),
            ack_mode = ?self.config.ack_mode,
            "consumer started"
        );

        Ok(ConsumerHandle {
            connection: self.connection,
            queue: bound.name,
            channel: bound.channel,
            stop_tx: Some(stop_tx),
            reader: Some(reader),
            workers,
            counters,
        })
    }
}

async fn declare_and_bind(channel: &dyn Channel, bindings: &[String]) -> Result<String, BrokerError> {
    topology::declare_exchange(channel).await?;
    let queue = topology::declare_queue(channel).await?;
    topology::bind(channel, &queue, bindings).await?;
    Ok(queue)
}

/// Handle to a running consumer. Dropping it stops the reader.
pub struct ConsumerHandle {
    /// Keeps the connection alive while consuming.
    connection: Arc<dyn Connection>,
    queue: String,
    channel: Box<dyn Channel>,
    stop_tx: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ConsumerHandle {
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::Consuming
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Current counters. In-flight forwards may still move them.
    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// The delivery stream ended on its own, e.g. the connection was lost.
    pub fn is_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Consuming → Draining → Closed. Stops the reader and closes the
    /// channel. Forwards already handed to workers are not waited on.
    #[instrument(name = "consumer_shutdown", skip(self), fields(queue = %self.queue))]
    pub async fn shutdown(mut self) -> ConsumerStats {
        debug!(from = %ConsumerState::Consuming, to = %ConsumerState::Draining, "consumer state");
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                error!(error = ?e, "reader task panicked");
            }
        }
        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "failed to close consumer channel");
        }
        // Workers finish whatever is already buffered, then exit.
        self.workers.clear();

        let stats = self.counters.snapshot();
        debug!(from = %ConsumerState::Draining, to = %ConsumerState::Closed, "consumer state");
        info!(?stats, "consumer closed");
        stats
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

async fn read_loop(
    mut deliveries: DeliveryStream,
    tx: mpsc::Sender<Delivery>,
    mut stop: oneshot::Receiver<()>,
    counters: Arc<Counters>,
) {
    loop {
        let next = tokio::select! {
            _ = &mut stop => break,
            next = deliveries.next() => next,
        };
        match next {
            Some(Ok(delivery)) => {
                Counters::inc(&counters.received);
                tokio::select! {
                    _ = &mut stop => break,
                    sent = tx.send(delivery) => {
                        if sent.is_err() {
                            error!("all consumer workers are gone");
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "delivery stream failed");
                break;
            }
            None => {
                warn!("delivery stream ended");
                break;
            }
        }
    }
    debug!("reader stopped");
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    forwarder: Arc<dyn Deliver>,
    counters: Arc<Counters>,
) {
    loop {
        let delivery = rx.lock().await.recv().await;
        let Some(delivery) = delivery else {
            break;
        };
        handle_delivery(delivery, forwarder.as_ref(), &counters).await;
    }
    debug!(worker = id, "worker stopped");
}

async fn handle_delivery(delivery: Delivery, forwarder: &dyn Deliver, counters: &Counters) {
    let event = match Event::from_wire(&delivery.body) {
        Ok(event) => event,
        Err(e) => {
            Counters::inc(&counters.undecodable);
            warn!(routing_key = %delivery.routing_key, error = %e, "undecodable message dropped");
            settle(delivery.reject(false).await);
            return;
        }
    };

    match Handler::for_event(&event) {
        Handler::Reserved => {
            Counters::inc(&counters.skipped);
            debug!(event = %event.name, "no handler for event, skipped");
            settle(delivery.ack().await);
        }
        Handler::Forward => {
            let submission = Submission::new(event, Transport::Direct);
            match forwarder.deliver(&submission).await {
                Ok(_) => {
                    Counters::inc(&counters.forwarded);
                    debug!(event = %submission.event.name, "event forwarded");
                    settle(delivery.ack().await);
                }
                Err(e) => {
                    Counters::inc(&counters.failed);
                    error!(
                        event = %submission.event.name,
                        routing_key = %delivery.routing_key,
                        kind = %e.kind,
                        detail = %e.detail,
                        "forward failed"
                    );
                    if delivery.needs_ack() {
                        tokio::time::sleep(REQUEUE_DELAY).await;
                    }
                    settle(delivery.reject(true).await);
                }
            }
        }
    }
}

fn settle(outcome: Result<(), BrokerError>) {
    if let Err(e) = outcome {
        warn!(error = %e, "failed to settle delivery");
    }
}
