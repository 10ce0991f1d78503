//! Exchange and queue layout used by publishers and consumers.
//!
//! One durable topic exchange, [`LOGS_EXCHANGE`]. Each consumer process
//! declares its own exclusive, auto-delete queue with a broker-assigned name
//! and binds it to the routing-key patterns it cares about, so every
//! consumer receives its own copy of each matching message (fan-out, not a
//! work queue).

use tracing::debug;

use super::Channel;
use crate::error::BrokerError;

/// Name of the topic exchange every event is published to.
pub const LOGS_EXCHANGE: &str = "logs_topic";

/// Exchange types the relay declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
}

/// Parameters of an exchange declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// The durable, non-auto-deleted `logs_topic` topic exchange.
    pub fn logs_topic() -> Self {
        Self {
            name: LOGS_EXCHANGE.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
        }
    }
}

/// Parameters of a queue declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    /// Empty string asks the broker to assign a name.
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// A non-durable, exclusive, auto-delete queue with a broker-assigned name.
    pub fn exclusive() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Declare the logs exchange on `channel`. Must precede any publish or bind.
pub async fn declare_exchange(channel: &dyn Channel) -> Result<(), BrokerError> {
    channel.declare_exchange(&ExchangeSpec::logs_topic()).await
}

/// Declare this consumer's private queue and return its name.
pub async fn declare_queue(channel: &dyn Channel) -> Result<String, BrokerError> {
    channel.declare_queue(&QueueSpec::exclusive()).await
}

/// Bind `queue` to the logs exchange once per pattern.
pub async fn bind(
    channel: &dyn Channel,
    queue: &str,
    patterns: &[String],
) -> Result<(), BrokerError> {
    for pattern in patterns {
        channel.bind_queue(queue, pattern, LOGS_EXCHANGE).await?;
        debug!(queue, pattern = %pattern, exchange = LOGS_EXCHANGE, "queue bound");
    }
    Ok(())
}

/// AMQP topic matching: words are separated by `.`, `*` matches exactly one
/// word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key
            .split_first()
            .is_some_and(|(head, tail)| head == word && match_words(rest, tail)),
    }
}
