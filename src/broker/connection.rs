//! Startup connection gate: dial the broker with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{Connection, Connector};
use crate::error::BrokerError;

/// How hard [`connect`] tries before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed dial. `max_retries + 1` consecutive
    /// failures are fatal.
    pub max_retries: u32,
    /// Scale of the quadratic backoff curve.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            unit: Duration::from_secs(1),
        }
    }
}

/// Delay before the retry that follows failed attempt number `attempt`
/// (zero-based): `unit * attempt²`.
///
/// Attempt 0 yields no delay at all, so the first retry is immediate. This
/// reproduces the deployed behaviour and is probably not what was intended;
/// see DESIGN.md before changing it.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt.saturating_mul(attempt))
}

/// Dial `address` until it succeeds or the policy is exhausted.
///
/// This is a startup precondition, not a steady-state reconnect loop: the
/// caller must not proceed without a connection. Blocks the calling task for
/// the cumulative backoff.
pub async fn connect(
    connector: &dyn Connector,
    address: &str,
    policy: RetryPolicy,
) -> Result<Arc<dyn Connection>, BrokerError> {
    let mut attempts: u32 = 0;

    loop {
        match connector.dial(address).await {
            Ok(connection) => {
                info!(attempts = attempts + 1, "connected to broker");
                return Ok(connection);
            }
            Err(err) => {
                warn!(attempt = attempts + 1, error = %err, "broker not ready yet");

                if attempts > policy.max_retries {
                    return Err(BrokerError::ConnectionUnavailable {
                        attempts: attempts + 1,
                        reason: err.to_string(),
                    });
                }

                let delay = backoff_delay(attempts, policy.unit);
                info!(delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
        }
    }
}
