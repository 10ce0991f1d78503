//! Listener service: consumes `log.*` events from the topic exchange and
//! forwards each one to the persistence service over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use event_relay::dispatch::HttpTransport;
use event_relay::{connect, telemetry, AmqpConnector, EventConsumer, RelayConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;
    telemetry::init(&config.telemetry)?;

    info!("connecting to broker");
    let connection = connect(&AmqpConnector, &config.broker.url, config.broker.retry)
        .await
        .context("broker never became available")?;

    let forwarder = Arc::new(HttpTransport::new(config.dispatch.http_endpoint.clone()));
    let handle = EventConsumer::new(Arc::clone(&connection), forwarder, config.consumer.clone())
        .start()
        .await
        .context("failed to start consumer")?;
    info!(queue = handle.queue_name(), "waiting for messages");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let stream_lost = loop {
        tokio::select! {
            _ = &mut shutdown => break false,
            _ = ticker.tick() => {
                if handle.is_finished() {
                    break true;
                }
            }
        }
    };

    let stats = handle.shutdown().await;
    info!(?stats, "listener stopped");
    if let Err(e) = connection.close().await {
        warn!(error = %e, "failed to close broker connection");
    }

    if stream_lost {
        anyhow::bail!("delivery stream ended, broker connection lost");
    }
    Ok(())
}
