//! Broker service: HTTP front door that delivers submissions over the
//! transport each request names.

use std::sync::Arc;

use anyhow::Context;
use event_relay::{connect, gateway, telemetry, AmqpConnector, RelayConfig, TransportDispatcher};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;
    telemetry::init(&config.telemetry)?;

    info!("connecting to broker");
    let connection = connect(&AmqpConnector, &config.broker.url, config.broker.retry)
        .await
        .context("broker never became available")?;

    let dispatcher = Arc::new(TransportDispatcher::new(
        &config.dispatch,
        Arc::clone(&connection),
    ));

    info!(addr = %config.gateway.listen, "starting broker service");
    tokio::select! {
        served = gateway::serve(dispatcher, &config.gateway.listen) => {
            served.context("gateway stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    connection.close().await?;
    Ok(())
}
