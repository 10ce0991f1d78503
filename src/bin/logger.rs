//! Logger service: the persistence front ends (HTTP, binary RPC, gRPC) over
//! an in-memory store.

use std::sync::Arc;

use anyhow::Context;
use event_relay::persistence::{grpc, http, rpc};
use event_relay::{telemetry, InMemoryLogStore, LogStore, RelayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;
    telemetry::init(&config.telemetry)?;

    let store: Arc<dyn LogStore> = Arc::new(InMemoryLogStore::new());
    let logger = &config.logger;
    info!(
        http = %logger.http_listen,
        rpc = %logger.rpc_listen,
        grpc = %logger.grpc_listen,
        "starting logger service"
    );

    tokio::select! {
        served = http::serve(Arc::clone(&store), &logger.http_listen) => {
            served.context("http front end stopped")?;
        }
        served = rpc::serve(Arc::clone(&store), &logger.rpc_listen) => {
            served.context("rpc front end stopped")?;
        }
        served = grpc::serve(Arc::clone(&store), &logger.grpc_listen) => {
            served.context("grpc front end stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
