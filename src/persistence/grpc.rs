//! gRPC front end of the persistence service.
//!
//! Uses tonic for the server and prost for message serialization (standard
//! protobuf wire format, no `.proto` file). The service glue is generated by
//! `build.rs`.
//!
//! ## RPCs
//!
//! - `logs.LogService/WriteLog` - `LogRequest { log_entry }` to `LogResponse { result }`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use super::{LogEntry, LogStore};
use crate::event::Event;

// ---------------------------------------------------------------------------
// Message types (prost - standard protobuf wire format)
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct Log {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub data: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogRequest {
    #[prost(message, optional, tag = "1")]
    pub log_entry: Option<Log>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogResponse {
    #[prost(string, tag = "1")]
    pub result: String,
}

impl From<&Event> for LogRequest {
    fn from(event: &Event) -> Self {
        Self {
            log_entry: Some(Log {
                name: event.name.clone(),
                data: event.data.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Generated service trait + server/client
// ---------------------------------------------------------------------------

include!(concat!(env!("OUT_DIR"), "/logs.LogService.rs"));

pub use log_service_client::LogServiceClient;
pub use log_service_server::{LogService, LogServiceServer};

// ---------------------------------------------------------------------------
// Handler implementation
// ---------------------------------------------------------------------------

/// Implements the generated `LogService` over a [`LogStore`].
pub struct LogServer {
    store: Arc<dyn LogStore>,
}

impl LogServer {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl LogService for LogServer {
    async fn write_log(
        &self,
        request: Request<LogRequest>,
    ) -> Result<Response<LogResponse>, Status> {
        let entry = request
            .into_inner()
            .log_entry
            .ok_or_else(|| Status::invalid_argument("missing log_entry"))?;
        debug!(event = %entry.name, "write via grpc");

        self.store
            .insert(LogEntry::from_event(Event::new(entry.name, entry.data)))
            .map_err(|e| {
                error!(error = %e, "insert failed");
                Status::internal(e.to_string())
            })?;

        Ok(Response::new(LogResponse {
            result: "logged".to_string(),
        }))
    }
}

/// Create a `LogServiceServer` over `store`.
pub fn grpc_server(store: Arc<dyn LogStore>) -> LogServiceServer<LogServer> {
    LogServiceServer::new(LogServer::new(store))
}

/// Serve the gRPC front end on an already bound listener.
pub async fn serve_listener(
    store: Arc<dyn LogStore>,
    listener: TcpListener,
) -> Result<(), tonic::transport::Error> {
    tonic::transport::Server::builder()
        .add_service(grpc_server(store))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
}

/// Bind `addr` (e.g. `"0.0.0.0:50001"`) and serve the gRPC front end.
pub async fn serve(store: Arc<dyn LogStore>, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(store, listener).await?;
    Ok(())
}
