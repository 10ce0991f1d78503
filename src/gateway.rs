//! HTTP front door of the broker service.
//!
//! ## Routes
//!
//! - `POST /` - greeting, `{ "error": false, "message": "Hello from the broker!" }`.
//! - `POST /handle` - submit an event:
//!
//!   ```json
//!   { "action": "log",
//!     "log": { "name": "log", "data": "user alice logged in" },
//!     "transport": "queue",
//!     "severity": "INFO" }
//!   ```
//!
//!   `transport` is one of `direct`, `rpc`, `grpc`, `queue` (default) and
//!   `severity` one of `INFO` (default), `WARNING`, `ERROR`.
//!
//!   Success is `202 Accepted`. The `message` says how far the event got:
//!   `"logged"` when the persistence service confirmed the write,
//!   `"accepted by broker"` for the queue transport, which makes no promise
//!   about the eventual write.
//!
//!   | failure             | status |
//!   |---------------------|--------|
//!   | connect failed      | 503    |
//!   | delivery rejected   | 502    |
//!   | timeout             | 504    |
//!   | serialization       | 400    |
//!   | unknown action      | 400    |
//! - `GET /health` - `{ "ok": true }`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::dispatch::{Acknowledgment, Submission, Transport, TransportDispatcher};
use crate::event::{Event, Severity};

/// Body of `POST /handle`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRequest {
    pub action: String,
    #[serde(default)]
    pub log: Option<Event>,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub severity: Severity,
}

/// Build the gateway router over `dispatcher`.
pub fn router(dispatcher: Arc<TransportDispatcher>) -> Router {
    Router::new()
        .route("/", post(hello_handler))
        .route("/handle", post(submission_handler))
        .route("/health", get(health_handler))
        .with_state(dispatcher)
}

/// Serve the gateway on an already bound listener.
pub async fn serve_listener(
    dispatcher: Arc<TransportDispatcher>,
    listener: TcpListener,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(dispatcher)).await
}

/// Bind `addr` (e.g. `"0.0.0.0:8080"`) and serve the gateway.
pub async fn serve(dispatcher: Arc<TransportDispatcher>, addr: &str) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "gateway listening");
    serve_listener(dispatcher, listener).await
}

async fn hello_handler() -> impl IntoResponse {
    Json(json!({ "error": false, "message": "Hello from the broker!" }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn submission_handler(
    State(dispatcher): State<Arc<TransportDispatcher>>,
    Json(request): Json<SubmissionRequest>,
) -> (StatusCode, Json<Value>) {
    debug!(action = %request.action, transport = %request.transport, "submission");

    let event = match (request.action.as_str(), request.log) {
        ("log", Some(event)) => event,
        ("log", None) => return bad_request("missing log payload"),
        (other, _) => return bad_request(&format!("unknown action: {other}")),
    };

    let submission = Submission::new(event, request.transport).with_severity(request.severity);
    match dispatcher.dispatch(&submission).await {
        Ok(receipt) => {
            let message = match receipt.acknowledgment {
                Acknowledgment::Persisted => "logged",
                Acknowledgment::AcceptedByBroker => "accepted by broker",
            };
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "error": false,
                    "message": message,
                    "transport": receipt.transport,
                    "acknowledgment": receipt.acknowledgment,
                    "detail": receipt.message,
                })),
            )
        }
        Err(err) => {
            let status =
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                Json(json!({
                    "error": true,
                    "message": err.to_string(),
                    "kind": err.kind.to_string(),
                })),
            )
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": true, "message": message })),
    )
}
