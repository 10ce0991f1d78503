//! JSON-over-HTTP front end of the persistence service.
//!
//! ## Routes
//!
//! - `POST /log` - body `{ "name": ..., "data": ... }`. Replies `202 Accepted`
//!   with `{ "error": false, "message": "logged" }`, or `500` when the store
//!   fails. A malformed body is rejected by the JSON extractor with a 4xx.
//! - `GET /health` - `{ "ok": true }`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, error};

use super::{LogEntry, LogStore};
use crate::event::Event;

/// Build an axum `Router` writing to `store`.
pub fn router(store: Arc<dyn LogStore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/log", post(write_log_handler))
        .with_state(store)
}

/// Serve the HTTP front end at `addr` (e.g. `"0.0.0.0:80"`).
pub async fn serve(store: Arc<dyn LogStore>, addr: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(store)).await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn write_log_handler(
    State(store): State<Arc<dyn LogStore>>,
    Json(event): Json<Event>,
) -> impl IntoResponse {
    debug!(event = %event.name, "write via http");
    match store.insert(LogEntry::from_event(event)) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "error": false, "message": "logged" })),
        ),
        Err(e) => {
            error!(error = %e, "insert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": true, "message": e.to_string() })),
            )
        }
    }
}
