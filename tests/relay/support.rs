//! Shared fixtures: an in-process logger service and a recording forwarder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use event_relay::config::DispatchConfig;
use event_relay::persistence::{grpc, http, rpc};
use event_relay::{Deliver, DeliveryError, Event, InMemoryLogStore, Submission};
use tokio::net::TcpListener;

/// The three persistence front ends over one store, each on its own port.
pub struct Logger {
    pub store: InMemoryLogStore,
    pub http_base: String,
    pub rpc_address: String,
    pub grpc_endpoint: String,
}

impl Logger {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            http_endpoint: format!("{}/log", self.http_base),
            rpc_address: self.rpc_address.clone(),
            grpc_endpoint: self.grpc_endpoint.clone(),
            grpc_timeout: Duration::from_secs(1),
        }
    }
}

/// Bind to port 0 for every front end and serve them in the background.
pub async fn start_logger() -> Logger {
    let store = InMemoryLogStore::new();

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    let app = http::router(Arc::new(store.clone()));
    tokio::spawn(async move {
        axum::serve(http_listener, app).await.unwrap();
    });

    let rpc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rpc_addr = rpc_listener.local_addr().unwrap();
    tokio::spawn(rpc::serve_listener(Arc::new(store.clone()), rpc_listener));

    let grpc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let grpc_addr = grpc_listener.local_addr().unwrap();
    tokio::spawn(grpc::serve_listener(Arc::new(store.clone()), grpc_listener));

    Logger {
        store,
        http_base: format!("http://{http_addr}"),
        rpc_address: rpc_addr.to_string(),
        grpc_endpoint: format!("http://{grpc_addr}"),
    }
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Forwarder that only records what it was given.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliver for Recorder {
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError> {
        self.events.lock().unwrap().push(submission.event.clone());
        Ok("recorded".to_string())
    }
}

/// Poll `done` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, done: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
