//! Gateway HTTP surface, exercised with reqwest.

use std::sync::Arc;

use event_relay::config::DispatchConfig;
use event_relay::{gateway, Event, InMemoryBroker, TransportDispatcher};
use serde_json::{json, Value};

use crate::support::{closed_address, start_logger};

/// Bind to port 0 and return the base URL.
async fn start_gateway(config: &DispatchConfig, broker: &InMemoryBroker) -> String {
    let dispatcher = Arc::new(TransportDispatcher::new(config, broker.open_connection()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        gateway::serve_listener(dispatcher, listener).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn root_says_hello() {
    let logger = start_logger().await;
    let base = start_gateway(&logger.dispatch_config(), &InMemoryBroker::new()).await;

    let resp = reqwest::Client::new().post(&base).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], false);
    assert_eq!(body["message"], "Hello from the broker!");
}

#[tokio::test]
async fn synchronous_submission_reports_logged() {
    let logger = start_logger().await;
    let base = start_gateway(&logger.dispatch_config(), &InMemoryBroker::new()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/handle"))
        .json(&json!({
            "action": "log",
            "log": { "name": "log", "data": "via gateway" },
            "transport": "rpc"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "logged");
    assert_eq!(body["acknowledgment"], "persisted");
    assert_eq!(body["transport"], "rpc");
    assert_eq!(logger.store.events(), vec![Event::log("via gateway")]);
}

#[tokio::test]
async fn queued_submission_reports_broker_acceptance_only() {
    let logger = start_logger().await;
    let broker = InMemoryBroker::new();
    let base = start_gateway(&logger.dispatch_config(), &broker).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/handle"))
        .json(&json!({
            "action": "log",
            "log": { "name": "log", "data": "queued" },
            "severity": "WARNING"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "accepted by broker");
    assert_eq!(body["acknowledgment"], "accepted_by_broker");
    assert_eq!(body["detail"], "accepted by broker as log.WARNING");
    assert_eq!(broker.stats().published, 1);
    assert!(logger.store.is_empty());
}

#[tokio::test]
async fn failures_map_to_status_codes() {
    let logger = start_logger().await;
    logger.store.fail_writes(true);
    let mut config = logger.dispatch_config();
    config.rpc_address = closed_address().await;
    let base = start_gateway(&config, &InMemoryBroker::new()).await;
    let client = reqwest::Client::new();

    let rejected = client
        .post(format!("{base}/handle"))
        .json(&json!({
            "action": "log",
            "log": { "name": "log", "data": "x" },
            "transport": "direct"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 502);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], true);
    assert_eq!(body["kind"], "delivery rejected");

    let unreachable = client
        .post(format!("{base}/handle"))
        .json(&json!({
            "action": "log",
            "log": { "name": "log", "data": "x" },
            "transport": "rpc"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(unreachable.status(), 503);
}

#[tokio::test]
async fn unknown_action_is_bad_request() {
    let logger = start_logger().await;
    let base = start_gateway(&logger.dispatch_config(), &InMemoryBroker::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/handle"))
        .json(&json!({ "action": "mail" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "unknown action: mail");

    let resp = client
        .post(format!("{base}/handle"))
        .json(&json!({ "action": "log" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
