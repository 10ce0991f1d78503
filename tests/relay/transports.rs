//! Synchronous transports against a live logger service.

use std::time::{Duration, Instant};

use event_relay::{
    Acknowledgment, Event, FailureKind, InMemoryBroker, Submission, Transport, TransportDispatcher,
};
use tokio::net::TcpListener;

use crate::support::{closed_address, start_logger};

#[tokio::test]
async fn direct_call_persists() {
    let logger = start_logger().await;
    let broker = InMemoryBroker::new();
    let dispatcher = TransportDispatcher::new(&logger.dispatch_config(), broker.open_connection());

    let event = Event::log("user alice logged in");
    let receipt = dispatcher
        .dispatch(&Submission::new(event.clone(), Transport::Direct))
        .await
        .unwrap();

    assert_eq!(receipt.acknowledgment, Acknowledgment::Persisted);
    assert_eq!(receipt.message, "logged");
    assert_eq!(logger.store.events(), vec![event]);
}

#[tokio::test]
async fn direct_call_against_rejecting_service_is_rejected() {
    let logger = start_logger().await;
    logger.store.fail_writes(true);
    let broker = InMemoryBroker::new();
    let dispatcher = TransportDispatcher::new(&logger.dispatch_config(), broker.open_connection());

    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::Direct))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::DeliveryRejected);
    assert!(err.detail.contains("500"));
    assert!(logger.store.is_empty());
}

#[tokio::test]
async fn direct_call_to_nowhere_is_connect_failure() {
    let logger = start_logger().await;
    let mut config = logger.dispatch_config();
    config.http_endpoint = format!("http://{}/log", closed_address().await);
    let dispatcher = TransportDispatcher::new(&config, InMemoryBroker::new().open_connection());

    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::Direct))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::ConnectFailed);
}

#[tokio::test]
async fn binary_rpc_persists() {
    let logger = start_logger().await;
    let dispatcher = TransportDispatcher::new(
        &logger.dispatch_config(),
        InMemoryBroker::new().open_connection(),
    );

    let receipt = dispatcher
        .dispatch(&Submission::new(Event::new("event", "order placed"), Transport::BinaryRpc))
        .await
        .unwrap();

    assert_eq!(receipt.acknowledgment, Acknowledgment::Persisted);
    assert_eq!(receipt.message, "processed payload via RPC: event");
    assert_eq!(logger.store.events(), vec![Event::new("event", "order placed")]);
}

#[tokio::test]
async fn binary_rpc_to_nowhere_is_connect_failure() {
    let logger = start_logger().await;
    let mut config = logger.dispatch_config();
    config.rpc_address = closed_address().await;
    let dispatcher = TransportDispatcher::new(&config, InMemoryBroker::new().open_connection());

    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::BinaryRpc))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::ConnectFailed);
}

#[tokio::test]
async fn grpc_persists() {
    let logger = start_logger().await;
    let dispatcher = TransportDispatcher::new(
        &logger.dispatch_config(),
        InMemoryBroker::new().open_connection(),
    );

    let receipt = dispatcher
        .dispatch(&Submission::new(Event::log("via grpc"), Transport::TypedRpc))
        .await
        .unwrap();

    assert_eq!(receipt.acknowledgment, Acknowledgment::Persisted);
    assert_eq!(receipt.message, "logged");
    assert_eq!(logger.store.events(), vec![Event::log("via grpc")]);
}

#[tokio::test]
async fn grpc_store_failure_is_rejected() {
    let logger = start_logger().await;
    logger.store.fail_writes(true);
    let dispatcher = TransportDispatcher::new(
        &logger.dispatch_config(),
        InMemoryBroker::new().open_connection(),
    );

    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::TypedRpc))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::DeliveryRejected);
}

#[tokio::test]
async fn grpc_against_unresponsive_endpoint_times_out() {
    // Accepts TCP connections (via the backlog) but never speaks HTTP/2.
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let logger = start_logger().await;
    let mut config = logger.dispatch_config();
    config.grpc_endpoint = format!("http://{addr}");
    let dispatcher = TransportDispatcher::new(&config, InMemoryBroker::new().open_connection());

    let started = Instant::now();
    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::TypedRpc))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind, FailureKind::Timeout);
    assert!(elapsed >= Duration::from_millis(900), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "blocked too long: {elapsed:?}");
    assert!(logger.store.is_empty());
    drop(silent);
}
