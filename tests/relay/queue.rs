//! Queue transport end to end: publish, fan out, consume, forward.

use std::sync::Arc;
use std::time::Duration;

use event_relay::broker::topology::LOGS_EXCHANGE;
use event_relay::dispatch::HttpTransport;
use event_relay::{
    Acknowledgment, ConsumerConfig, Event, EventConsumer, EventPublisher, FailureKind,
    InMemoryBroker, RoutingKey, Severity, Submission, Transport, TransportDispatcher,
};

use crate::support::{eventually, start_logger, Recorder};

#[tokio::test]
async fn published_log_reaches_the_persistence_service_unchanged() {
    let logger = start_logger().await;
    let broker = InMemoryBroker::new();
    let config = logger.dispatch_config();

    let forwarder = Arc::new(HttpTransport::new(config.http_endpoint.clone()));
    let consumer = EventConsumer::new(broker.open_connection(), forwarder, ConsumerConfig::default())
        .start()
        .await
        .unwrap();

    let dispatcher = TransportDispatcher::new(&config, broker.open_connection());
    let event = Event::log("user alice logged in");
    let receipt = dispatcher
        .dispatch(&Submission::new(event.clone(), Transport::Queue).with_severity(Severity::Info))
        .await
        .unwrap();
    assert_eq!(receipt.acknowledgment, Acknowledgment::AcceptedByBroker);

    eventually("the forward to land", || logger.store.len() == 1).await;
    assert_eq!(logger.store.events(), vec![event]);

    let stats = consumer.shutdown().await;
    assert_eq!(stats.received, 1);
    assert_eq!(stats.forwarded, 1);
}

#[tokio::test]
async fn every_consumer_gets_its_own_copy() {
    let broker = InMemoryBroker::new();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    let a = EventConsumer::new(broker.open_connection(), first.clone(), ConsumerConfig::default())
        .start()
        .await
        .unwrap();
    let b = EventConsumer::new(broker.open_connection(), second.clone(), ConsumerConfig::default())
        .start()
        .await
        .unwrap();
    assert_ne!(a.queue_name(), b.queue_name());

    let event = Event::log("broadcast");
    EventPublisher::new(broker.open_connection())
        .publish(&event, &RoutingKey::log(Severity::Warning))
        .await
        .unwrap();

    eventually("both consumers to receive", || {
        first.events().len() == 1 && second.events().len() == 1
    })
    .await;
    assert_eq!(first.events(), vec![event.clone()]);
    assert_eq!(second.events(), vec![event]);
    assert_eq!(broker.stats().routed, 2);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn unmatched_routing_key_is_never_observed() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());
    let config = ConsumerConfig {
        bindings: vec![RoutingKey::log(Severity::Error).to_string()],
        ..ConsumerConfig::default()
    };
    let consumer = EventConsumer::new(broker.open_connection(), recorder.clone(), config)
        .start()
        .await
        .unwrap();

    let publisher = EventPublisher::new(broker.open_connection());
    publisher
        .publish(&Event::log("info only"), &RoutingKey::log(Severity::Info))
        .await
        .unwrap();
    publisher
        .publish(&Event::log("audit"), &RoutingKey::new("audit.login"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.events().is_empty());
    assert_eq!(broker.stats().unroutable, 2);
    assert_eq!(consumer.stats().received, 0);

    publisher
        .publish(&Event::log("error"), &RoutingKey::log(Severity::Error))
        .await
        .unwrap();
    eventually("the matching key to arrive", || recorder.events().len() == 1).await;
    assert_eq!(recorder.events(), vec![Event::log("error")]);

    consumer.shutdown().await;
}

#[tokio::test]
async fn wildcard_binding_covers_every_severity() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());
    let config = ConsumerConfig {
        bindings: vec!["log.*".to_string()],
        ..ConsumerConfig::default()
    };
    let consumer = EventConsumer::new(broker.open_connection(), recorder.clone(), config)
        .start()
        .await
        .unwrap();

    let publisher = EventPublisher::new(broker.open_connection());
    for severity in Severity::ALL {
        publisher
            .publish(&Event::log(severity.as_str()), &RoutingKey::log(severity))
            .await
            .unwrap();
    }

    eventually("all three severities", || recorder.events().len() == 3).await;
    consumer.shutdown().await;
}

#[tokio::test]
async fn queue_acceptance_does_not_mean_persisted() {
    let logger = start_logger().await;
    logger.store.fail_writes(true);
    let broker = InMemoryBroker::new();
    let config = logger.dispatch_config();

    let forwarder = Arc::new(HttpTransport::new(config.http_endpoint.clone()));
    let consumer = EventConsumer::new(broker.open_connection(), forwarder, ConsumerConfig::default())
        .start()
        .await
        .unwrap();
    let dispatcher = TransportDispatcher::new(&config, broker.open_connection());

    // The synchronous caller hears about the failure...
    let err = dispatcher
        .dispatch(&Submission::new(Event::log("sync"), Transport::Direct))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::DeliveryRejected);

    // ...the queued caller does not.
    let receipt = dispatcher
        .dispatch(&Submission::new(Event::log("async"), Transport::Queue))
        .await
        .unwrap();
    assert_eq!(receipt.acknowledgment, Acknowledgment::AcceptedByBroker);

    eventually("the forward to fail", || consumer.stats().failed == 1).await;
    assert!(logger.store.is_empty());

    let stats = consumer.shutdown().await;
    assert_eq!(stats.forwarded, 0);
    assert_eq!(broker.stats().requeued, 0);
}

#[tokio::test]
async fn lost_connection_surfaces_as_delivery_error() {
    let broker = InMemoryBroker::new();
    let connection = broker.open_connection();
    let dispatcher = TransportDispatcher::new(
        &event_relay::config::DispatchConfig::default(),
        connection.clone(),
    );

    broker.disconnect_all();

    let err = dispatcher
        .dispatch(&Submission::new(Event::log("x"), Transport::Queue))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::ConnectFailed);
    assert!(!broker.has_exchange(LOGS_EXCHANGE));
}
