#![allow(unused_crate_dependencies)]
//! Supervisor lifecycle over multiple registered listeners.
use std::sync::Arc;
use std::time::Duration;

use awskit::client::{ClientError, ErrorKind};
use awskit::config::SqsConfig;
use awskit::metrics::InMemoryMetrics;
use awskit::testing::{mock_client, wait_for_processing};
use awskit::{ContainerState, ContainerSupervisor, ListenerRegistry, Message, StopReason};

#[tokio::test]
async fn starts_and_stops_one_container_per_listener() {
    let (mock, client) = mock_client();
    let _ = mock.push_message("queue-a", r#"{"n":1}"#);
    let _ = mock.push_message("queue-b", r#"{"n":2}"#);

    let registry = ListenerRegistry::new();
    registry
        .listener("queue-a")
        .register("a", |_m: Message<serde_json::Value>| async move { Ok(()) })
        .unwrap();
    registry
        .listener("queue-b")
        .register("b", |_m: Message<serde_json::Value>| async move { Ok(()) })
        .unwrap();

    let metrics = Arc::new(InMemoryMetrics::new());
    let mut supervisor =
        ContainerSupervisor::new(client, SqsConfig::default()).with_metrics(metrics.clone());
    supervisor.start(&registry).await.unwrap();

    let context = supervisor.get_listener_context("a").expect("context for a");
    assert_eq!(context.queue(), "queue-a");
    assert_eq!(context.state(), ContainerState::Running);
    assert!(supervisor.get_listener_context("missing").is_none());
    assert_eq!(supervisor.contexts().len(), 2);

    assert!(
        wait_for_processing(
            || mock.deleted_handles().len() == 2,
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
    );

    supervisor.stop().await;
    assert_eq!(metrics.counts().containers_started, 2);
    assert_eq!(metrics.counts().containers_stopped, 2);
    for context in supervisor.contexts() {
        assert_eq!(context.state(), ContainerState::Stopped);
        assert_eq!(context.stop_reason(), StopReason::Clean);
    }
}

#[tokio::test]
async fn startup_failure_stops_already_started_containers() {
    let (mock, client) = mock_client();
    mock.set_queue_missing("queue-b");

    let registry = ListenerRegistry::new();
    registry
        .listener("queue-a")
        .register("a", |_m: Message<serde_json::Value>| async move { Ok(()) })
        .unwrap();
    registry
        .listener("queue-b")
        .register("b", |_m: Message<serde_json::Value>| async move { Ok(()) })
        .unwrap();

    let mut supervisor = ContainerSupervisor::new(client, SqsConfig::default());
    let err = supervisor.start(&registry).await.unwrap_err();
    assert_eq!(err.kind(), "queue_not_found");

    // the first container was started, then stopped by the rollback
    let context = supervisor.get_listener_context("a").expect("context for a");
    assert_eq!(context.state(), ContainerState::Stopped);
}

#[tokio::test]
async fn run_exits_with_the_most_severe_stop_reason() {
    let (mock, client) = mock_client();
    mock.inject_receive_error(ClientError::new(ErrorKind::Auth, "access denied"));

    let registry = ListenerRegistry::new();
    registry
        .listener("queue-a")
        .register("a", |_m: Message<serde_json::Value>| async move { Ok(()) })
        .unwrap();

    let mut supervisor = ContainerSupervisor::new(client, SqsConfig::default());
    supervisor.start(&registry).await.unwrap();

    // the auth failure stops the container on its own; run() observes it
    let exit_code = supervisor.run().await;
    assert_eq!(exit_code, 2);

    let context = supervisor.get_listener_context("a").unwrap();
    assert!(matches!(
        context.stop_reason(),
        StopReason::FatalServiceError(_)
    ));
}
