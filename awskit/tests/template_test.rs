#![allow(unused_crate_dependencies)]
//! Send template behavior against the in-memory queue client.
use awskit::testing::mock_client;
use awskit::{Error, SendBatchFailureStrategy, SendOptions, SqsTemplate, TemplateConfig};

#[tokio::test]
async fn send_delivers_a_serialized_payload() {
    let (mock, client) = mock_client();
    let template = SqsTemplate::new(client);

    let result = template
        .send("orders-queue", &serde_json::json!({"order_id": 7}))
        .await
        .unwrap();
    assert!(!result.message_id.is_empty());
    assert!(result.sequence_number.is_none());
    assert_eq!(mock.pending_bodies("orders-queue"), vec![r#"{"order_id":7}"#]);
}

#[tokio::test]
async fn fifo_send_without_group_fails_before_any_service_call() {
    let (mock, client) = mock_client();
    let template = SqsTemplate::new(client);

    let err = template
        .send("orders.fifo", &serde_json::json!({"order_id": 7}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration_error");
    assert_eq!(mock.send_calls(), 0);

    let result = template
        .send_with_options(
            "orders.fifo",
            &serde_json::json!({"order_id": 7}),
            SendOptions {
                message_group_id: Some("g1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(result.sequence_number.is_some());
}

#[tokio::test]
async fn batch_size_is_validated() {
    let (_mock, client) = mock_client();
    let template = SqsTemplate::new(client);

    let empty: Vec<serde_json::Value> = Vec::new();
    let err = template.send_batch("orders-queue", &empty).await.unwrap_err();
    assert_eq!(err.kind(), "configuration_error");

    let eleven: Vec<serde_json::Value> =
        (0..11).map(|i| serde_json::json!({ "id": i })).collect();
    let err = template
        .send_batch("orders-queue", &eleven)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration_error");
}

#[tokio::test]
async fn batch_partial_failure_accounts_for_every_entry() {
    let (mock, client) = mock_client();
    // entry index 1 fails more often than anyone retries
    mock.fail_send_entry("1", 10);
    let template = SqsTemplate::new(client);

    let payloads: Vec<serde_json::Value> =
        (0..3).map(|i| serde_json::json!({ "id": i })).collect();
    let result = template
        .send_batch("orders-queue", &payloads)
        .await
        .unwrap();

    assert_eq!(result.successful.len() + result.failed.len(), 3);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].index, 1);
    assert!(!result.failed[0].sender_fault);
}

#[tokio::test]
async fn retry_failed_strategy_recovers_failed_entries() {
    let (mock, client) = mock_client();
    // index 1 fails twice, then succeeds
    mock.fail_send_entry("1", 2);
    let template = SqsTemplate::new(client).with_config(TemplateConfig {
        send_batch_failure_strategy: SendBatchFailureStrategy::RetryFailed,
        ..Default::default()
    });

    let payloads: Vec<serde_json::Value> =
        (0..3).map(|i| serde_json::json!({ "id": i })).collect();
    let result = template
        .send_batch("orders-queue", &payloads)
        .await
        .unwrap();

    assert_eq!(result.successful.len(), 3);
    assert!(result.failed.is_empty());
    // one original call plus two retries
    assert_eq!(mock.send_calls(), 3);
    assert_eq!(mock.pending_count("orders-queue"), 3);
}

#[tokio::test]
async fn fail_on_any_strategy_raises_on_partial_failure() {
    let (mock, client) = mock_client();
    mock.fail_send_entry("0", 1);
    let template = SqsTemplate::new(client).with_config(TemplateConfig {
        send_batch_failure_strategy: SendBatchFailureStrategy::FailOnAny,
        ..Default::default()
    });

    let payloads: Vec<serde_json::Value> =
        (0..2).map(|i| serde_json::json!({ "id": i })).collect();
    let err = template
        .send_batch("orders-queue", &payloads)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientService(_)));
}

#[tokio::test]
async fn receive_returns_typed_generic_messages() {
    let (mock, client) = mock_client();
    let _ = mock.push_message("orders-queue", r#"{"order_id":1}"#);
    let _ = mock.push_message("orders-queue", r#"{"order_id":2}"#);
    let template = SqsTemplate::new(client);

    let messages = template.receive("orders-queue", 10, Some(0)).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body()["order_id"], 1);
    assert_eq!(messages[1].body()["order_id"], 2);
    assert_eq!(messages[0].queue(), "orders-queue");
    assert!(!messages[0].receipt_handle().is_empty());

    let err = template.receive("orders-queue", 0, None).await.unwrap_err();
    assert_eq!(err.kind(), "configuration_error");
}

#[tokio::test]
async fn send_applies_attributes_and_delay() {
    let (mock, client) = mock_client();
    let template = SqsTemplate::new(client);

    let mut options = SendOptions {
        delay_seconds: Some(10),
        ..Default::default()
    };
    let _ = options
        .message_attributes
        .insert("priority".into(), "high".into());
    template
        .send_with_options("orders-queue", &serde_json::json!({"id": 1}), options)
        .await
        .unwrap();

    let messages = template
        .receive("orders-queue", 1, Some(0))
        .await
        .unwrap();
    assert_eq!(
        messages[0]
            .message_attributes()
            .get("priority")
            .map(String::as_str),
        Some("high")
    );
}
