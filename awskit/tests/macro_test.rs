#![allow(unused_crate_dependencies)]
//! The `#[sqs_listener]` attribute against the default registry.
use serde::Deserialize;

use awskit::testing::{disable_listener_registration, trigger_listener};
use awskit::{sqs_listener, Error, ListenerRegistry, Message};

#[derive(Debug, Deserialize)]
struct Order {
    order_id: u64,
}

#[sqs_listener(queue = "orders-queue", max_concurrent_messages = 5, poll_wait_time_seconds = 2)]
async fn handle_order(message: Message<Order>) -> Result<(), Error> {
    if message.body().order_id == 0 {
        return Err(Error::Listener("order id must be positive".into()));
    }
    Ok(())
}

#[sqs_listener(queue = "audit-queue")]
async fn handle_audit(_message: Message<serde_json::Value>) -> Result<(), Error> {
    Ok(())
}

// One test body: these cases share the process-wide default registry.
#[tokio::test]
async fn macro_registration_against_the_default_registry() {
    let registry = ListenerRegistry::global();
    registry.clear();

    register_handle_order().unwrap();
    let listeners = registry.get_listeners();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].key(), "handle_order");
    assert_eq!(listeners[0].config().queue, "orders-queue");
    assert_eq!(listeners[0].config().max_concurrent_messages, Some(5));
    assert_eq!(listeners[0].config().poll_wait_time_seconds, Some(2));

    // duplicate registration of the same key is rejected
    assert!(register_handle_order().is_err());

    // the registered handler is runnable through the adapter
    trigger_listener(registry, "handle_order", &serde_json::json!({"order_id": 1}))
        .await
        .unwrap();
    let err = trigger_listener(registry, "handle_order", &serde_json::json!({"order_id": 0}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "listener_error");

    // registration is skipped while the scoped guard is alive
    {
        let _guard = disable_listener_registration();
        register_handle_audit().unwrap();
        assert_eq!(registry.len(), 1);
    }
    register_handle_audit().unwrap();
    assert_eq!(registry.len(), 2);

    registry.clear();
}
