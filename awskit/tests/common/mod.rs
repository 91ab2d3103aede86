#![allow(dead_code)]
use std::sync::Arc;

use awskit::config::SqsConfig;
use awskit::convert::JsonMessageConverter;
use awskit::metrics::MetricsCollector;
use awskit::{ListenerRegistry, MessageListenerContainer, QueueClient};

/// Builds and starts the container for a registered listener against the
/// given client, with library-default process configuration.
pub async fn start_container(
    registry: &ListenerRegistry,
    key: &str,
    client: Arc<dyn QueueClient>,
    metrics: Arc<dyn MetricsCollector>,
) -> Arc<MessageListenerContainer> {
    let listener = registry.get(key).expect("listener registered");
    let container = Arc::new(
        MessageListenerContainer::from_listener(
            &listener,
            &SqsConfig::default(),
            client,
            Arc::new(JsonMessageConverter::new()),
            metrics,
        )
        .expect("listener config resolves"),
    );
    container.start().await.expect("container starts");
    container
}
