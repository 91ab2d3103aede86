//! Process-wide mapping of handler keys to listener configuration and
//! type-bound handler adapters.
//!
//! The registry is an explicit value; a process-wide default instance backs
//! the `#[sqs_listener]` macro and the top-level `start_listeners` surface,
//! while tests construct private instances. The declared payload type is
//! bound at registration time through an adapter closure, so containers hold
//! the adapter and never see the user's function directly.
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use tokio::time::Duration;
use tracing::debug;

use crate::config::{
    AcknowledgementConfig, BackpressureMode, FifoGroupStrategy, ListenerConfig,
    QueueNotFoundStrategy, VisibilityExtensionConfig,
};
use crate::convert::MessageConverter;
use crate::message::{AckSink, Message, MessageHead};
use crate::Error;

/// Future returned by an erased handler invocation.
pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// Converts a raw body into the handler's payload type and returns the
/// handler's future. A synchronous `Err` is a conversion failure; handler
/// failures surface through the future.
pub(crate) type MessageAdapter = Arc<
    dyn Fn(
            MessageHead,
            &str,
            &dyn MessageConverter,
            Option<Arc<dyn AckSink>>,
        ) -> Result<HandlerFuture, Error>
        + Send
        + Sync,
>;

/// One registered listener: key, declared options and the type-bound
/// adapter.
#[derive(Clone)]
pub struct RegisteredListener {
    key: String,
    config: ListenerConfig,
    pub(crate) adapter: MessageAdapter,
}

impl RegisteredListener {
    /// Stable identifier of the handler, distinct from its identity.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Options declared at registration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

impl std::fmt::Debug for RegisteredListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredListener")
            .field("key", &self.key)
            .field("queue", &self.config.queue)
            .finish()
    }
}

struct Inner {
    listeners: IndexMap<String, RegisteredListener>,
    registration_enabled: bool,
}

static GLOBAL: Lazy<ListenerRegistry> = Lazy::new(ListenerRegistry::new);

/// Registry of listener registrations.
///
/// ```
/// use awskit::{Error, ListenerRegistry, Message};
///
/// let registry = ListenerRegistry::new();
/// registry
///     .listener("orders-queue")
///     .max_concurrent_messages(5)
///     .register("handle-order", |message: Message<serde_json::Value>| async move {
///         println!("{:?}", message.body());
///         Ok(())
///     })?;
/// assert_eq!(registry.get_listeners().len(), 1);
/// # Ok::<(), Error>(())
/// ```
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Creates an empty, private registry.
    pub fn new() -> Self {
        ListenerRegistry {
            inner: Mutex::new(Inner {
                listeners: IndexMap::new(),
                registration_enabled: true,
            }),
        }
    }

    /// The process-wide default registry used by `#[sqs_listener]` and
    /// [`crate::start_listeners`].
    pub fn global() -> &'static ListenerRegistry {
        &GLOBAL
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts building a listener registration for `queue`.
    pub fn listener(&self, queue: impl Into<String>) -> ListenerBuilder<'_> {
        ListenerBuilder {
            registry: self,
            config: ListenerConfig::new(queue),
        }
    }

    /// Registered listeners, in registration order.
    pub fn get_listeners(&self) -> Vec<RegisteredListener> {
        self.inner().listeners.values().cloned().collect()
    }

    /// Looks up a listener by handler key.
    pub fn get(&self, key: &str) -> Option<RegisteredListener> {
        self.inner().listeners.get(key).cloned()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner().listeners.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner().listeners.is_empty()
    }

    /// Empties the registry.
    pub fn clear(&self) {
        self.inner().listeners.clear();
    }

    /// Disables registration until the returned guard drops. Existing
    /// registrations remain; new ones are silently skipped.
    pub fn disable_registration(&self) -> RegistrationDisabledGuard<'_> {
        let previous = {
            let mut inner = self.inner();
            std::mem::replace(&mut inner.registration_enabled, false)
        };
        RegistrationDisabledGuard {
            registry: self,
            previous,
        }
    }

    fn insert(&self, listener: RegisteredListener) -> Result<(), Error> {
        let mut inner = self.inner();
        if !inner.registration_enabled {
            debug!(key = listener.key, "listener registration is disabled, skipping");
            return Ok(());
        }
        if inner.listeners.contains_key(&listener.key) {
            return Err(Error::Configuration(format!(
                "listener key '{}' is already registered",
                listener.key
            )));
        }
        debug!(key = listener.key, queue = listener.config.queue, "listener registered");
        let _ = inner.listeners.insert(listener.key.clone(), listener);
        Ok(())
    }
}

/// Scoped guard returned by [`ListenerRegistry::disable_registration`].
pub struct RegistrationDisabledGuard<'a> {
    registry: &'a ListenerRegistry,
    previous: bool,
}

impl Drop for RegistrationDisabledGuard<'_> {
    fn drop(&mut self) {
        self.registry.inner().registration_enabled = self.previous;
    }
}

/// Builder for one listener registration.
pub struct ListenerBuilder<'a> {
    registry: &'a ListenerRegistry,
    config: ListenerConfig,
}

impl ListenerBuilder<'_> {
    /// Upper bound on in-flight messages for this container.
    pub fn max_concurrent_messages(mut self, value: usize) -> Self {
        self.config.max_concurrent_messages = Some(value);
        self
    }

    /// Batch size requested per receive, bounded to `[1, 10]`.
    pub fn poll_max_messages(mut self, value: i32) -> Self {
        self.config.poll_max_messages = Some(value);
        self
    }

    /// Long-poll wait in seconds.
    pub fn poll_wait_time_seconds(mut self, value: i32) -> Self {
        self.config.poll_wait_time_seconds = Some(value);
        self
    }

    /// Per-receive visibility timeout override.
    pub fn visibility_timeout_seconds(mut self, value: i32) -> Self {
        self.config.visibility_timeout_seconds = Some(value);
        self
    }

    /// Visibility-timeout extension settings.
    pub fn visibility_extension(mut self, value: VisibilityExtensionConfig) -> Self {
        self.config.visibility_extension = value;
        self
    }

    /// Acknowledgement settings.
    pub fn acknowledgement(mut self, value: AcknowledgementConfig) -> Self {
        self.config.acknowledgement = value;
        self
    }

    /// Poll permit policy.
    pub fn backpressure_mode(mut self, value: BackpressureMode) -> Self {
        self.config.backpressure_mode = value;
        self
    }

    /// FIFO group dispatch strategy.
    pub fn fifo_group_strategy(mut self, value: FifoGroupStrategy) -> Self {
        self.config.fifo_group_strategy = value;
        self
    }

    /// Startup behavior for a missing queue.
    pub fn queue_not_found_strategy(mut self, value: QueueNotFoundStrategy) -> Self {
        self.config.queue_not_found_strategy = value;
        self
    }

    /// Time allowed for in-flight handlers during shutdown.
    pub fn shutdown_timeout(mut self, value: Duration) -> Self {
        self.config.shutdown_timeout = Some(value);
        self
    }

    /// Replaces the accumulated options wholesale.
    pub fn config(mut self, value: ListenerConfig) -> Self {
        let queue = self.config.queue.clone();
        self.config = value;
        if self.config.queue.is_empty() {
            self.config.queue = queue;
        }
        self
    }

    /// Validates the options and registers `handler` under `key`, binding
    /// its payload type.
    ///
    /// Handlers declaring `Message<serde_json::Value>` receive the generic
    /// structured value produced by the converter with no type target.
    pub fn register<T, F, Fut>(self, key: impl Into<String>, handler: F) -> Result<(), Error>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Message<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.config.validate()?;
        let adapter: MessageAdapter = Arc::new(
            move |head: MessageHead,
                  body: &str,
                  converter: &dyn MessageConverter,
                  ack: Option<Arc<dyn AckSink>>| {
                let value = converter.deserialize(body)?;
                let typed: T = serde_json::from_value(value)
                    .map_err(|e| Error::Deserialization(format!("{e}")))?;
                let future = handler(Message::new(head, typed, ack));
                Ok(Box::pin(future) as HandlerFuture)
            },
        );
        self.registry.insert(RegisteredListener {
            key: key.into(),
            config: self.config,
            adapter,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn noop(_message: Message<serde_json::Value>) -> Result<(), Error> {
        Ok(())
    }

    #[test]
    fn registers_in_order_and_rejects_duplicates() {
        let registry = ListenerRegistry::new();
        registry.listener("queue-1").register("first", noop).unwrap();
        registry.listener("queue-2").register("second", noop).unwrap();

        let listeners = registry.get_listeners();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].key(), "first");
        assert_eq!(listeners[1].key(), "second");

        let err = registry
            .listener("queue-3")
            .register("first", noop)
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn invalid_config_is_rejected_at_registration() {
        let registry = ListenerRegistry::new();
        let err = registry
            .listener("queue-1")
            .poll_max_messages(0)
            .register("bad", noop)
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn disabled_registration_is_skipped_and_restored() {
        let registry = ListenerRegistry::new();
        registry.listener("queue-1").register("kept", noop).unwrap();

        {
            let _guard = registry.disable_registration();
            registry
                .listener("queue-2")
                .register("skipped", noop)
                .unwrap();
            assert_eq!(registry.len(), 1);
        }

        registry.listener("queue-3").register("after", noop).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("skipped").is_none());
        assert!(registry.get("after").is_some());
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry = ListenerRegistry::new();
        registry.listener("queue-1").register("one", noop).unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn adapter_binds_the_payload_type() {
        #[derive(serde::Deserialize)]
        struct Order {
            order_id: u64,
        }

        let registry = ListenerRegistry::new();
        registry
            .listener("orders-queue")
            .register("orders", |message: Message<Order>| async move {
                assert_eq!(message.body().order_id, 9);
                Ok(())
            })
            .unwrap();

        let entry = registry.get("orders").expect("registered");
        let converter = crate::convert::JsonMessageConverter::new();
        let future = (entry.adapter)(
            crate::message::MessageHead::default(),
            r#"{"order_id": 9}"#,
            &converter,
            None,
        )
        .expect("conversion should succeed");
        future.await.unwrap();

        let err = (entry.adapter)(
            crate::message::MessageHead::default(),
            r#"{"order_id": "nine"}"#,
            &converter,
            None,
        )
        .err()
        .expect("conversion should fail");
        assert_eq!(err.kind(), "deserialization_error");
    }
}
