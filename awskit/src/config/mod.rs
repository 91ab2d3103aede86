//! Declarative listener and template configuration.
//!
//! A [`ListenerConfig`] captures the options declared at registration time;
//! unset options fall back first to the process-wide [`SqsConfig`] defaults
//! (loaded from `AWSKIT_*` environment variables) and then to the library
//! defaults. [`ListenerConfig::resolve`] produces the finalised
//! [`ContainerConfig`] a container actually runs with.
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::Error;

mod env;
pub use env::{load_config_from_env, SqsConfig};

/// Default bound on in-flight messages per container.
pub const DEFAULT_MAX_CONCURRENT_MESSAGES: usize = 10;
/// Default batch size requested per receive call.
pub const DEFAULT_POLL_MAX_MESSAGES: i32 = 10;
/// Default long-poll wait, in seconds.
pub const DEFAULT_POLL_WAIT_TIME_SECONDS: i32 = 20;
/// Default number of acknowledgements per delete batch. SQS caps batch
/// entries at 10.
pub const DEFAULT_ACK_BATCH_SIZE: usize = 10;
/// Default acknowledgement batching window, in milliseconds.
pub const DEFAULT_ACK_BATCH_WINDOW_MS: u64 = 200;
/// Default time allowed for in-flight handlers to finish during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// When the processor enqueues a delete for a handled message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcknowledgementMode {
    /// Acknowledge when the handler returns normally; leave the message for
    /// redelivery when it fails.
    #[default]
    AutoOnSuccess,
    /// Acknowledge after the handler returns, regardless of outcome.
    Always,
    /// Never acknowledge automatically; the handler acks through
    /// [`crate::Message::acknowledge`].
    Never,
    /// Like [`AcknowledgementMode::Never`], but a handler that returns
    /// without acking or nacking is reported as a listener error.
    Manual,
}

/// Ordering guarantee applied when flushing acknowledgements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcknowledgementOrdering {
    /// Flush completions in any order.
    #[default]
    Unordered,
    /// Emit deletes in receive order; only the longest contiguous completed
    /// prefix is flushed.
    Ordered,
    /// [`AcknowledgementOrdering::Ordered`] per message group; messages
    /// without a group use the unordered path.
    PerGroup,
}

/// What to do with a message whose body cannot be converted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnErrorPolicy {
    /// Leave the message for redelivery and eventual DLQ routing by the
    /// queue service.
    #[default]
    Redrive,
    /// Acknowledge and drop the message.
    Ignore,
}

/// How the container computes poll permits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackpressureMode {
    /// Grant up to `max_concurrent_messages - in_flight`, nothing else.
    HighThroughput,
    /// Additionally refuse messages whose message group already has a
    /// message in flight.
    FifoPreserving,
    /// [`BackpressureMode::FifoPreserving`] when the queue name ends in
    /// `.fifo`, otherwise [`BackpressureMode::HighThroughput`].
    #[default]
    Auto,
}

/// Dispatch strategy for messages sharing a FIFO message group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FifoGroupStrategy {
    /// Different groups run concurrently; each group is sequential.
    #[default]
    GroupParallel,
    /// One message at a time across the whole container.
    StrictSequential,
}

/// Behavior when the configured queue does not exist at startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueNotFoundStrategy {
    /// Surface a configuration-time error immediately.
    #[default]
    FailFast,
    /// Keep retrying the URL lookup with backoff.
    Retry,
    /// Create the queue and continue.
    Create,
}

/// Policy applied when a batch send partially fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendBatchFailureStrategy {
    /// Return the mixed result as-is.
    #[default]
    PartialSuccess,
    /// Fail the whole call if any entry failed.
    FailOnAny,
    /// Retry only the failed entries, up to 3 attempts with backoff.
    RetryFailed,
}

/// Acknowledgement batching and routing options for one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgementConfig {
    /// When deletes are enqueued.
    #[serde(default)]
    pub mode: AcknowledgementMode,
    /// Ordering guarantee for flushes.
    #[serde(default)]
    pub ordering: AcknowledgementOrdering,
    /// Receipt handles per delete batch, at most 10.
    #[serde(default = "AcknowledgementConfig::default_batch_size")]
    pub batch_size: usize,
    /// Maximum time a completed acknowledgement waits before being flushed.
    #[serde(default = "AcknowledgementConfig::default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Routing for messages that fail conversion.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
}

impl AcknowledgementConfig {
    fn default_batch_size() -> usize {
        DEFAULT_ACK_BATCH_SIZE
    }

    fn default_batch_window_ms() -> u64 {
        DEFAULT_ACK_BATCH_WINDOW_MS
    }
}

impl Default for AcknowledgementConfig {
    fn default() -> Self {
        AcknowledgementConfig {
            mode: AcknowledgementMode::default(),
            ordering: AcknowledgementOrdering::default(),
            batch_size: DEFAULT_ACK_BATCH_SIZE,
            batch_window_ms: DEFAULT_ACK_BATCH_WINDOW_MS,
            on_error: OnErrorPolicy::default(),
        }
    }
}

/// Periodic visibility-timeout extension for in-flight messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityExtensionConfig {
    /// Whether the container runs an extension timer.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between extension sweeps; a handle is extended once its age
    /// since receive reaches this interval.
    #[serde(default = "VisibilityExtensionConfig::default_interval")]
    pub interval_seconds: u64,
    /// New visibility timeout applied to each extended handle.
    #[serde(default = "VisibilityExtensionConfig::default_extension")]
    pub extension_seconds: i32,
}

impl VisibilityExtensionConfig {
    fn default_interval() -> u64 {
        20
    }

    fn default_extension() -> i32 {
        30
    }
}

impl Default for VisibilityExtensionConfig {
    fn default() -> Self {
        VisibilityExtensionConfig {
            enabled: false,
            interval_seconds: Self::default_interval(),
            extension_seconds: Self::default_extension(),
        }
    }
}

/// Declarative options for one listener, as recorded in the registry.
///
/// Unset fields resolve against [`SqsConfig`] and the library defaults when
/// the container is built.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    /// Queue name or URL. Required.
    pub queue: String,
    /// Upper bound on in-flight messages for this container.
    pub max_concurrent_messages: Option<usize>,
    /// Batch size requested per receive, bounded to `[1, 10]`.
    pub poll_max_messages: Option<i32>,
    /// Long-poll wait in seconds.
    pub poll_wait_time_seconds: Option<i32>,
    /// Per-receive visibility timeout override.
    pub visibility_timeout_seconds: Option<i32>,
    /// Visibility-timeout extension settings.
    pub visibility_extension: VisibilityExtensionConfig,
    /// Acknowledgement settings.
    pub acknowledgement: AcknowledgementConfig,
    /// Poll permit policy.
    pub backpressure_mode: BackpressureMode,
    /// FIFO group dispatch strategy.
    pub fifo_group_strategy: FifoGroupStrategy,
    /// Startup behavior for a missing queue.
    pub queue_not_found_strategy: QueueNotFoundStrategy,
    /// Time allowed for in-flight handlers during shutdown.
    pub shutdown_timeout: Option<Duration>,
}

impl ListenerConfig {
    /// Creates a config for the given queue with everything else defaulted.
    pub fn new(queue: impl Into<String>) -> Self {
        ListenerConfig {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Whether the configured queue is a FIFO queue.
    pub fn is_fifo(&self) -> bool {
        is_fifo_queue(&self.queue)
    }

    /// Validates the declared options without resolving defaults.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue.trim().is_empty() {
            return Err(Error::Configuration("listener queue must not be empty".into()));
        }
        if let Some(n) = self.poll_max_messages {
            if !(1..=10).contains(&n) {
                return Err(Error::Configuration(format!(
                    "poll_max_messages must be within [1, 10], got {n}"
                )));
            }
        }
        if self.max_concurrent_messages == Some(0) {
            return Err(Error::Configuration(
                "max_concurrent_messages must be at least 1".into(),
            ));
        }
        if let Some(wait) = self.poll_wait_time_seconds {
            if !(0..=20).contains(&wait) {
                return Err(Error::Configuration(format!(
                    "poll_wait_time_seconds must be within [0, 20], got {wait}"
                )));
            }
        }
        if !(1..=10).contains(&self.acknowledgement.batch_size) {
            return Err(Error::Configuration(format!(
                "acknowledgement batch_size must be within [1, 10], got {}",
                self.acknowledgement.batch_size
            )));
        }
        if self.visibility_extension.enabled {
            if self.visibility_extension.interval_seconds == 0 {
                return Err(Error::Configuration(
                    "visibility extension interval_seconds must be positive".into(),
                ));
            }
            if self.visibility_extension.extension_seconds <= 0 {
                return Err(Error::Configuration(
                    "visibility extension extension_seconds must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Validates and finalises the config against process-wide defaults.
    pub fn resolve(&self, defaults: &SqsConfig) -> Result<ContainerConfig, Error> {
        self.validate()?;

        let backpressure_mode = match self.backpressure_mode {
            BackpressureMode::Auto => {
                if self.is_fifo() {
                    BackpressureMode::FifoPreserving
                } else {
                    BackpressureMode::HighThroughput
                }
            }
            mode => mode,
        };

        Ok(ContainerConfig {
            queue: self.queue.clone(),
            max_concurrent_messages: self
                .max_concurrent_messages
                .or(defaults.default_max_concurrent)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_MESSAGES),
            poll_max_messages: self.poll_max_messages.unwrap_or(DEFAULT_POLL_MAX_MESSAGES),
            poll_wait_time_seconds: self
                .poll_wait_time_seconds
                .or(defaults.default_wait_time)
                .unwrap_or(DEFAULT_POLL_WAIT_TIME_SECONDS),
            visibility_timeout_seconds: self
                .visibility_timeout_seconds
                .or(defaults.default_visibility_timeout),
            visibility_extension: self.visibility_extension.clone(),
            acknowledgement: self.acknowledgement.clone(),
            backpressure_mode,
            fifo_group_strategy: self.fifo_group_strategy,
            queue_not_found_strategy: self.queue_not_found_strategy,
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            is_fifo: self.is_fifo(),
        })
    }
}

/// Finalised per-container configuration, every default applied.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Queue name or URL.
    pub queue: String,
    /// Upper bound on in-flight messages.
    pub max_concurrent_messages: usize,
    /// Batch size requested per receive.
    pub poll_max_messages: i32,
    /// Long-poll wait in seconds.
    pub poll_wait_time_seconds: i32,
    /// Per-receive visibility timeout override.
    pub visibility_timeout_seconds: Option<i32>,
    /// Visibility-timeout extension settings.
    pub visibility_extension: VisibilityExtensionConfig,
    /// Acknowledgement settings.
    pub acknowledgement: AcknowledgementConfig,
    /// Resolved poll permit policy; never [`BackpressureMode::Auto`].
    pub backpressure_mode: BackpressureMode,
    /// FIFO group dispatch strategy.
    pub fifo_group_strategy: FifoGroupStrategy,
    /// Startup behavior for a missing queue.
    pub queue_not_found_strategy: QueueNotFoundStrategy,
    /// Time allowed for in-flight handlers during shutdown.
    pub shutdown_timeout: Duration,
    /// Whether the queue is a FIFO queue.
    pub is_fifo: bool,
}

/// Options for the send template.
#[derive(Debug, Clone, Default)]
pub struct TemplateConfig {
    /// Policy applied when a batch send partially fails.
    pub send_batch_failure_strategy: SendBatchFailureStrategy,
    /// Delay applied to sends that do not specify one.
    pub default_delay_seconds: Option<i32>,
}

/// Whether the queue name or URL designates a FIFO queue.
pub(crate) fn is_fifo_queue(queue: &str) -> bool {
    queue.ends_with(".fifo")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_applies_library_defaults() {
        let config = ListenerConfig::new("orders-queue");
        let resolved = config.resolve(&SqsConfig::default()).unwrap();
        assert_eq!(resolved.max_concurrent_messages, 10);
        assert_eq!(resolved.poll_max_messages, 10);
        assert_eq!(resolved.poll_wait_time_seconds, 20);
        assert_eq!(resolved.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(resolved.backpressure_mode, BackpressureMode::HighThroughput);
        assert!(!resolved.is_fifo);
    }

    #[test]
    fn resolve_prefers_explicit_over_env_defaults() {
        let defaults = SqsConfig {
            default_max_concurrent: Some(4),
            default_wait_time: Some(5),
            ..Default::default()
        };
        let mut config = ListenerConfig::new("orders-queue");
        config.max_concurrent_messages = Some(2);
        let resolved = config.resolve(&defaults).unwrap();
        assert_eq!(resolved.max_concurrent_messages, 2);
        assert_eq!(resolved.poll_wait_time_seconds, 5);
    }

    #[test]
    fn auto_backpressure_resolves_by_queue_suffix() {
        let config = ListenerConfig::new("orders.fifo");
        let resolved = config.resolve(&SqsConfig::default()).unwrap();
        assert_eq!(resolved.backpressure_mode, BackpressureMode::FifoPreserving);
        assert!(resolved.is_fifo);
    }

    #[test]
    fn poll_max_messages_is_bounded() {
        let mut config = ListenerConfig::new("orders-queue");
        config.poll_max_messages = Some(11);
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");

        config.poll_max_messages = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn ack_batch_size_is_bounded() {
        let mut config = ListenerConfig::new("orders-queue");
        config.acknowledgement.batch_size = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enum_tokens_match_wire_names() {
        let mode: AcknowledgementMode = serde_json::from_str("\"AUTO_ON_SUCCESS\"").unwrap();
        assert_eq!(mode, AcknowledgementMode::AutoOnSuccess);
        let ordering: AcknowledgementOrdering = serde_json::from_str("\"PER_GROUP\"").unwrap();
        assert_eq!(ordering, AcknowledgementOrdering::PerGroup);
        let strategy: SendBatchFailureStrategy = serde_json::from_str("\"RETRY_FAILED\"").unwrap();
        assert_eq!(strategy, SendBatchFailureStrategy::RetryFailed);
    }
}
