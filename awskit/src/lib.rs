//! Spring-style SQS listener containers and send template
//!
//! Turns plain async handler functions into long-running consumers that poll
//! SQS queues, deserialize payloads, dispatch work to a bounded concurrency
//! pool, and acknowledge or redeliver messages according to configurable
//! policies. A synchronous/batched producer ([`SqsTemplate`]) and a
//! process-wide listener registry round out the surface.
//!
//! ```no_run
//! use awskit::{sqs_listener, Error, Message};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     order_id: u64,
//! }
//!
//! #[sqs_listener(queue = "orders-queue")]
//! async fn handle_order(message: Message<Order>) -> Result<(), Error> {
//!     println!("processing order {}", message.body().order_id);
//!     Ok(())
//! }
//!
//! # tokio_test::block_on(async {
//! register_handle_order()?;
//! awskit::start_listeners().await?;
//! # Ok::<(), Error>(())
//! # });
//! ```
use thiserror::Error as ThisError;

pub mod ack;
pub mod backpressure;
pub mod client;
pub mod config;
pub mod container;
pub mod convert;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod supervisor;
pub mod template;
pub mod testing;

pub use awskit_macros::sqs_listener;

pub use ack::AcknowledgementProcessor;
pub use backpressure::BackpressureManager;
pub use client::{ClientError, QueueClient, SqsQueueClient};
pub use config::{
    load_config_from_env, AcknowledgementConfig, AcknowledgementMode, AcknowledgementOrdering,
    BackpressureMode, ContainerConfig, FifoGroupStrategy, ListenerConfig, OnErrorPolicy,
    QueueNotFoundStrategy, SendBatchFailureStrategy, SqsConfig, TemplateConfig,
    VisibilityExtensionConfig,
};
pub use container::{ContainerState, MessageListenerContainer, StopReason};
pub use convert::{JsonMessageConverter, MessageConverter};
pub use message::Message;
pub use metrics::{
    CallbackMetrics, CompositeMetrics, InMemoryMetrics, MetricCounts, MetricEvent,
    MetricsCollector, NoOpMetrics,
};
pub use registry::{ListenerRegistry, RegisteredListener};
pub use supervisor::{
    get_listener_context, start_listeners, stop_listeners, ContainerSupervisor, ListenerContext,
};
pub use template::{
    BatchSendOptions, BatchSendResult, SendFailure, SendOptions, SendResult, SqsTemplate,
};

/// Enum to capture errors surfaced by listener containers, the send template
/// and the registration surface.
///
/// Uses `thiserror` for ergonomic error handling with proper
/// `std::error::Error` implementation. Per-message failures (handler errors,
/// conversion errors) never stop a container; configuration and fatal service
/// errors do.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid or missing option. Fatal at startup; raised at registration or
    /// when listeners are started.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The named queue does not exist and the listener's queue-not-found
    /// strategy did not resolve it.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A payload could not be serialized to a message body.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A message body could not be deserialized into the declared payload
    /// type. Routed through the acknowledgement `on_error` policy.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Wraps any failure from a user handler, including panics and duplicate
    /// manual acknowledgement. Reported to metrics, never propagated out of
    /// the worker.
    #[error("Listener error: {0}")]
    Listener(String),

    /// Retryable service failure (throttling, timeouts, connection resets).
    /// Retried with exponential backoff.
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// Non-retryable service failure (authentication, permissions). The
    /// container transitions to stopping and reports upward.
    #[error("Fatal service error: {0}")]
    FatalService(String),

    /// Failure to send on an internal channel; the receiving task has gone
    /// away, usually during shutdown.
    #[error("Internal channel error: {0}")]
    UnableToSendToChannel(String),

    /// Unable to secure an internal mutex lock.
    #[error("Internal error: unable to secure lock")]
    UnableToSecureLock,
}

impl Error {
    /// Short stable name for the error category, used as the `error_kind`
    /// metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::QueueNotFound(_) => "queue_not_found",
            Error::Serialization(_) => "serialization_error",
            Error::Deserialization(_) => "deserialization_error",
            Error::Listener(_) => "listener_error",
            Error::TransientService(_) => "transient_service_error",
            Error::FatalService(_) => "fatal_service_error",
            Error::UnableToSendToChannel(_) => "channel_error",
            Error::UnableToSecureLock => "lock_error",
        }
    }
}
