//! Narrow interface over the queue service.
//!
//! Everything above this module depends on the [`QueueClient`] trait only;
//! the AWS SDK appears solely in [`SqsQueueClient`]. Tests substitute
//! [`crate::testing::MockQueueClient`].
use std::collections::HashMap;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error as ThisError;
use tokio::time::Duration;

use crate::Error;

mod sqs;
pub use sqs::SqsQueueClient;

/// Classification of a queue-service failure, driving retry and lifecycle
/// decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The target queue does not exist.
    QueueNotFound,
    /// The service asked us to slow down.
    Throttling,
    /// Connection-level or other retryable failure.
    Transient,
    /// Authentication or authorization failure.
    Auth,
    /// Anything else that retrying will not fix.
    Fatal,
}

/// Error returned by [`QueueClient`] operations.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct ClientError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable description from the service or transport.
    pub message: String,
}

impl ClientError {
    /// Creates a classified error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ClientError {
            kind,
            message: message.into(),
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Throttling | ErrorKind::Transient)
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Error {
        match e.kind {
            ErrorKind::QueueNotFound => Error::QueueNotFound(e.message),
            ErrorKind::Throttling | ErrorKind::Transient => Error::TransientService(e.message),
            ErrorKind::Auth | ErrorKind::Fatal => Error::FatalService(e.message),
        }
    }
}

/// A message as delivered by the queue service, before conversion.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// Service-assigned message id.
    pub message_id: String,
    /// Opaque token authorizing delete and visibility changes for this
    /// delivery.
    pub receipt_handle: String,
    /// Unparsed message body.
    pub body: String,
    /// Service-set attributes, e.g. `ApproximateReceiveCount`.
    pub attributes: HashMap<String, String>,
    /// Sender-set attributes.
    pub message_attributes: HashMap<String, String>,
    /// FIFO message group, when present.
    pub message_group_id: Option<String>,
    /// FIFO sequence number, when present.
    pub sequence_number: Option<String>,
}

/// Parameters for one receive call.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Maximum messages to return, bounded to `[1, 10]` by the service.
    pub max_messages: i32,
    /// Long-poll wait in seconds.
    pub wait_time_seconds: i32,
    /// Visibility timeout override for this receive.
    pub visibility_timeout: Option<i32>,
}

/// One entry of a batched delete.
#[derive(Debug, Clone)]
pub struct DeleteEntry {
    /// Caller-chosen entry id, echoed back in per-entry results.
    pub id: String,
    /// Receipt handle to delete.
    pub receipt_handle: String,
}

/// One entry of a batched visibility change.
#[derive(Debug, Clone)]
pub struct VisibilityEntry {
    /// Caller-chosen entry id, echoed back in per-entry results.
    pub id: String,
    /// Receipt handle to change.
    pub receipt_handle: String,
    /// New visibility timeout in seconds; `0` releases the message for
    /// immediate redelivery.
    pub visibility_timeout: i32,
}

/// Per-entry failure within an otherwise successful batch call.
#[derive(Debug, Clone)]
pub struct BatchEntryFailure {
    /// Entry id supplied by the caller.
    pub id: String,
    /// Service failure code.
    pub code: String,
    /// Service failure message.
    pub message: String,
    /// Whether the failure is attributed to the sender.
    pub sender_fault: bool,
}

/// Outcome of a batched delete or visibility change.
#[derive(Debug, Clone, Default)]
pub struct BatchEntryResults {
    /// Entry ids that succeeded.
    pub successful: Vec<String>,
    /// Entries that failed.
    pub failed: Vec<BatchEntryFailure>,
}

/// A message to be sent.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    /// Serialized body.
    pub body: String,
    /// Delivery delay in seconds.
    pub delay_seconds: Option<i32>,
    /// Sender-set attributes.
    pub message_attributes: HashMap<String, String>,
    /// FIFO message group; required for FIFO queues.
    pub message_group_id: Option<String>,
    /// FIFO deduplication id.
    pub message_deduplication_id: Option<String>,
}

/// Service receipt for one sent message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Service-assigned message id.
    pub message_id: String,
    /// FIFO sequence number, when the target is a FIFO queue.
    pub sequence_number: Option<String>,
}

/// Receipt for one entry of a batched send.
#[derive(Debug, Clone)]
pub struct SendEntryReceipt {
    /// Entry id supplied by the caller.
    pub id: String,
    /// Receipt for the entry.
    pub receipt: SendReceipt,
}

/// Outcome of a batched send.
#[derive(Debug, Clone, Default)]
pub struct SendBatchResults {
    /// Entries accepted by the service.
    pub successful: Vec<SendEntryReceipt>,
    /// Entries rejected by the service.
    pub failed: Vec<BatchEntryFailure>,
}

/// The queue-service operations the library consumes.
///
/// Implementations must be thread-safe; a single client is shared by every
/// container and template in the process.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-polls the queue for up to `max_messages` messages.
    async fn receive(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<RawMessage>, ClientError>;

    /// Deletes up to 10 receipt handles in one call.
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchEntryResults, ClientError>;

    /// Changes the visibility timeout of up to 10 receipt handles in one
    /// call.
    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: &[VisibilityEntry],
    ) -> Result<BatchEntryResults, ClientError>;

    /// Sends a single message.
    async fn send(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, ClientError>;

    /// Sends up to 10 messages in one call; `entries` pairs a caller-chosen
    /// id with each message.
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<(String, OutboundMessage)>,
    ) -> Result<SendBatchResults, ClientError>;

    /// Resolves a queue name to its URL.
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, ClientError>;

    /// Creates the queue and returns its URL. FIFO attributes are derived
    /// from the queue name.
    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError>;
}

/// Exponential backoff with jitter: 100 ms base, doubling per attempt,
/// capped at 30 s, ±25% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new()
    }
}

impl Backoff {
    /// Creates a backoff with the standard parameters.
    pub fn new() -> Self {
        Backoff {
            attempt: 0,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
        }
    }

    /// Computes the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let raw = self
            .base
            .saturating_mul(1u32 << exp)
            .min(self.cap)
            .as_millis() as u64;
        // raw is at most 30_000 ms; jitter within ±25%
        let jitter = raw / 4;
        let low = raw - jitter;
        let high = raw + jitter;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    /// Forgets accumulated attempts after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Sleeps for the next delay.
    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new();
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(75) && first <= Duration::from_millis(125));
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(150) && second <= Duration::from_millis(250));

        for _ in 0..20 {
            let _ = backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped <= Duration::from_millis(37_500));
        assert!(capped >= Duration::from_millis(22_500));
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut backoff = Backoff::new();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ClientError::new(ErrorKind::Throttling, "slow down").is_retryable());
        assert!(ClientError::new(ErrorKind::Transient, "reset").is_retryable());
        assert!(!ClientError::new(ErrorKind::Auth, "denied").is_retryable());
        assert!(!ClientError::new(ErrorKind::QueueNotFound, "missing").is_retryable());
    }
}
