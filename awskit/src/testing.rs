//! Test utilities: an in-memory queue client, a recording template and
//! helpers for driving listeners without AWS.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, Duration, Instant};
use uuid::Uuid;

use crate::client::{
    BatchEntryFailure, BatchEntryResults, ClientError, DeleteEntry, ErrorKind, OutboundMessage,
    QueueClient, RawMessage, ReceiveOptions, SendBatchResults, SendEntryReceipt, SendReceipt,
    VisibilityEntry,
};
use crate::config::is_fifo_queue;
use crate::convert::JsonMessageConverter;
use crate::message::{Message, MessageHead};
use crate::registry::{ListenerRegistry, RegistrationDisabledGuard};
use crate::template::{BatchSendResult, SendFailure, SendOptions, SendResult};
use crate::Error;

/// Disables registration on the default registry until the guard drops.
pub fn disable_listener_registration() -> RegistrationDisabledGuard<'static> {
    ListenerRegistry::global().disable_registration()
}

/// Polls `predicate` until it returns true or `timeout` elapses.
pub async fn wait_for_processing(
    mut predicate: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(poll_interval).await;
    }
}

/// Runs the registered handler for `key` with a payload, bypassing any
/// queue. The payload goes through the same conversion path a received
/// message would.
pub async fn trigger_listener(
    registry: &ListenerRegistry,
    key: &str,
    payload: &impl Serialize,
) -> Result<(), Error> {
    let entry = registry
        .get(key)
        .ok_or_else(|| Error::Configuration(format!("no listener registered under '{key}'")))?;
    let body = serde_json::to_string(payload).map_err(|e| Error::Serialization(format!("{e}")))?;
    let head = MessageHead {
        message_id: "test-message-id".into(),
        receipt_handle: "test-receipt-handle".into(),
        queue: entry.config().queue.clone(),
        ..Default::default()
    };
    let converter = JsonMessageConverter::new();
    let future = (entry.adapter)(head, &body, &converter, None)?;
    future.await
}

/// Creates a message with test defaults (`test-message-id`,
/// `test-receipt-handle`, empty attributes). Use [`test_message`] to
/// customize fields.
pub fn create_test_message<T>(body: T) -> Message<T> {
    test_message(body).build()
}

/// Starts building a customized test message.
pub fn test_message<T>(body: T) -> TestMessageBuilder<T> {
    TestMessageBuilder {
        body,
        head: MessageHead {
            message_id: "test-message-id".into(),
            receipt_handle: "test-receipt-handle".into(),
            queue: "test-queue".into(),
            ..Default::default()
        },
    }
}

/// Builder returned by [`test_message`].
pub struct TestMessageBuilder<T> {
    body: T,
    head: MessageHead,
}

impl<T> TestMessageBuilder<T> {
    /// Overrides the message id.
    pub fn message_id(mut self, value: impl Into<String>) -> Self {
        self.head.message_id = value.into();
        self
    }

    /// Overrides the receipt handle.
    pub fn receipt_handle(mut self, value: impl Into<String>) -> Self {
        self.head.receipt_handle = value.into();
        self
    }

    /// Overrides the queue name.
    pub fn queue(mut self, value: impl Into<String>) -> Self {
        self.head.queue = value.into();
        self
    }

    /// Adds a service-set attribute.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.head.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds a sender-set attribute.
    pub fn message_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.head.message_attributes.insert(name.into(), value.into());
        self
    }

    /// Sets the FIFO message group.
    pub fn message_group_id(mut self, value: impl Into<String>) -> Self {
        self.head.message_group_id = Some(value.into());
        self
    }

    /// Builds the message.
    pub fn build(self) -> Message<T> {
        Message::new(self.head, self.body, None)
    }
}

struct StoredMessage {
    raw: RawMessage,
}

#[derive(Default)]
struct MockState {
    // visible messages per queue URL, front is next to deliver
    queues: HashMap<String, VecDeque<StoredMessage>>,
    // delivered but not yet deleted, keyed by receipt handle
    invisible: HashMap<String, (String, StoredMessage)>,
    missing_queues: HashSet<String>,
    delete_batches: Vec<Vec<String>>,
    deleted: Vec<String>,
    deleted_bodies: Vec<String>,
    visibility_changes: Vec<(String, i32)>,
    delete_failures: HashMap<String, u32>,
    send_entry_failures: HashMap<String, u32>,
    injected_receive_errors: VecDeque<ClientError>,
    receive_calls: u64,
    send_calls: u64,
}

/// In-memory [`QueueClient`] for tests.
///
/// Messages pushed with [`MockQueueClient::push_message`] (or sent through
/// it) are delivered by `receive`, held invisible until deleted, and
/// requeued at the front on a zero visibility change, mirroring the
/// service's redelivery behavior closely enough for container tests.
#[derive(Default)]
pub struct MockQueueClient {
    state: Mutex<MockState>,
    sequence: AtomicU64,
}

impl MockQueueClient {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url_for(queue: &str) -> String {
        if queue.contains("://") {
            queue.to_string()
        } else {
            format!("mock://queues/{queue}")
        }
    }

    /// Enqueues a message body on `queue`.
    pub fn push_message(&self, queue: &str, body: impl Into<String>) -> String {
        self.push_raw(queue, body, None)
    }

    /// Enqueues a message body with a FIFO message group.
    pub fn push_message_with_group(
        &self,
        queue: &str,
        body: impl Into<String>,
        group: &str,
    ) -> String {
        self.push_raw(queue, body, Some(group.to_string()))
    }

    fn push_raw(&self, queue: &str, body: impl Into<String>, group: Option<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let raw = RawMessage {
            message_id: message_id.clone(),
            receipt_handle: String::new(),
            body: body.into(),
            message_group_id: group,
            sequence_number: Some(format!("{seq:020}")),
            ..Default::default()
        };
        self.lock()
            .queues
            .entry(Self::url_for(queue))
            .or_default()
            .push_back(StoredMessage { raw });
        message_id
    }

    /// Marks a queue as missing so `get_queue_url` fails until
    /// `create_queue` is called.
    pub fn set_queue_missing(&self, queue: &str) {
        let _ = self.lock().missing_queues.insert(queue.to_string());
    }

    /// Makes the next `times` delete attempts for `receipt_handle` fail with
    /// a retryable per-entry error.
    pub fn fail_delete(&self, receipt_handle: &str, times: u32) {
        let _ = self
            .lock()
            .delete_failures
            .insert(receipt_handle.to_string(), times);
    }

    /// Makes the next `times` batch-send attempts for entry id `id` fail
    /// with a retryable per-entry error.
    pub fn fail_send_entry(&self, id: &str, times: u32) {
        let _ = self.lock().send_entry_failures.insert(id.to_string(), times);
    }

    /// Makes the next receive call fail with `error`.
    pub fn inject_receive_error(&self, error: ClientError) {
        self.lock().injected_receive_errors.push_back(error);
    }

    /// Receipt handles deleted so far, in deletion order.
    pub fn deleted_handles(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Receipt handles per delete-batch call, preserving call boundaries.
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.lock().delete_batches.clone()
    }

    /// Bodies of deleted messages, in deletion order.
    pub fn deleted_bodies(&self) -> Vec<String> {
        self.lock().deleted_bodies.clone()
    }

    /// Recorded `(receipt_handle, visibility_timeout)` changes.
    pub fn visibility_changes(&self) -> Vec<(String, i32)> {
        self.lock().visibility_changes.clone()
    }

    /// Number of receive calls so far.
    pub fn receive_calls(&self) -> u64 {
        self.lock().receive_calls
    }

    /// Number of send and send-batch calls so far.
    pub fn send_calls(&self) -> u64 {
        self.lock().send_calls
    }

    fn enqueue(&self, queue_url: &str, message: OutboundMessage) -> SendReceipt {
        let message_id = Uuid::new_v4().to_string();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let sequence_number = message
            .message_group_id
            .is_some()
            .then(|| format!("{seq:020}"));
        let raw = RawMessage {
            message_id: message_id.clone(),
            receipt_handle: String::new(),
            body: message.body,
            message_attributes: message.message_attributes,
            message_group_id: message.message_group_id,
            sequence_number: sequence_number.clone(),
            ..Default::default()
        };
        self.lock()
            .queues
            .entry(queue_url.to_string())
            .or_default()
            .push_back(StoredMessage { raw });
        SendReceipt {
            message_id,
            sequence_number,
        }
    }

    /// Messages still visible on `queue`.
    pub fn pending_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(&Self::url_for(queue))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Bodies currently visible on `queue`, front first.
    pub fn pending_bodies(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(&Self::url_for(queue))
            .map(|q| q.iter().map(|m| m.raw.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    async fn receive(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<RawMessage>, ClientError> {
        // a sliver of network latency; keeps hot poll loops from starving
        // handler tasks on a current-thread runtime
        sleep(Duration::from_millis(1)).await;
        {
            let mut state = self.lock();
            state.receive_calls += 1;
            if let Some(error) = state.injected_receive_errors.pop_front() {
                return Err(error);
            }
        }
        let deadline = Instant::now() + Duration::from_secs(options.wait_time_seconds.max(0) as u64);
        loop {
            {
                let mut state = self.lock();
                if let Some(queue) = state.queues.get_mut(queue_url) {
                    let take = (options.max_messages.max(0) as usize).min(queue.len());
                    if take > 0 {
                        let popped: Vec<StoredMessage> =
                            (0..take).filter_map(|_| queue.pop_front()).collect();
                        let mut delivered = Vec::with_capacity(popped.len());
                        for mut stored in popped {
                            let receipt = Uuid::new_v4().to_string();
                            stored.raw.receipt_handle = receipt.clone();
                            delivered.push(stored.raw.clone());
                            let _ = state
                                .invisible
                                .insert(receipt, (queue_url.to_string(), stored));
                        }
                        return Ok(delivered);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn delete_batch(
        &self,
        _queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchEntryResults, ClientError> {
        let mut state = self.lock();
        let mut results = BatchEntryResults::default();
        let mut batch = Vec::new();
        for entry in entries {
            if let Some(remaining) = state.delete_failures.get_mut(&entry.receipt_handle) {
                if *remaining > 0 {
                    *remaining -= 1;
                    results.failed.push(BatchEntryFailure {
                        id: entry.id.clone(),
                        code: "InternalError".into(),
                        message: "injected delete failure".into(),
                        sender_fault: false,
                    });
                    continue;
                }
            }
            if let Some((_, stored)) = state.invisible.remove(&entry.receipt_handle) {
                state.deleted_bodies.push(stored.raw.body.clone());
            }
            state.deleted.push(entry.receipt_handle.clone());
            batch.push(entry.receipt_handle.clone());
            results.successful.push(entry.id.clone());
        }
        if !batch.is_empty() {
            state.delete_batches.push(batch);
        }
        Ok(results)
    }

    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: &[VisibilityEntry],
    ) -> Result<BatchEntryResults, ClientError> {
        let mut state = self.lock();
        let mut results = BatchEntryResults::default();
        // requeue zero-timeout entries in reverse so the original order is
        // preserved at the front of the queue
        for entry in entries.iter().rev() {
            state
                .visibility_changes
                .push((entry.receipt_handle.clone(), entry.visibility_timeout));
            if entry.visibility_timeout == 0 {
                if let Some((url, stored)) = state.invisible.remove(&entry.receipt_handle) {
                    debug_assert_eq!(url, queue_url);
                    state
                        .queues
                        .entry(url)
                        .or_default()
                        .push_front(stored);
                }
            }
            results.successful.push(entry.id.clone());
        }
        results.successful.reverse();
        Ok(results)
    }

    async fn send(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, ClientError> {
        self.lock().send_calls += 1;
        Ok(self.enqueue(queue_url, message))
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<(String, OutboundMessage)>,
    ) -> Result<SendBatchResults, ClientError> {
        self.lock().send_calls += 1;
        let mut results = SendBatchResults::default();
        for (id, message) in entries {
            let should_fail = {
                let mut state = self.lock();
                match state.send_entry_failures.get_mut(&id) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if should_fail {
                results.failed.push(BatchEntryFailure {
                    id,
                    code: "InternalError".into(),
                    message: "injected send failure".into(),
                    sender_fault: false,
                });
                continue;
            }
            let receipt = self.enqueue(queue_url, message);
            results.successful.push(SendEntryReceipt { id, receipt });
        }
        Ok(results)
    }

    async fn get_queue_url(&self, queue_name: &str) -> Result<String, ClientError> {
        if self.lock().missing_queues.contains(queue_name) {
            return Err(ClientError::new(
                ErrorKind::QueueNotFound,
                format!("queue {queue_name} does not exist"),
            ));
        }
        Ok(Self::url_for(queue_name))
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError> {
        let mut state = self.lock();
        let _ = state.missing_queues.remove(queue_name);
        let url = Self::url_for(queue_name);
        let _ = state.queues.entry(url.clone()).or_default();
        Ok(url)
    }
}

/// One message recorded by [`MockSqsTemplate`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Target queue.
    pub queue: String,
    /// Structured payload as sent.
    pub payload: serde_json::Value,
    /// Delivery delay, when given.
    pub delay_seconds: Option<i32>,
    /// Sender-set attributes.
    pub message_attributes: HashMap<String, String>,
    /// FIFO message group, when given.
    pub message_group_id: Option<String>,
    /// FIFO deduplication id, when given.
    pub message_deduplication_id: Option<String>,
    /// Whether the target queue is FIFO.
    pub is_fifo: bool,
}

#[derive(Default)]
struct MockTemplateState {
    sent: Vec<SentMessage>,
    consumed: HashMap<String, usize>,
}

/// Recording stand-in for [`crate::SqsTemplate`]: sends are captured in
/// memory and replayed by `receive`, with the same FIFO and batch-size
/// validation as the real template.
#[derive(Default)]
pub struct MockSqsTemplate {
    state: Mutex<MockTemplateState>,
    sequence: AtomicU64,
}

impl MockSqsTemplate {
    /// Creates an empty recording template.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTemplateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one send with default options.
    pub fn send<T: Serialize>(&self, queue: &str, payload: &T) -> Result<SendResult, Error> {
        self.send_with_options(queue, payload, SendOptions::default())
    }

    /// Records one send.
    pub fn send_with_options<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        options: SendOptions,
    ) -> Result<SendResult, Error> {
        let is_fifo = is_fifo_queue(queue);
        if is_fifo && options.message_group_id.is_none() {
            return Err(Error::Configuration(format!(
                "message_group_id is required for FIFO queue {queue}"
            )));
        }
        let payload =
            serde_json::to_value(payload).map_err(|e| Error::Serialization(format!("{e}")))?;
        let sequence_number = is_fifo.then(|| {
            format!("{:020}", self.sequence.fetch_add(1, Ordering::SeqCst))
        });
        let message_id = Uuid::new_v4().to_string();
        self.lock().sent.push(SentMessage {
            queue: queue.to_string(),
            payload,
            delay_seconds: options.delay_seconds,
            message_attributes: options.message_attributes,
            message_group_id: options.message_group_id,
            message_deduplication_id: options.message_deduplication_id,
            is_fifo,
        });
        Ok(SendResult {
            message_id,
            sequence_number,
        })
    }

    /// Records a batch send of 1 to 10 payloads.
    pub fn send_batch<T: Serialize>(
        &self,
        queue: &str,
        payloads: &[T],
    ) -> Result<BatchSendResult, Error> {
        if payloads.is_empty() {
            return Err(Error::Configuration("cannot send an empty batch".into()));
        }
        if payloads.len() > 10 {
            return Err(Error::Configuration(format!(
                "batch of {} exceeds the maximum of 10 messages",
                payloads.len()
            )));
        }
        let mut result = BatchSendResult::default();
        for (index, payload) in payloads.iter().enumerate() {
            match self.send(queue, payload) {
                Ok(send_result) => result.successful.push(send_result),
                Err(e) => result.failed.push(SendFailure {
                    index,
                    code: "MockFailure".into(),
                    message: format!("{e}"),
                    sender_fault: true,
                }),
            }
        }
        Ok(result)
    }

    /// Replays previously sent messages for `queue`, advancing an internal
    /// cursor so each message is returned once.
    pub fn receive(&self, queue: &str, max_messages: usize) -> Vec<Message<serde_json::Value>> {
        let mut state = self.lock();
        let start = state.consumed.get(queue).copied().unwrap_or(0);
        let matching: Vec<SentMessage> = state
            .sent
            .iter()
            .filter(|m| m.queue == queue)
            .skip(start)
            .take(max_messages)
            .cloned()
            .collect();
        let _ = state
            .consumed
            .insert(queue.to_string(), start + matching.len());
        matching
            .into_iter()
            .map(|m| {
                Message::new(
                    MessageHead {
                        message_id: Uuid::new_v4().to_string(),
                        receipt_handle: Uuid::new_v4().to_string(),
                        queue: m.queue,
                        message_attributes: m.message_attributes,
                        message_group_id: m.message_group_id,
                        ..Default::default()
                    },
                    m.payload,
                    None,
                )
            })
            .collect()
    }

    /// Every recorded send, in order.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Recorded sends targeting `queue`.
    pub fn get_messages_for_queue(&self, queue: &str) -> Vec<SentMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }

    /// Number of recorded sends, optionally restricted to one queue.
    pub fn get_message_count(&self, queue: Option<&str>) -> usize {
        let state = self.lock();
        match queue {
            Some(queue) => state.sent.iter().filter(|m| m.queue == queue).count(),
            None => state.sent.len(),
        }
    }

    /// Forgets every recorded send and replay cursor.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.consumed.clear();
    }
}

/// Convenience constructor for container tests: a mock client shared as a
/// [`QueueClient`] trait object plus the concrete handle for assertions.
pub fn mock_client() -> (Arc<MockQueueClient>, Arc<dyn QueueClient>) {
    let client = Arc::new(MockQueueClient::new());
    let as_trait: Arc<dyn QueueClient> = client.clone();
    (client, as_trait)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mock_template_records_sends() {
        let template = MockSqsTemplate::new();
        let result = template
            .send("test-queue", &serde_json::json!({"order_id": 123}))
            .unwrap();
        assert!(!result.message_id.is_empty());
        let sent = template.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue, "test-queue");
        assert_eq!(sent[0].payload["order_id"], 123);
        assert!(!sent[0].is_fifo);
    }

    #[test]
    fn mock_template_fifo_requires_group_id() {
        let template = MockSqsTemplate::new();
        let err = template
            .send("test-queue.fifo", &serde_json::json!({"data": "x"}))
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");

        let result = template
            .send_with_options(
                "test-queue.fifo",
                &serde_json::json!({"data": "x"}),
                SendOptions {
                    message_group_id: Some("group-1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.sequence_number.is_some());
        assert!(template.sent_messages()[0].is_fifo);
    }

    #[test]
    fn mock_template_batch_bounds() {
        let template = MockSqsTemplate::new();
        let empty: Vec<serde_json::Value> = Vec::new();
        assert!(template.send_batch("test-queue", &empty).is_err());

        let too_many: Vec<serde_json::Value> =
            (0..11).map(|i| serde_json::json!({ "id": i })).collect();
        assert!(template.send_batch("test-queue", &too_many).is_err());

        let three: Vec<serde_json::Value> =
            (0..3).map(|i| serde_json::json!({ "id": i })).collect();
        let result = template.send_batch("test-queue", &three).unwrap();
        assert_eq!(result.successful.len(), 3);
        assert!(result.failed.is_empty());
    }

    #[test]
    fn mock_template_replays_receives_per_queue() {
        let template = MockSqsTemplate::new();
        template.send("q1", &serde_json::json!({"id": 1})).unwrap();
        template.send("q1", &serde_json::json!({"id": 2})).unwrap();
        template.send("q2", &serde_json::json!({"id": 3})).unwrap();

        let first = template.receive("q1", 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].body()["id"], 1);

        let second = template.receive("q1", 10);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body()["id"], 2);

        assert!(template.receive("q1", 10).is_empty());
        assert_eq!(template.get_message_count(None), 3);
        assert_eq!(template.get_message_count(Some("q1")), 2);
        assert_eq!(template.get_message_count(Some("missing")), 0);

        template.clear();
        assert_eq!(template.get_message_count(None), 0);
    }

    #[tokio::test]
    async fn mock_client_delivers_and_requeues() {
        let client = MockQueueClient::new();
        let _ = client.push_message("q", "one");
        let url = client.get_queue_url("q").await.unwrap();

        let received = client
            .receive(
                &url,
                &ReceiveOptions {
                    max_messages: 10,
                    wait_time_seconds: 0,
                    visibility_timeout: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(client.pending_count("q"), 0);

        // zero visibility returns it to the front
        client
            .change_visibility_batch(
                &url,
                &[VisibilityEntry {
                    id: received[0].message_id.clone(),
                    receipt_handle: received[0].receipt_handle.clone(),
                    visibility_timeout: 0,
                }],
            )
            .await
            .unwrap();
        assert_eq!(client.pending_count("q"), 1);
    }

    #[test]
    fn test_message_builder_defaults() {
        let message = create_test_message(serde_json::json!({"data": "test"}));
        assert_eq!(message.message_id(), "test-message-id");
        assert_eq!(message.receipt_handle(), "test-receipt-handle");
        assert!(message.attributes().is_empty());

        let custom = test_message(serde_json::json!({}))
            .message_id("custom-id")
            .message_attribute("priority", "high")
            .message_group_id("g1")
            .build();
        assert_eq!(custom.message_id(), "custom-id");
        assert_eq!(
            custom.message_attributes().get("priority").map(String::as_str),
            Some("high")
        );
        assert_eq!(custom.message_group_id(), Some("g1"));
    }

    #[tokio::test]
    async fn wait_for_processing_times_out() {
        assert!(
            !wait_for_processing(
                || false,
                Duration::from_millis(50),
                Duration::from_millis(10)
            )
            .await
        );
        assert!(
            wait_for_processing(|| true, Duration::from_secs(1), Duration::from_millis(10)).await
        );
    }
}
