//! Batches completed message outcomes into delete calls while honoring
//! ordering guarantees.
//!
//! Containers feed the processor two kinds of commands: a `Register` when a
//! message is received (fixing its place in the receive order) and a
//! `Complete` once its outcome is decided. A completion either carries a
//! receipt handle to delete or is a skip — the outcome was "leave for
//! redelivery" — so ordered prefixes keep advancing past failed messages.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::client::{Backoff, DeleteEntry, QueueClient};
use crate::config::{AcknowledgementConfig, AcknowledgementOrdering};
use crate::metrics::{MetricEvent, MetricsCollector};

/// Receipt data for one deletable completion.
#[derive(Debug, Clone)]
pub(crate) struct AckRecord {
    pub receipt_handle: String,
    pub message_id: String,
}

/// Commands accepted by the processor task.
#[derive(Debug)]
pub(crate) enum AckCommand {
    /// Fixes a message's place in the receive order.
    Register { seq: u64, group: Option<String> },
    /// Reports a message's outcome; `None` means "decided, nothing to
    /// delete".
    Complete {
        seq: u64,
        record: Option<AckRecord>,
    },
    /// Flushes everything currently flushable.
    Flush,
    /// Final flush, then exit.
    Shutdown,
}

/// Buffer tracking receive order and completions per ordering mode.
struct OrderingBuffer {
    ordering: AcknowledgementOrdering,
    ready: Vec<AckRecord>,
    order: VecDeque<u64>,
    completed: HashMap<u64, Option<AckRecord>>,
    groups: HashMap<String, VecDeque<u64>>,
    seq_group: HashMap<u64, String>,
}

impl OrderingBuffer {
    fn new(ordering: AcknowledgementOrdering) -> Self {
        OrderingBuffer {
            ordering,
            ready: Vec::new(),
            order: VecDeque::new(),
            completed: HashMap::new(),
            groups: HashMap::new(),
            seq_group: HashMap::new(),
        }
    }

    fn register(&mut self, seq: u64, group: Option<String>) {
        match self.ordering {
            AcknowledgementOrdering::Unordered => {}
            AcknowledgementOrdering::Ordered => self.order.push_back(seq),
            AcknowledgementOrdering::PerGroup => {
                if let Some(group) = group {
                    self.groups.entry(group.clone()).or_default().push_back(seq);
                    let _ = self.seq_group.insert(seq, group);
                }
            }
        }
    }

    fn complete(&mut self, seq: u64, record: Option<AckRecord>) {
        match self.ordering {
            AcknowledgementOrdering::Unordered => {
                if let Some(record) = record {
                    self.ready.push(record);
                }
            }
            AcknowledgementOrdering::Ordered => {
                let _ = self.completed.insert(seq, record);
                self.drain_order();
            }
            AcknowledgementOrdering::PerGroup => match self.seq_group.remove(&seq) {
                Some(group) => {
                    let _ = self.completed.insert(seq, record);
                    self.drain_group(&group);
                }
                None => {
                    if let Some(record) = record {
                        self.ready.push(record);
                    }
                }
            },
        }
    }

    /// Moves the longest contiguous completed prefix of the receive order
    /// into the ready set.
    fn drain_order(&mut self) {
        while let Some(&front) = self.order.front() {
            match self.completed.remove(&front) {
                Some(record) => {
                    let _ = self.order.pop_front();
                    if let Some(record) = record {
                        self.ready.push(record);
                    }
                }
                None => break,
            }
        }
    }

    fn drain_group(&mut self, group: &str) {
        let Some(order) = self.groups.get_mut(group) else {
            return;
        };
        while let Some(&front) = order.front() {
            match self.completed.remove(&front) {
                Some(record) => {
                    let _ = order.pop_front();
                    if let Some(record) = record {
                        self.ready.push(record);
                    }
                }
                None => break,
            }
        }
        if order.is_empty() {
            let _ = self.groups.remove(group);
        }
    }

    fn ready_len(&self) -> usize {
        self.ready.len()
    }

    fn take_ready(&mut self) -> Vec<AckRecord> {
        std::mem::take(&mut self.ready)
    }
}

/// Background task that accumulates completions and flushes delete batches.
///
/// One processor per container. Flushes happen when `batch_size` completions
/// are flushable, when the `batch_window_ms` timer fires, on an explicit
/// flush, and once more during shutdown.
pub struct AcknowledgementProcessor {
    tx: Sender<AckCommand>,
    task: Option<JoinHandle<()>>,
}

impl AcknowledgementProcessor {
    /// Spawns the processor task for one container.
    pub(crate) fn start(
        queue: String,
        queue_url: String,
        config: AcknowledgementConfig,
        client: Arc<dyn QueueClient>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let task = tokio::spawn(run_processor(
            queue, queue_url, config, client, metrics, rx,
        ));
        AcknowledgementProcessor {
            tx,
            task: Some(task),
        }
    }

    /// Channel used by the container and by manual-ack handles.
    pub(crate) fn sender(&self) -> Sender<AckCommand> {
        self.tx.clone()
    }

    /// Requests an immediate flush of everything flushable.
    pub(crate) fn request_flush(&self) {
        if let Err(e) = self.tx.send(AckCommand::Flush) {
            debug!(error = %e, "ack processor is gone, flush request dropped");
        }
    }

    /// Final flush and task teardown.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.tx.send(AckCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("ack processor did not drain within 5s");
            }
        }
    }
}

async fn run_processor(
    queue: String,
    queue_url: String,
    config: AcknowledgementConfig,
    client: Arc<dyn QueueClient>,
    metrics: Arc<dyn MetricsCollector>,
    rx: Receiver<AckCommand>,
) {
    let window = Duration::from_millis(config.batch_window_ms);
    let mut buffer = OrderingBuffer::new(config.ordering);
    let mut deadline: Option<Instant> = None;

    debug!(queue = queue, "ack processor started");

    loop {
        let command = match deadline {
            Some(at) => match timeout_at(at, rx.recv_async()).await {
                Ok(Ok(command)) => Some(command),
                Ok(Err(_)) => break,
                Err(_) => {
                    // window expired
                    flush(&queue, &queue_url, &client, &metrics, buffer.take_ready()).await;
                    deadline = None;
                    continue;
                }
            },
            None => match rx.recv_async().await {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(AckCommand::Register { seq, group }) => buffer.register(seq, group),
            Some(AckCommand::Complete { seq, record }) => {
                trace!(queue = queue, seq = seq, "completion received");
                buffer.complete(seq, record);
            }
            Some(AckCommand::Flush) => {
                flush(&queue, &queue_url, &client, &metrics, buffer.take_ready()).await;
                deadline = None;
                continue;
            }
            Some(AckCommand::Shutdown) => break,
            None => {}
        }

        if buffer.ready_len() >= config.batch_size {
            flush(&queue, &queue_url, &client, &metrics, buffer.take_ready()).await;
            deadline = None;
        } else if buffer.ready_len() > 0 && deadline.is_none() {
            deadline = Some(Instant::now() + window);
        }
    }

    // Drain whatever is still queued, then flush one final time. Ordered
    // completions that never arrived stay unflushed; the service will
    // redeliver them.
    while let Ok(command) = rx.try_recv() {
        match command {
            AckCommand::Register { seq, group } => buffer.register(seq, group),
            AckCommand::Complete { seq, record } => buffer.complete(seq, record),
            AckCommand::Flush | AckCommand::Shutdown => {}
        }
    }
    flush(&queue, &queue_url, &client, &metrics, buffer.take_ready()).await;
    debug!(queue = queue, "ack processor stopped");
}

async fn flush(
    queue: &str,
    queue_url: &str,
    client: &Arc<dyn QueueClient>,
    metrics: &Arc<dyn MetricsCollector>,
    records: Vec<AckRecord>,
) {
    if records.is_empty() {
        return;
    }

    // Service calls carry at most 10 entries.
    for chunk in records.chunks(10) {
        flush_chunk(queue, queue_url, client, metrics, chunk).await;
    }
}

async fn flush_chunk(
    queue: &str,
    queue_url: &str,
    client: &Arc<dyn QueueClient>,
    metrics: &Arc<dyn MetricsCollector>,
    records: &[AckRecord],
) {
    let entries: Vec<DeleteEntry> = records
        .iter()
        .map(|r| DeleteEntry {
            id: r.message_id.clone(),
            receipt_handle: r.receipt_handle.clone(),
        })
        .collect();

    let mut backoff = Backoff::new();
    let mut attempts = 0;
    let results = loop {
        attempts += 1;
        match client.delete_batch(queue_url, &entries).await {
            Ok(results) => break results,
            Err(e) if e.is_retryable() && attempts < 3 => {
                warn!(queue = queue, error = %e, "delete batch failed, retrying");
                backoff.sleep().await;
            }
            Err(e) => {
                error!(queue = queue, error = %e, "delete batch failed");
                for record in records {
                    metrics.record(&MetricEvent::AckFailed {
                        queue: queue.to_string(),
                        message_id: record.message_id.clone(),
                    });
                }
                return;
            }
        }
    };

    if !results.successful.is_empty() {
        metrics.record(&MetricEvent::AckFlushed {
            queue: queue.to_string(),
            count: results.successful.len(),
        });
    }

    // Per-entry failures are retried individually; persistent failures are
    // dropped and the message redelivers.
    for failure in results.failed {
        let Some(record) = records.iter().find(|r| r.message_id == failure.id) else {
            continue;
        };
        if retry_entry(queue, queue_url, client, record).await {
            metrics.record(&MetricEvent::AckFlushed {
                queue: queue.to_string(),
                count: 1,
            });
        } else {
            error!(
                queue = queue,
                message_id = record.message_id,
                code = failure.code,
                "acknowledgement dropped after retries"
            );
            metrics.record(&MetricEvent::AckFailed {
                queue: queue.to_string(),
                message_id: record.message_id.clone(),
            });
        }
    }
}

async fn retry_entry(
    queue: &str,
    queue_url: &str,
    client: &Arc<dyn QueueClient>,
    record: &AckRecord,
) -> bool {
    let entry = [DeleteEntry {
        id: record.message_id.clone(),
        receipt_handle: record.receipt_handle.clone(),
    }];
    let mut backoff = Backoff::new();
    for _ in 0..3 {
        backoff.sleep().await;
        match client.delete_batch(queue_url, &entry).await {
            Ok(results) if results.failed.is_empty() => return true,
            Ok(_) => {}
            Err(e) => {
                warn!(queue = queue, message_id = record.message_id, error = %e, "ack retry failed");
                if !e.is_retryable() {
                    return false;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(id: &str) -> Option<AckRecord> {
        Some(AckRecord {
            receipt_handle: format!("rh-{id}"),
            message_id: id.to_string(),
        })
    }

    fn ready_ids(buffer: &mut OrderingBuffer) -> Vec<String> {
        buffer
            .take_ready()
            .into_iter()
            .map(|r| r.message_id)
            .collect()
    }

    #[test]
    fn unordered_ignores_receive_order() {
        let mut buffer = OrderingBuffer::new(AcknowledgementOrdering::Unordered);
        buffer.register(0, None);
        buffer.register(1, None);
        buffer.complete(1, record("b"));
        buffer.complete(0, record("a"));
        assert_eq!(ready_ids(&mut buffer), vec!["b", "a"]);
    }

    #[test]
    fn ordered_flushes_only_the_contiguous_prefix() {
        let mut buffer = OrderingBuffer::new(AcknowledgementOrdering::Ordered);
        for seq in 0..4 {
            buffer.register(seq, None);
        }
        buffer.complete(2, record("c"));
        assert_eq!(buffer.ready_len(), 0);
        buffer.complete(0, record("a"));
        assert_eq!(ready_ids(&mut buffer), vec!["a"]);
        buffer.complete(1, record("b"));
        assert_eq!(ready_ids(&mut buffer), vec!["b", "c"]);
        buffer.complete(3, record("d"));
        assert_eq!(ready_ids(&mut buffer), vec!["d"]);
    }

    #[test]
    fn ordered_skip_advances_the_prefix_without_a_delete() {
        let mut buffer = OrderingBuffer::new(AcknowledgementOrdering::Ordered);
        for seq in 0..3 {
            buffer.register(seq, None);
        }
        buffer.complete(0, record("a"));
        buffer.complete(1, None);
        buffer.complete(2, record("c"));
        assert_eq!(ready_ids(&mut buffer), vec!["a", "c"]);
    }

    #[test]
    fn per_group_orders_within_each_group_only() {
        let mut buffer = OrderingBuffer::new(AcknowledgementOrdering::PerGroup);
        buffer.register(0, Some("g1".into()));
        buffer.register(1, Some("g2".into()));
        buffer.register(2, Some("g1".into()));

        // g1's second message completes first; held back
        buffer.complete(2, record("g1-b"));
        assert_eq!(buffer.ready_len(), 0);

        buffer.complete(1, record("g2-a"));
        assert_eq!(ready_ids(&mut buffer), vec!["g2-a"]);

        buffer.complete(0, record("g1-a"));
        assert_eq!(ready_ids(&mut buffer), vec!["g1-a", "g1-b"]);
    }

    #[test]
    fn per_group_ungrouped_messages_are_unordered() {
        let mut buffer = OrderingBuffer::new(AcknowledgementOrdering::PerGroup);
        buffer.register(0, None);
        buffer.complete(0, record("solo"));
        assert_eq!(ready_ids(&mut buffer), vec!["solo"]);
    }
}
