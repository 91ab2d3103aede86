//! Monitoring callbacks for containers, processors and templates.
//!
//! The runtime reports fire-and-forget [`MetricEvent`]s to a single
//! [`MetricsCollector`]; plurality of backends is a composite collector that
//! fans out. Callbacks are always invoked outside internal locks and must be
//! fast and non-blocking.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "prometheus")]
pub mod prometheus;
#[cfg(feature = "statsd")]
pub mod statsd;

/// A single observability event emitted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// A raw message arrived from the queue.
    MessageReceived {
        /// Source queue.
        queue: String,
    },
    /// A handler finished successfully.
    MessageProcessed {
        /// Source queue.
        queue: String,
        /// Wall-clock handler duration.
        duration_ms: u64,
    },
    /// A handler failed or a message could not be converted.
    MessageFailed {
        /// Source queue.
        queue: String,
        /// Stable error category, e.g. `listener_error`.
        error_kind: &'static str,
    },
    /// A delete batch was issued.
    AckFlushed {
        /// Source queue.
        queue: String,
        /// Receipt handles deleted.
        count: usize,
    },
    /// A delete entry failed after exhausting retries; the message will be
    /// redelivered.
    AckFailed {
        /// Source queue.
        queue: String,
        /// Message whose delete failed.
        message_id: String,
    },
    /// A listener container reached RUNNING.
    ContainerStarted {
        /// Source queue.
        queue: String,
    },
    /// A listener container reached STOPPED.
    ContainerStopped {
        /// Source queue.
        queue: String,
    },
    /// The poller waited for in-flight capacity.
    BackpressureWaited {
        /// Source queue.
        queue: String,
        /// Time spent waiting.
        duration_ms: u64,
    },
    /// Visibility timeouts were extended for in-flight messages.
    VisibilityExtended {
        /// Source queue.
        queue: String,
        /// Handles extended.
        count: usize,
    },
}

/// Receiver of runtime observability events.
pub trait MetricsCollector: Send + Sync {
    /// Records one event. Must not block.
    fn record(&self, event: &MetricEvent);
}

/// Collector that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl NoOpMetrics {
    /// Creates a new no-op collector.
    pub fn new() -> Self {
        Self
    }
}

impl MetricsCollector for NoOpMetrics {
    fn record(&self, _event: &MetricEvent) {}
}

/// Aggregate counters captured by [`InMemoryMetrics::counts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricCounts {
    /// Messages received.
    pub messages_received: u64,
    /// Handlers that completed successfully.
    pub messages_processed: u64,
    /// Handler and conversion failures.
    pub messages_failed: u64,
    /// Receipt handles deleted.
    pub acks_flushed: u64,
    /// Deletes that failed permanently.
    pub ack_failures: u64,
    /// Containers started.
    pub containers_started: u64,
    /// Containers stopped.
    pub containers_stopped: u64,
    /// Times the poller waited on backpressure.
    pub backpressure_waits: u64,
    /// Receipt handles whose visibility was extended.
    pub visibility_extensions: u64,
}

/// Collector backed by process-local atomic counters; the default choice in
/// tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    messages_failed: AtomicU64,
    acks_flushed: AtomicU64,
    ack_failures: AtomicU64,
    containers_started: AtomicU64,
    containers_stopped: AtomicU64,
    backpressure_waits: AtomicU64,
    visibility_extensions: AtomicU64,
}

impl InMemoryMetrics {
    /// Creates a collector with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters.
    pub fn counts(&self) -> MetricCounts {
        MetricCounts {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            acks_flushed: self.acks_flushed.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            containers_started: self.containers_started.load(Ordering::Relaxed),
            containers_stopped: self.containers_stopped.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            visibility_extensions: self.visibility_extensions.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_processed.store(0, Ordering::Relaxed);
        self.messages_failed.store(0, Ordering::Relaxed);
        self.acks_flushed.store(0, Ordering::Relaxed);
        self.ack_failures.store(0, Ordering::Relaxed);
        self.containers_started.store(0, Ordering::Relaxed);
        self.containers_stopped.store(0, Ordering::Relaxed);
        self.backpressure_waits.store(0, Ordering::Relaxed);
        self.visibility_extensions.store(0, Ordering::Relaxed);
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record(&self, event: &MetricEvent) {
        match event {
            MetricEvent::MessageReceived { .. } => {
                let _ = self.messages_received.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::MessageProcessed { .. } => {
                let _ = self.messages_processed.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::MessageFailed { .. } => {
                let _ = self.messages_failed.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::AckFlushed { count, .. } => {
                let _ = self.acks_flushed.fetch_add(*count as u64, Ordering::Relaxed);
            }
            MetricEvent::AckFailed { .. } => {
                let _ = self.ack_failures.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::ContainerStarted { .. } => {
                let _ = self.containers_started.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::ContainerStopped { .. } => {
                let _ = self.containers_stopped.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::BackpressureWaited { .. } => {
                let _ = self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::VisibilityExtended { count, .. } => {
                let _ = self
                    .visibility_extensions
                    .fetch_add(*count as u64, Ordering::Relaxed);
            }
        }
    }
}

/// Collector that forwards every event to a user closure.
pub struct CallbackMetrics {
    callback: Box<dyn Fn(&MetricEvent) + Send + Sync>,
}

impl CallbackMetrics {
    /// Wraps a closure as a collector.
    pub fn new(callback: impl Fn(&MetricEvent) + Send + Sync + 'static) -> Self {
        CallbackMetrics {
            callback: Box::new(callback),
        }
    }
}

impl MetricsCollector for CallbackMetrics {
    fn record(&self, event: &MetricEvent) {
        (self.callback)(event);
    }
}

/// Collector that fans each event out to several others.
#[derive(Default)]
pub struct CompositeMetrics {
    collectors: Vec<Arc<dyn MetricsCollector>>,
}

impl CompositeMetrics {
    /// Creates an empty composite.
    pub fn new(collectors: Vec<Arc<dyn MetricsCollector>>) -> Self {
        CompositeMetrics { collectors }
    }
}

impl MetricsCollector for CompositeMetrics {
    fn record(&self, event: &MetricEvent) {
        for collector in &self.collectors {
            collector.record(event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_memory_counts_by_event_kind() {
        let metrics = InMemoryMetrics::new();
        metrics.record(&MetricEvent::MessageReceived {
            queue: "q".into(),
        });
        metrics.record(&MetricEvent::MessageProcessed {
            queue: "q".into(),
            duration_ms: 12,
        });
        metrics.record(&MetricEvent::AckFlushed {
            queue: "q".into(),
            count: 3,
        });
        let counts = metrics.counts();
        assert_eq!(counts.messages_received, 1);
        assert_eq!(counts.messages_processed, 1);
        assert_eq!(counts.acks_flushed, 3);

        metrics.reset();
        assert_eq!(metrics.counts(), MetricCounts::default());
    }

    #[test]
    fn composite_fans_out() {
        let a = Arc::new(InMemoryMetrics::new());
        let b = Arc::new(InMemoryMetrics::new());
        let composite = CompositeMetrics::new(vec![a.clone(), b.clone()]);
        composite.record(&MetricEvent::ContainerStarted {
            queue: "q".into(),
        });
        assert_eq!(a.counts().containers_started, 1);
        assert_eq!(b.counts().containers_started, 1);
    }

    #[test]
    fn callback_receives_events() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_cb = seen.clone();
        let metrics = CallbackMetrics::new(move |_| {
            let _ = seen_in_cb.fetch_add(1, Ordering::Relaxed);
        });
        metrics.record(&MetricEvent::AckFailed {
            queue: "q".into(),
            message_id: "m-1".into(),
        });
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
