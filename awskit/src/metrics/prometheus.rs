//! Prometheus collector backed by the `metrics` facade.
//!
//! Counters are registered under the `awskit_` prefix and exposed through
//! `metrics-exporter-prometheus`, installed once per process.
use std::sync::Once;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, warn};

use super::{MetricEvent, MetricsCollector};

static PROMETHEUS_INIT: Once = Once::new();

/// Collector exposing counters on a Prometheus scrape endpoint.
#[derive(Debug, Default)]
pub struct PrometheusMetrics {
    _private: (),
}

impl PrometheusMetrics {
    /// Creates the collector, installing the process-wide exporter on first
    /// use. A failed install is logged and recording continues without an
    /// exposed endpoint.
    pub fn new() -> Self {
        PROMETHEUS_INIT.call_once(|| match PrometheusBuilder::new().install() {
            Ok(()) => debug!("prometheus metrics exporter initialized"),
            Err(e) => warn!(
                error = %e,
                "failed to initialize prometheus exporter, metrics will be recorded but not exposed"
            ),
        });
        PrometheusMetrics { _private: () }
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn record(&self, event: &MetricEvent) {
        match event {
            MetricEvent::MessageReceived { queue } => {
                counter!("awskit_messages_received_total", "queue" => queue.clone()).increment(1);
            }
            MetricEvent::MessageProcessed { queue, duration_ms } => {
                counter!("awskit_messages_processed_total", "queue" => queue.clone()).increment(1);
                counter!("awskit_processing_milliseconds_total", "queue" => queue.clone())
                    .increment(*duration_ms);
            }
            MetricEvent::MessageFailed { queue, error_kind } => {
                counter!(
                    "awskit_messages_failed_total",
                    "queue" => queue.clone(),
                    "error_kind" => *error_kind
                )
                .increment(1);
            }
            MetricEvent::AckFlushed { queue, count } => {
                counter!("awskit_acks_flushed_total", "queue" => queue.clone())
                    .increment(*count as u64);
            }
            MetricEvent::AckFailed { queue, .. } => {
                counter!("awskit_acks_failed_total", "queue" => queue.clone()).increment(1);
            }
            MetricEvent::ContainerStarted { queue } => {
                counter!("awskit_containers_started_total", "queue" => queue.clone()).increment(1);
            }
            MetricEvent::ContainerStopped { queue } => {
                counter!("awskit_containers_stopped_total", "queue" => queue.clone()).increment(1);
            }
            MetricEvent::BackpressureWaited { queue, duration_ms } => {
                counter!("awskit_backpressure_wait_milliseconds_total", "queue" => queue.clone())
                    .increment(*duration_ms);
            }
            MetricEvent::VisibilityExtended { queue, count } => {
                counter!("awskit_visibility_extended_total", "queue" => queue.clone())
                    .increment(*count as u64);
            }
        }
    }
}
