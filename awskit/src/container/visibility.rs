//! Periodic visibility-timeout extension for in-flight messages.
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::{lock_inflight, Control, InFlightMap};
use crate::client::{QueueClient, VisibilityEntry};
use crate::config::VisibilityExtensionConfig;
use crate::metrics::{MetricEvent, MetricsCollector};

/// One timer per container. Every `interval_seconds` it batches a
/// visibility change for every in-flight handle whose age since receive has
/// reached the interval. Extension failures are logged, never fatal; an
/// unextendable handle simply redelivers.
///
/// Consulting the live in-flight map at each tick means extensions are only
/// ever issued for messages still in flight and not yet acknowledged.
pub(crate) async fn run_extension_timer(
    queue: String,
    queue_url: String,
    config: VisibilityExtensionConfig,
    client: Arc<dyn QueueClient>,
    metrics: Arc<dyn MetricsCollector>,
    inflight: InFlightMap,
    mut control: watch::Receiver<Control>,
) {
    let period = Duration::from_secs(config.interval_seconds);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    let _ = ticker.tick().await;

    debug!(queue = queue, "visibility extension timer started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = control.changed() => {
                if changed.is_err() || *control.borrow() == Control::Stop {
                    debug!(queue = queue, "visibility extension timer stopped");
                    return;
                }
                // pausing does not suspend extension; in-flight work continues
                continue;
            }
        }

        let due: Vec<VisibilityEntry> = {
            let inflight = lock_inflight(&inflight);
            inflight
                .values()
                .filter(|entry| entry.received_at.elapsed() >= period)
                .map(|entry| VisibilityEntry {
                    id: entry.message_id.clone(),
                    receipt_handle: entry.receipt_handle.clone(),
                    visibility_timeout: config.extension_seconds,
                })
                .collect()
        };

        if due.is_empty() {
            trace!(queue = queue, "no in-flight messages due for extension");
            continue;
        }

        for chunk in due.chunks(10) {
            match client.change_visibility_batch(&queue_url, chunk).await {
                Ok(results) => {
                    if !results.successful.is_empty() {
                        metrics.record(&MetricEvent::VisibilityExtended {
                            queue: queue.clone(),
                            count: results.successful.len(),
                        });
                    }
                    for failure in results.failed {
                        warn!(
                            queue = queue,
                            message_id = failure.id,
                            code = failure.code,
                            "visibility extension rejected, message may redeliver"
                        );
                    }
                }
                Err(e) => {
                    warn!(queue = queue, error = %e, "visibility extension call failed");
                }
            }
        }
    }
}
