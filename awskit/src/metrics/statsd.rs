//! StatsD collector emitting plain-protocol lines over UDP.
use std::net::UdpSocket;

use tracing::{debug, warn};

use super::{MetricEvent, MetricsCollector};
use crate::Error;

/// Collector sending `name:value|type` lines to a StatsD daemon.
///
/// Sends are connectionless and fire-and-forget; transmission failures are
/// logged at debug level and never surface to the runtime.
#[derive(Debug)]
pub struct StatsdMetrics {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdMetrics {
    /// Binds a local UDP socket aimed at `addr` (e.g. `"127.0.0.1:8125"`).
    pub fn new(addr: &str) -> Result<Self, Error> {
        Self::with_prefix(addr, "awskit")
    }

    /// Like [`StatsdMetrics::new`] with a custom metric prefix.
    pub fn with_prefix(addr: &str, prefix: &str) -> Result<Self, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| Error::Configuration(format!("statsd socket bind failed: {e}")))?;
        socket
            .connect(addr)
            .map_err(|e| Error::Configuration(format!("statsd address {addr} is invalid: {e}")))?;
        if let Err(e) = socket.set_nonblocking(true) {
            warn!(error = %e, "statsd socket could not be set non-blocking");
        }
        Ok(StatsdMetrics {
            socket,
            prefix: prefix.to_string(),
        })
    }

    fn emit(&self, queue: &str, name: &str, value: u64, unit: &str) {
        let line = format!(
            "{}.{}.{}:{}|{}",
            self.prefix,
            sanitize(queue),
            name,
            value,
            unit
        );
        if let Err(e) = self.socket.send(line.as_bytes()) {
            debug!(error = %e, metric = name, "failed to emit statsd line");
        }
    }
}

/// StatsD path segments cannot contain `:`, `|` or whitespace.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '|' | '@' | '/' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

impl MetricsCollector for StatsdMetrics {
    fn record(&self, event: &MetricEvent) {
        match event {
            MetricEvent::MessageReceived { queue } => {
                self.emit(queue, "messages_received", 1, "c");
            }
            MetricEvent::MessageProcessed { queue, duration_ms } => {
                self.emit(queue, "messages_processed", 1, "c");
                self.emit(queue, "processing_time", *duration_ms, "ms");
            }
            MetricEvent::MessageFailed { queue, .. } => {
                self.emit(queue, "messages_failed", 1, "c");
            }
            MetricEvent::AckFlushed { queue, count } => {
                self.emit(queue, "acks_flushed", *count as u64, "c");
            }
            MetricEvent::AckFailed { queue, .. } => {
                self.emit(queue, "acks_failed", 1, "c");
            }
            MetricEvent::ContainerStarted { queue } => {
                self.emit(queue, "containers_started", 1, "c");
            }
            MetricEvent::ContainerStopped { queue } => {
                self.emit(queue, "containers_stopped", 1, "c");
            }
            MetricEvent::BackpressureWaited { queue, duration_ms } => {
                self.emit(queue, "backpressure_wait", *duration_ms, "ms");
            }
            MetricEvent::VisibilityExtended { queue, count } => {
                self.emit(queue, "visibility_extended", *count as u64, "c");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize("orders.fifo"), "orders.fifo");
        assert_eq!(sanitize("a:b|c d/e"), "a_b_c_d_e");
    }

    #[test]
    fn records_to_a_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = StatsdMetrics::new(&addr.to_string()).unwrap();
        metrics.record(&MetricEvent::MessageReceived {
            queue: "orders-queue".into(),
        });

        let mut buf = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        let line = std::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(line, "awskit.orders-queue.messages_received:1|c");
    }
}
