//! Per-listener message container: polling, dispatch, visibility extension
//! and acknowledgement routing under one lifecycle.
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::Sender;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::ack::{AckCommand, AckRecord, AcknowledgementProcessor};
use crate::backpressure::BackpressureManager;
use crate::client::{
    Backoff, ErrorKind, QueueClient, RawMessage, ReceiveOptions, VisibilityEntry,
};
use crate::config::{
    AcknowledgementMode, ContainerConfig, OnErrorPolicy, QueueNotFoundStrategy, SqsConfig,
};
use crate::convert::MessageConverter;
use crate::message::{AckSink, MessageHead};
use crate::metrics::{MetricEvent, MetricsCollector};
use crate::registry::{HandlerFuture, MessageAdapter, RegisteredListener};
use crate::Error;

mod visibility;

/// Lifecycle states of a [`MessageListenerContainer`].
///
/// Transitions are monotonic except for the pause/resume cycle;
/// [`ContainerState::Stopped`] is terminal. A stopped container is not
/// restartable; create a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Built, not yet started.
    Created,
    /// Resolving the queue URL and validating configuration.
    Starting,
    /// Polling and dispatching.
    Running,
    /// Pause requested; poller winding down.
    Pausing,
    /// Polling suspended; in-flight work continues.
    Paused,
    /// Resume requested.
    Resuming,
    /// Draining in-flight work.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ContainerState::Created => "CREATED",
            ContainerState::Starting => "STARTING",
            ContainerState::Running => "RUNNING",
            ContainerState::Pausing => "PAUSING",
            ContainerState::Paused => "PAUSED",
            ContainerState::Resuming => "RESUMING",
            ContainerState::Stopping => "STOPPING",
            ContainerState::Stopped => "STOPPED",
        };
        write!(f, "{name}")
    }
}

/// Why a container reached [`ContainerState::Stopped`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StopReason {
    /// Ordinary shutdown through `stop`.
    #[default]
    Clean,
    /// Shutdown initiated by an OS signal.
    Signal,
    /// Invalid configuration discovered at startup.
    ConfigurationError(String),
    /// Unrecoverable service failure (auth, permissions, missing queue).
    FatalServiceError(String),
}

impl StopReason {
    /// Process exit code for this reason.
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::Clean => 0,
            StopReason::ConfigurationError(_) => 1,
            StopReason::FatalServiceError(_) => 2,
            StopReason::Signal => 130,
        }
    }

    /// Relative severity; higher wins during aggregation.
    pub fn severity(&self) -> u8 {
        match self {
            StopReason::Clean => 0,
            StopReason::Signal => 1,
            StopReason::ConfigurationError(_) => 2,
            StopReason::FatalServiceError(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Stop,
}

pub(crate) struct InFlightEntry {
    pub receipt_handle: String,
    pub message_id: String,
    pub received_at: Instant,
    abort: Option<AbortHandle>,
}

pub(crate) type InFlightMap = Arc<Mutex<HashMap<u64, InFlightEntry>>>;

fn lock_inflight(map: &InFlightMap) -> MutexGuard<'_, HashMap<u64, InFlightEntry>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

const ACTION_PENDING: u8 = 0;
const ACTION_TAKEN: u8 = 1;

/// Shared completion state for one dispatched message.
///
/// Exactly one ack/nack action is routed per message, whether it comes from
/// the worker (automatic modes), from [`crate::Message::acknowledge`]
/// (manual modes), or from the drop of the last handle (skip). Completion
/// removes the in-flight entry, informs the ack processor and releases
/// backpressure, in that order, so a later message of the same FIFO group
/// cannot be dispatched before this one's routing is decided.
struct CompletionCtx {
    seq: u64,
    group: Option<String>,
    record: AckRecord,
    ack_tx: Sender<AckCommand>,
    backpressure: Arc<BackpressureManager>,
    inflight: InFlightMap,
    action: AtomicU8,
}

impl CompletionCtx {
    fn complete(&self, delete: bool) -> bool {
        if self
            .action
            .compare_exchange(ACTION_PENDING, ACTION_TAKEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let _ = lock_inflight(&self.inflight).remove(&self.seq);
        if let Err(e) = self.ack_tx.send(AckCommand::Complete {
            seq: self.seq,
            record: delete.then(|| self.record.clone()),
        }) {
            debug!(error = %e, "ack processor is gone, completion dropped");
        }
        if let Some(group) = &self.group {
            self.backpressure.release_group(group);
        }
        self.backpressure.release(1);
        true
    }

    fn is_pending(&self) -> bool {
        self.action.load(Ordering::SeqCst) == ACTION_PENDING
    }
}

impl AckSink for CompletionCtx {
    fn ack(&self) -> Result<(), Error> {
        if self.complete(true) {
            Ok(())
        } else {
            Err(Error::Listener(format!(
                "message {} was already acknowledged or rejected",
                self.record.message_id
            )))
        }
    }

    fn nack(&self) -> Result<(), Error> {
        if self.complete(false) {
            Ok(())
        } else {
            Err(Error::Listener(format!(
                "message {} was already acknowledged or rejected",
                self.record.message_id
            )))
        }
    }
}

impl Drop for CompletionCtx {
    fn drop(&mut self) {
        // A message that never had its routing decided (cancelled worker,
        // NEVER mode without a manual ack) resolves as a skip so ordered
        // prefixes keep moving; the service will redeliver it.
        let _ = self.complete(false);
    }
}

/// Owns the lifecycle of one listener: one queue, one handler.
///
/// Coordinates the long-poll receive loop, a bounded worker pool with
/// backpressure, visibility-timeout extension and acknowledgement routing.
pub struct MessageListenerContainer {
    key: String,
    config: ContainerConfig,
    adapter: MessageAdapter,
    client: Arc<dyn QueueClient>,
    converter: Arc<dyn MessageConverter>,
    metrics: Arc<dyn MetricsCollector>,
    backpressure: Arc<BackpressureManager>,
    inflight: InFlightMap,
    state_tx: watch::Sender<ContainerState>,
    state_rx: watch::Receiver<ContainerState>,
    control_tx: watch::Sender<Control>,
    control_rx: watch::Receiver<Control>,
    queue_url: Mutex<Option<String>>,
    ack: Mutex<Option<AcknowledgementProcessor>>,
    ack_tx: Mutex<Option<Sender<AckCommand>>>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    visibility_task: Mutex<Option<JoinHandle<()>>>,
    stop_reason: Mutex<Option<StopReason>>,
    stop_timeout_override: Mutex<Option<Duration>>,
}

impl MessageListenerContainer {
    /// Builds a container from a finalised config and a type-bound adapter.
    pub(crate) fn new(
        key: String,
        config: ContainerConfig,
        adapter: MessageAdapter,
        client: Arc<dyn QueueClient>,
        converter: Arc<dyn MessageConverter>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let backpressure = Arc::new(BackpressureManager::new(
            config.max_concurrent_messages,
            config.backpressure_mode,
            config.fifo_group_strategy,
        ));
        let (state_tx, state_rx) = watch::channel(ContainerState::Created);
        let (control_tx, control_rx) = watch::channel(Control::Run);
        MessageListenerContainer {
            key,
            config,
            adapter,
            client,
            converter,
            metrics,
            backpressure,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            state_tx,
            state_rx,
            control_tx,
            control_rx,
            queue_url: Mutex::new(None),
            ack: Mutex::new(None),
            ack_tx: Mutex::new(None),
            run_task: Mutex::new(None),
            visibility_task: Mutex::new(None),
            stop_reason: Mutex::new(None),
            stop_timeout_override: Mutex::new(None),
        }
    }

    /// Builds a container for a registry entry, resolving its options
    /// against process-wide defaults.
    pub fn from_listener(
        listener: &RegisteredListener,
        defaults: &SqsConfig,
        client: Arc<dyn QueueClient>,
        converter: Arc<dyn MessageConverter>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self, Error> {
        let config = listener.config().resolve(defaults)?;
        Ok(Self::new(
            listener.key().to_string(),
            config,
            listener.adapter.clone(),
            client,
            converter,
            metrics,
        ))
    }

    /// Handler key this container serves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Queue name or URL this container consumes.
    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        *self.state_rx.borrow()
    }

    /// Current number of in-flight messages.
    pub fn in_flight(&self) -> usize {
        self.backpressure.in_flight()
    }

    /// Why the container stopped; [`StopReason::Clean`] while running.
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    fn record_stop_reason(&self, reason: StopReason) {
        let mut slot = self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some(existing) if existing.severity() >= reason.severity() => {}
            _ => *slot = Some(reason),
        }
    }

    fn transition(&self, to: ContainerState) -> Result<(), Error> {
        use ContainerState as S;
        let mut result = Ok(());
        let _ = self.state_tx.send_if_modified(|current| {
            let valid = matches!(
                (*current, to),
                (S::Created, S::Starting)
                    | (S::Created, S::Stopped)
                    | (S::Starting, S::Running)
                    | (S::Starting, S::Stopping)
                    | (S::Starting, S::Stopped)
                    | (S::Running, S::Pausing)
                    | (S::Running, S::Stopping)
                    | (S::Pausing, S::Paused)
                    | (S::Pausing, S::Stopping)
                    | (S::Paused, S::Resuming)
                    | (S::Paused, S::Stopping)
                    | (S::Resuming, S::Running)
                    | (S::Resuming, S::Stopping)
                    | (S::Stopping, S::Stopped)
            );
            if valid {
                trace!(key = self.key, from = %current, to = %to, "state transition");
                *current = to;
            } else {
                result = Err(Error::Configuration(format!(
                    "invalid container state transition {current} -> {to}"
                )));
            }
            valid
        });
        result
    }

    fn enter_stopping(&self) {
        use ContainerState as S;
        let current = self.state();
        if current == S::Stopping || current == S::Stopped {
            return;
        }
        if self.transition(S::Stopping).is_err() {
            // Pausing/Resuming race; both accept Stopping next.
            let _ = self.transition(S::Stopping);
        }
    }

    /// Starts the container: resolves the queue URL, validates config and
    /// launches the poller, acknowledgement processor and visibility timer.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.transition(ContainerState::Starting)?;

        let queue_url = match self.resolve_queue_url().await {
            Ok(url) => url,
            Err(e) => {
                let reason = match &e {
                    Error::QueueNotFound(_) | Error::Configuration(_) => {
                        StopReason::ConfigurationError(format!("{e}"))
                    }
                    other => StopReason::FatalServiceError(format!("{other}")),
                };
                self.record_stop_reason(reason);
                let _ = self.transition(ContainerState::Stopped);
                return Err(e);
            }
        };
        debug!(key = self.key, queue = self.config.queue, url = queue_url, "queue resolved");
        *self.queue_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue_url.clone());

        let ack = AcknowledgementProcessor::start(
            self.config.queue.clone(),
            queue_url.clone(),
            self.config.acknowledgement.clone(),
            self.client.clone(),
            self.metrics.clone(),
        );
        *self.ack_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(ack.sender());
        *self.ack.lock().unwrap_or_else(PoisonError::into_inner) = Some(ack);

        if self.config.visibility_extension.enabled {
            let task = tokio::spawn(visibility::run_extension_timer(
                self.config.queue.clone(),
                queue_url.clone(),
                self.config.visibility_extension.clone(),
                self.client.clone(),
                self.metrics.clone(),
                self.inflight.clone(),
                self.control_rx.clone(),
            ));
            *self
                .visibility_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(task);
        }

        let container = self.clone();
        let run_task = tokio::spawn(async move { container.run(queue_url).await });
        *self.run_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(run_task);

        self.transition(ContainerState::Running)?;
        info!(key = self.key, queue = self.config.queue, "listener container started");
        self.metrics.record(&MetricEvent::ContainerStarted {
            queue: self.config.queue.clone(),
        });
        Ok(())
    }

    /// Suspends polling; in-flight handlers keep running.
    pub fn pause(&self) {
        let _ = self.control_tx.send(Control::Pause);
    }

    /// Resumes polling after [`MessageListenerContainer::pause`].
    pub fn resume(&self) {
        let _ = self.control_tx.send(Control::Run);
    }

    /// Stops the container with the configured shutdown timeout.
    pub async fn stop(&self) {
        self.stop_with_timeout(self.config.shutdown_timeout).await;
    }

    /// Stops the container, allowing in-flight handlers up to `drain` to
    /// finish before they are cancelled.
    pub async fn stop_with_timeout(&self, drain: Duration) {
        if self.state() == ContainerState::Created {
            let _ = self.transition(ContainerState::Stopped);
            return;
        }
        *self
            .stop_timeout_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(drain);
        let _ = self.control_tx.send(Control::Stop);
        let _ = self.wait_stopped().await;
    }

    /// Waits until the container reaches [`ContainerState::Stopped`] and
    /// returns the stop reason.
    pub async fn wait_stopped(&self) -> StopReason {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == ContainerState::Stopped {
                return self.stop_reason();
            }
            if rx.changed().await.is_err() {
                return self.stop_reason();
            }
        }
    }

    async fn resolve_queue_url(&self) -> Result<String, Error> {
        let queue = &self.config.queue;
        if queue.contains("://") {
            return Ok(queue.clone());
        }

        let mut backoff = Backoff::new();
        let mut transient_attempts = 0u32;
        loop {
            match self.client.get_queue_url(queue).await {
                Ok(url) => return Ok(url),
                Err(e) => match e.kind {
                    ErrorKind::QueueNotFound => match self.config.queue_not_found_strategy {
                        QueueNotFoundStrategy::FailFast => {
                            return Err(Error::QueueNotFound(queue.clone()))
                        }
                        QueueNotFoundStrategy::Create => {
                            info!(queue = queue, "queue not found, creating");
                            return self.client.create_queue(queue).await.map_err(Error::from);
                        }
                        QueueNotFoundStrategy::Retry => {
                            warn!(queue = queue, "queue not found, retrying lookup");
                            backoff.sleep().await;
                        }
                    },
                    _ if e.is_retryable() => {
                        transient_attempts += 1;
                        if transient_attempts >= 5 {
                            return Err(e.into());
                        }
                        warn!(queue = queue, error = %e, "queue lookup failed, retrying");
                        backoff.sleep().await;
                    }
                    _ => return Err(e.into()),
                },
            }
        }
    }

    /// The poll/dispatch loop. Runs until stop is signalled or a fatal
    /// receive error occurs, then drains.
    async fn run(self: Arc<Self>, queue_url: String) {
        // Polling only begins once start() has finished the STARTING phase.
        let mut state_rx = self.state_rx.clone();
        while *state_rx.borrow_and_update() == ContainerState::Starting {
            if state_rx.changed().await.is_err() {
                return;
            }
        }

        let mut control = self.control_rx.clone();
        let mut backoff = Backoff::new();
        let mut seq: u64 = 0;
        let ack_tx = match self
            .ack_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(tx) => tx,
            None => {
                error!(key = self.key, "container started without an ack processor");
                return;
            }
        };

        'poll: loop {
            let control_state = *control.borrow_and_update();
            match control_state {
                Control::Stop => break 'poll,
                Control::Pause => {
                    if self.transition(ContainerState::Pausing).is_ok() {
                        let _ = self.transition(ContainerState::Paused);
                        info!(key = self.key, "listener container paused");
                    }
                    if control.changed().await.is_err() {
                        break 'poll;
                    }
                    let next = *control.borrow();
                    if next == Control::Run && self.transition(ContainerState::Resuming).is_ok() {
                        let _ = self.transition(ContainerState::Running);
                        info!(key = self.key, "listener container resumed");
                    }
                    continue 'poll;
                }
                Control::Run => {}
            }

            // Permits first; a zero grant suspends here until completions
            // release capacity.
            let want = self.config.poll_max_messages.max(1) as usize;
            let wait_start = Instant::now();
            let granted = tokio::select! {
                biased;
                _ = control.changed() => continue 'poll,
                granted = self.backpressure.acquire(want) => granted,
            };
            let waited = wait_start.elapsed();
            if waited >= Duration::from_millis(1) {
                self.metrics.record(&MetricEvent::BackpressureWaited {
                    queue: self.config.queue.clone(),
                    duration_ms: waited.as_millis() as u64,
                });
            }

            let options = ReceiveOptions {
                max_messages: granted as i32,
                wait_time_seconds: self.config.poll_wait_time_seconds,
                visibility_timeout: self.config.visibility_timeout_seconds,
            };
            let received = tokio::select! {
                biased;
                _ = control.changed() => {
                    self.backpressure.release(granted);
                    continue 'poll;
                }
                received = self.client.receive(&queue_url, &options) => received,
            };

            match received {
                Ok(messages) => {
                    backoff.reset();
                    trace!(key = self.key, count = messages.len(), "messages received");
                    if messages.len() < granted {
                        self.backpressure.release(granted - messages.len());
                    }

                    let mut busy: Vec<VisibilityEntry> = Vec::new();
                    for raw in messages {
                        // FIFO group gating happens before dispatch; busy
                        // groups go straight back to the queue.
                        if let Some(group) = raw.message_group_id.clone() {
                            if !self.backpressure.try_reserve_group(&group) {
                                busy.push(VisibilityEntry {
                                    id: raw.message_id.clone(),
                                    receipt_handle: raw.receipt_handle.clone(),
                                    visibility_timeout: 0,
                                });
                                self.backpressure.release(1);
                                continue;
                            }
                        }
                        self.dispatch(raw, seq, &ack_tx);
                        seq += 1;
                    }

                    if !busy.is_empty() {
                        self.redeliver_busy(&queue_url, busy).await;
                    }
                }
                Err(e) => {
                    self.backpressure.release(granted);
                    match e.kind {
                        ErrorKind::Throttling | ErrorKind::Transient => {
                            warn!(key = self.key, error = %e, "receive failed, backing off");
                            backoff.sleep().await;
                        }
                        ErrorKind::QueueNotFound | ErrorKind::Auth | ErrorKind::Fatal => {
                            error!(key = self.key, error = %e, "fatal receive error, stopping container");
                            self.record_stop_reason(StopReason::FatalServiceError(format!("{e}")));
                            break 'poll;
                        }
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Registers, converts and spawns the worker for one raw message.
    fn dispatch(self: &Arc<Self>, raw: RawMessage, seq: u64, ack_tx: &Sender<AckCommand>) {
        let group = raw.message_group_id.clone();
        if let Err(e) = ack_tx.send(AckCommand::Register {
            seq,
            group: group.clone(),
        }) {
            debug!(error = %e, "ack processor is gone, register dropped");
        }
        self.metrics.record(&MetricEvent::MessageReceived {
            queue: self.config.queue.clone(),
        });

        {
            let mut inflight = lock_inflight(&self.inflight);
            let _ = inflight.insert(
                seq,
                InFlightEntry {
                    receipt_handle: raw.receipt_handle.clone(),
                    message_id: raw.message_id.clone(),
                    received_at: Instant::now(),
                    abort: None,
                },
            );
        }

        let ctx = Arc::new(CompletionCtx {
            seq,
            group,
            record: AckRecord {
                receipt_handle: raw.receipt_handle.clone(),
                message_id: raw.message_id.clone(),
            },
            ack_tx: ack_tx.clone(),
            backpressure: self.backpressure.clone(),
            inflight: self.inflight.clone(),
            action: AtomicU8::new(ACTION_PENDING),
        });

        let mode = self.config.acknowledgement.mode;
        let manual = matches!(
            mode,
            AcknowledgementMode::Manual | AcknowledgementMode::Never
        );
        let sink = manual.then(|| ctx.clone() as Arc<dyn AckSink>);

        let head = MessageHead {
            message_id: raw.message_id.clone(),
            receipt_handle: raw.receipt_handle,
            queue: self.config.queue.clone(),
            attributes: raw.attributes,
            message_attributes: raw.message_attributes,
            message_group_id: ctx.group.clone(),
            sequence_number: raw.sequence_number,
        };

        match (self.adapter)(head, &raw.body, self.converter.as_ref(), sink) {
            Ok(future) => {
                let worker = tokio::spawn(run_worker(
                    future,
                    ctx,
                    mode,
                    self.config.queue.clone(),
                    self.metrics.clone(),
                ));
                if let Some(entry) = lock_inflight(&self.inflight).get_mut(&seq) {
                    entry.abort = Some(worker.abort_handle());
                }
            }
            Err(e) => {
                warn!(
                    key = self.key,
                    message_id = raw.message_id,
                    error = %e,
                    "message conversion failed"
                );
                self.metrics.record(&MetricEvent::MessageFailed {
                    queue: self.config.queue.clone(),
                    error_kind: e.kind(),
                });
                let delete = match self.config.acknowledgement.on_error {
                    OnErrorPolicy::Ignore => true,
                    OnErrorPolicy::Redrive => false,
                };
                let _ = ctx.complete(delete);
            }
        }
    }

    async fn redeliver_busy(&self, queue_url: &str, entries: Vec<VisibilityEntry>) {
        debug!(
            key = self.key,
            count = entries.len(),
            "returning messages with busy groups for redelivery"
        );
        for chunk in entries.chunks(10) {
            if let Err(e) = self.client.change_visibility_batch(queue_url, chunk).await {
                warn!(key = self.key, error = %e, "failed to return busy-group messages");
            }
        }
    }

    /// Cooperative two-phase shutdown: wait for in-flight handlers, then
    /// cancel the rest and flush acknowledgements one final time.
    async fn drain(&self) {
        self.enter_stopping();
        let drain_timeout = self
            .stop_timeout_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(self.config.shutdown_timeout);

        info!(key = self.key, in_flight = self.in_flight(), "draining listener container");
        let drained = timeout(drain_timeout, self.backpressure.wait_idle())
            .await
            .is_ok();

        // completions gathered during the wait go out before anything is
        // cancelled
        if let Some(ack) = self
            .ack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            ack.request_flush();
        }

        if !drained {
            let abandoned: Vec<InFlightEntry> = {
                let mut inflight = lock_inflight(&self.inflight);
                let seqs: Vec<u64> = inflight.keys().copied().collect();
                seqs.into_iter()
                    .filter_map(|seq| inflight.remove(&seq))
                    .collect()
            };
            for entry in &abandoned {
                if let Some(abort) = &entry.abort {
                    abort.abort();
                }
            }
            let handles: Vec<&str> = abandoned
                .iter()
                .map(|e| e.receipt_handle.as_str())
                .collect();
            warn!(
                key = self.key,
                count = abandoned.len(),
                receipt_handles = handles.join(","),
                "shutdown_abandoned: in-flight handlers cancelled, messages will redeliver"
            );
        }

        if let Some(task) = self
            .visibility_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let ack = self
            .ack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut ack) = ack {
            ack.shutdown().await;
        }

        let _ = self.transition(ContainerState::Stopped);
        info!(key = self.key, reason = ?self.stop_reason(), "listener container stopped");
        self.metrics.record(&MetricEvent::ContainerStopped {
            queue: self.config.queue.clone(),
        });
    }
}

/// Runs one handler future and routes its outcome.
async fn run_worker(
    future: HandlerFuture,
    ctx: Arc<CompletionCtx>,
    mode: AcknowledgementMode,
    queue: String,
    metrics: Arc<dyn MetricsCollector>,
) {
    let start = Instant::now();
    let result = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(Error::Listener("handler panicked".into())),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            match mode {
                AcknowledgementMode::AutoOnSuccess | AcknowledgementMode::Always => {
                    let _ = ctx.complete(true);
                }
                AcknowledgementMode::Never => {}
                AcknowledgementMode::Manual => {
                    if ctx.is_pending() {
                        warn!(
                            queue = queue,
                            message_id = ctx.record.message_id,
                            "MANUAL handler returned without acknowledging or rejecting"
                        );
                        metrics.record(&MetricEvent::MessageFailed {
                            queue: queue.clone(),
                            error_kind: "listener_error",
                        });
                        return;
                    }
                }
            }
            metrics.record(&MetricEvent::MessageProcessed {
                queue,
                duration_ms,
            });
        }
        Err(e) => {
            warn!(queue = queue, message_id = ctx.record.message_id, error = %e, "handler failed");
            metrics.record(&MetricEvent::MessageFailed {
                queue: queue.clone(),
                error_kind: "listener_error",
            });
            match mode {
                // failed messages stay un-acked and redeliver
                AcknowledgementMode::AutoOnSuccess => {
                    let _ = ctx.complete(false);
                }
                AcknowledgementMode::Always => {
                    let _ = ctx.complete(true);
                }
                AcknowledgementMode::Never | AcknowledgementMode::Manual => {}
            }
        }
    }
}
