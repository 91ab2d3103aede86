//! Starts and stops the containers registered in a listener registry.
use std::sync::Arc;

use futures::future::join_all;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{error, info};

use crate::client::{QueueClient, SqsQueueClient};
use crate::config::{load_config_from_env, SqsConfig};
use crate::container::{ContainerState, MessageListenerContainer, StopReason};
use crate::convert::{JsonMessageConverter, MessageConverter};
use crate::metrics::{MetricsCollector, NoOpMetrics};
use crate::registry::ListenerRegistry;
use crate::Error;

/// Handle onto one running container, exposed by key.
#[derive(Clone)]
pub struct ListenerContext {
    container: Arc<MessageListenerContainer>,
}

impl ListenerContext {
    /// Handler key.
    pub fn key(&self) -> &str {
        self.container.key()
    }

    /// Queue the container consumes.
    pub fn queue(&self) -> &str {
        self.container.queue()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        self.container.state()
    }

    /// Current number of in-flight messages.
    pub fn in_flight(&self) -> usize {
        self.container.in_flight()
    }

    /// Suspends polling; in-flight handlers keep running.
    pub fn pause(&self) {
        self.container.pause();
    }

    /// Resumes polling.
    pub fn resume(&self) {
        self.container.resume();
    }

    /// Stops the container with its configured shutdown timeout.
    pub async fn stop(&self) {
        self.container.stop().await;
    }

    /// Why the container stopped.
    pub fn stop_reason(&self) -> StopReason {
        self.container.stop_reason()
    }
}

/// Starts one [`MessageListenerContainer`] per registry entry and drives
/// their shutdown.
///
/// Containers are independent; they share only the queue client and the
/// metrics sink.
pub struct ContainerSupervisor {
    defaults: SqsConfig,
    client: Arc<dyn QueueClient>,
    converter: Arc<dyn MessageConverter>,
    metrics: Arc<dyn MetricsCollector>,
    containers: Vec<Arc<MessageListenerContainer>>,
}

impl ContainerSupervisor {
    /// Creates a supervisor with the JSON converter and no metrics.
    pub fn new(client: Arc<dyn QueueClient>, defaults: SqsConfig) -> Self {
        ContainerSupervisor {
            defaults,
            client,
            converter: Arc::new(JsonMessageConverter::new()),
            metrics: Arc::new(NoOpMetrics::new()),
            containers: Vec::new(),
        }
    }

    /// Replaces the payload converter used by every container.
    pub fn with_converter(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replaces the metrics sink used by every container.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builds and starts one container per listener in `registry`.
    ///
    /// A startup failure stops any containers already started and
    /// propagates.
    pub async fn start(&mut self, registry: &ListenerRegistry) -> Result<(), Error> {
        for listener in registry.get_listeners() {
            let container = Arc::new(MessageListenerContainer::from_listener(
                &listener,
                &self.defaults,
                self.client.clone(),
                self.converter.clone(),
                self.metrics.clone(),
            )?);
            if let Err(e) = container.start().await {
                error!(key = listener.key(), error = %e, "listener failed to start");
                self.stop().await;
                return Err(e);
            }
            self.containers.push(container);
        }
        info!(count = self.containers.len(), "listeners started");
        Ok(())
    }

    /// Stops every container with its configured shutdown timeout.
    pub async fn stop(&self) {
        let _ = join_all(self.containers.iter().map(|c| c.stop())).await;
    }

    /// Stops every container, allowing in-flight handlers up to `drain`.
    pub async fn stop_with_timeout(&self, drain: Duration) {
        let _ = join_all(
            self.containers
                .iter()
                .map(|c| c.stop_with_timeout(drain)),
        )
        .await;
    }

    /// Looks up a running container by handler key.
    pub fn get_listener_context(&self, key: &str) -> Option<ListenerContext> {
        self.containers
            .iter()
            .find(|c| c.key() == key)
            .map(|container| ListenerContext {
                container: container.clone(),
            })
    }

    /// Contexts for every container, in registration order.
    pub fn contexts(&self) -> Vec<ListenerContext> {
        self.containers
            .iter()
            .map(|container| ListenerContext {
                container: container.clone(),
            })
            .collect()
    }

    fn aggregate_reason(&self, base: StopReason) -> StopReason {
        self.containers
            .iter()
            .map(|c| c.stop_reason())
            .chain(std::iter::once(base))
            .max_by_key(StopReason::severity)
            .unwrap_or_default()
    }

    /// Blocks until every container stops on its own or a ctrl-c arrives,
    /// then returns the process exit code for the most severe stop reason:
    /// 0 clean, 1 configuration error, 2 fatal queue error, 130 signal.
    pub async fn run(&self) -> i32 {
        let all_stopped = join_all(self.containers.iter().map(|c| c.wait_stopped()));

        tokio::select! {
            reasons = all_stopped => {
                reasons
                    .into_iter()
                    .max_by_key(StopReason::severity)
                    .unwrap_or_default()
                    .exit_code()
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping listeners");
                self.stop().await;
                self.aggregate_reason(StopReason::Signal).exit_code()
            }
        }
    }
}

static DEFAULT_SUPERVISOR: Lazy<Mutex<Option<ContainerSupervisor>>> =
    Lazy::new(|| Mutex::new(None));

/// Starts one container per listener in the default registry, using
/// configuration from `AWSKIT_*` environment variables.
pub async fn start_listeners() -> Result<(), Error> {
    let mut slot = DEFAULT_SUPERVISOR.lock().await;
    if slot.is_some() {
        return Err(Error::Configuration(
            "listeners are already started; call stop_listeners first".into(),
        ));
    }
    let defaults = load_config_from_env();
    let client = Arc::new(SqsQueueClient::new(&defaults).await?);
    let mut supervisor = ContainerSupervisor::new(client, defaults);
    supervisor.start(ListenerRegistry::global()).await?;
    *slot = Some(supervisor);
    Ok(())
}

/// Stops the containers started by [`start_listeners`]. A no-op when none
/// are running.
pub async fn stop_listeners() -> Result<(), Error> {
    let supervisor = DEFAULT_SUPERVISOR.lock().await.take();
    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
    Ok(())
}

/// Looks up a container started by [`start_listeners`] by handler key.
pub async fn get_listener_context(key: &str) -> Option<ListenerContext> {
    DEFAULT_SUPERVISOR
        .lock()
        .await
        .as_ref()
        .and_then(|s| s.get_listener_context(key))
}
