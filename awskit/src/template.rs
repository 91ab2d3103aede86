//! Synchronous producer for single and batched sends, FIFO-aware.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use crate::client::{Backoff, OutboundMessage, QueueClient, ReceiveOptions};
use crate::config::{is_fifo_queue, SendBatchFailureStrategy, TemplateConfig};
use crate::convert::{JsonMessageConverter, MessageConverter};
use crate::message::{Message, MessageHead};
use crate::Error;

/// Receipt for one sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// Service-assigned message id.
    pub message_id: String,
    /// FIFO sequence number, when the target is a FIFO queue.
    pub sequence_number: Option<String>,
}

/// One failed entry of a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    /// Position of the payload in the submitted batch.
    pub index: usize,
    /// Service failure code.
    pub code: String,
    /// Service failure message.
    pub message: String,
    /// Whether the failure is attributed to the sender.
    pub sender_fault: bool,
}

/// Outcome of a batch send.
#[derive(Debug, Clone, Default)]
pub struct BatchSendResult {
    /// Accepted entries, in batch order.
    pub successful: Vec<SendResult>,
    /// Rejected entries.
    pub failed: Vec<SendFailure>,
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Delivery delay in seconds.
    pub delay_seconds: Option<i32>,
    /// Sender-set attributes.
    pub message_attributes: HashMap<String, String>,
    /// FIFO message group; required when the queue is FIFO.
    pub message_group_id: Option<String>,
    /// FIFO deduplication id.
    pub message_deduplication_id: Option<String>,
}

/// Options shared by every entry of a batch send.
#[derive(Debug, Clone, Default)]
pub struct BatchSendOptions {
    /// Delivery delay in seconds.
    pub delay_seconds: Option<i32>,
    /// Sender-set attributes applied to each entry.
    pub message_attributes: HashMap<String, String>,
    /// FIFO message group; required when the queue is FIFO.
    pub message_group_id: Option<String>,
}

/// Producer for one queue service: single sends, batch sends and one-shot
/// receives.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use awskit::{Error, SqsTemplate, SqsQueueClient, load_config_from_env};
/// # tokio_test::block_on(async {
/// let client = Arc::new(SqsQueueClient::new(&load_config_from_env()).await?);
/// let template = SqsTemplate::new(client);
/// let result = template
///     .send("orders-queue", &serde_json::json!({"order_id": 1}))
///     .await?;
/// println!("sent {}", result.message_id);
/// # Ok::<(), Error>(())
/// # });
/// ```
pub struct SqsTemplate {
    client: Arc<dyn QueueClient>,
    converter: Arc<dyn MessageConverter>,
    config: TemplateConfig,
    urls: Mutex<HashMap<String, String>>,
}

impl SqsTemplate {
    /// Creates a template with the JSON converter and default options.
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        SqsTemplate {
            client,
            converter: Arc::new(JsonMessageConverter::new()),
            config: TemplateConfig::default(),
            urls: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the payload converter.
    pub fn with_converter(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replaces the template options.
    pub fn with_config(mut self, config: TemplateConfig) -> Self {
        self.config = config;
        self
    }

    async fn queue_url(&self, queue: &str) -> Result<String, Error> {
        if queue.contains("://") {
            return Ok(queue.to_string());
        }
        {
            let urls = self.urls.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(url) = urls.get(queue) {
                return Ok(url.clone());
            }
        }
        let url = self.client.get_queue_url(queue).await.map_err(Error::from)?;
        let _ = self
            .urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_string(), url.clone());
        Ok(url)
    }

    fn serialize<T: Serialize>(&self, payload: &T) -> Result<String, Error> {
        let value =
            serde_json::to_value(payload).map_err(|e| Error::Serialization(format!("{e}")))?;
        self.converter.serialize(&value)
    }

    /// Sends one payload with default options.
    pub async fn send<T: Serialize>(&self, queue: &str, payload: &T) -> Result<SendResult, Error> {
        self.send_with_options(queue, payload, SendOptions::default())
            .await
    }

    /// Sends one payload.
    ///
    /// A FIFO queue without a `message_group_id` fails with a configuration
    /// error before the service is contacted.
    pub async fn send_with_options<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        options: SendOptions,
    ) -> Result<SendResult, Error> {
        if is_fifo_queue(queue) && options.message_group_id.is_none() {
            return Err(Error::Configuration(format!(
                "message_group_id is required for FIFO queue {queue}"
            )));
        }

        let body = self.serialize(payload)?;
        let url = self.queue_url(queue).await?;
        let receipt = self
            .client
            .send(
                &url,
                OutboundMessage {
                    body,
                    delay_seconds: options.delay_seconds.or(self.config.default_delay_seconds),
                    message_attributes: options.message_attributes,
                    message_group_id: options.message_group_id,
                    message_deduplication_id: options.message_deduplication_id,
                },
            )
            .await
            .map_err(Error::from)?;
        debug!(queue = queue, message_id = receipt.message_id, "message sent");
        Ok(SendResult {
            message_id: receipt.message_id,
            sequence_number: receipt.sequence_number,
        })
    }

    /// Sends a batch of 1 to 10 payloads with default options.
    pub async fn send_batch<T: Serialize>(
        &self,
        queue: &str,
        payloads: &[T],
    ) -> Result<BatchSendResult, Error> {
        self.send_batch_with_options(queue, payloads, BatchSendOptions::default())
            .await
    }

    /// Sends a batch of 1 to 10 payloads, applying the configured
    /// [`SendBatchFailureStrategy`] to partial failures.
    pub async fn send_batch_with_options<T: Serialize>(
        &self,
        queue: &str,
        payloads: &[T],
        options: BatchSendOptions,
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
        if is_fifo_queue(queue) && options.message_group_id.is_none() {
            return Err(Error::Configuration(format!(
                "message_group_id is required for FIFO queue {queue}"
            )));
        }

        let bodies: Vec<String> = payloads
            .iter()
            .map(|p| self.serialize(p))
            .collect::<Result<_, _>>()?;
        let url = self.queue_url(queue).await?;

        let outbound = |index: usize| -> (String, OutboundMessage) {
            (
                index.to_string(),
                OutboundMessage {
                    body: bodies[index].clone(),
                    delay_seconds: options.delay_seconds.or(self.config.default_delay_seconds),
                    message_attributes: options.message_attributes.clone(),
                    message_group_id: options.message_group_id.clone(),
                    message_deduplication_id: None,
                },
            )
        };

        let entries: Vec<(String, OutboundMessage)> = (0..payloads.len()).map(outbound).collect();
        let results = self
            .client
            .send_batch(&url, entries)
            .await
            .map_err(Error::from)?;

        let mut successful: Vec<(usize, SendResult)> = results
            .successful
            .into_iter()
            .filter_map(|entry| {
                let index: usize = entry.id.parse().ok()?;
                Some((
                    index,
                    SendResult {
                        message_id: entry.receipt.message_id,
                        sequence_number: entry.receipt.sequence_number,
                    },
                ))
            })
            .collect();
        let mut failed: Vec<SendFailure> = results
            .failed
            .into_iter()
            .filter_map(|failure| {
                let index: usize = failure.id.parse().ok()?;
                Some(SendFailure {
                    index,
                    code: failure.code,
                    message: failure.message,
                    sender_fault: failure.sender_fault,
                })
            })
            .collect();

        if !failed.is_empty() {
            match self.config.send_batch_failure_strategy {
                SendBatchFailureStrategy::PartialSuccess => {}
                SendBatchFailureStrategy::FailOnAny => {
                    let detail = failed
                        .iter()
                        .map(|f| format!("#{}: {}", f.index, f.code))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(if failed.iter().any(|f| f.sender_fault) {
                        Error::FatalService(format!("batch send rejected entries: {detail}"))
                    } else {
                        Error::TransientService(format!("batch send failed entries: {detail}"))
                    });
                }
                SendBatchFailureStrategy::RetryFailed => {
                    let mut backoff = Backoff::new();
                    for attempt in 1..=3 {
                        if failed.is_empty() {
                            break;
                        }
                        warn!(
                            queue = queue,
                            attempt = attempt,
                            remaining = failed.len(),
                            "retrying failed batch entries"
                        );
                        backoff.sleep().await;
                        let retry_entries: Vec<(String, OutboundMessage)> =
                            failed.iter().map(|f| outbound(f.index)).collect();
                        match self.client.send_batch(&url, retry_entries).await {
                            Ok(retry) => {
                                for entry in retry.successful {
                                    if let Ok(index) = entry.id.parse::<usize>() {
                                        failed.retain(|f| f.index != index);
                                        successful.push((
                                            index,
                                            SendResult {
                                                message_id: entry.receipt.message_id,
                                                sequence_number: entry.receipt.sequence_number,
                                            },
                                        ));
                                    }
                                }
                                failed = retry
                                    .failed
                                    .into_iter()
                                    .filter_map(|failure| {
                                        let index: usize = failure.id.parse().ok()?;
                                        Some(SendFailure {
                                            index,
                                            code: failure.code,
                                            message: failure.message,
                                            sender_fault: failure.sender_fault,
                                        })
                                    })
                                    .collect();
                            }
                            Err(e) if e.is_retryable() => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }

        successful.sort_by_key(|(index, _)| *index);
        Ok(BatchSendResult {
            successful: successful.into_iter().map(|(_, r)| r).collect(),
            failed,
        })
    }

    /// One-shot receive used by tests and simple consumers. Bodies are
    /// converted with no type target.
    pub async fn receive(
        &self,
        queue: &str,
        max_messages: i32,
        wait_time_seconds: Option<i32>,
    ) -> Result<Vec<Message<serde_json::Value>>, Error> {
        if !(1..=10).contains(&max_messages) {
            return Err(Error::Configuration(format!(
                "max_messages must be within [1, 10], got {max_messages}"
            )));
        }
        let url = self.queue_url(queue).await?;
        let raw = self
            .client
            .receive(
                &url,
                &ReceiveOptions {
                    max_messages,
                    wait_time_seconds: wait_time_seconds.unwrap_or(0),
                    visibility_timeout: None,
                },
            )
            .await
            .map_err(Error::from)?;

        raw.into_iter()
            .map(|m| {
                let body = self.converter.deserialize(&m.body)?;
                Ok(Message::new(
                    MessageHead {
                        message_id: m.message_id,
                        receipt_handle: m.receipt_handle,
                        queue: queue.to_string(),
                        attributes: m.attributes,
                        message_attributes: m.message_attributes,
                        message_group_id: m.message_group_id,
                        sequence_number: m.sequence_number,
                    },
                    body,
                    None,
                ))
            })
            .collect()
    }
}
