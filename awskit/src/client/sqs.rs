//! AWS SDK implementation of [`QueueClient`].
use std::collections::HashMap;

use aws_sdk_sqs::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{
    ChangeMessageVisibilityBatchRequestEntry, DeleteMessageBatchRequestEntry,
    MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName,
    SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use async_trait::async_trait;

use super::{
    BatchEntryFailure, BatchEntryResults, ClientError, DeleteEntry, ErrorKind, OutboundMessage,
    QueueClient, RawMessage, ReceiveOptions, SendBatchResults, SendEntryReceipt, SendReceipt,
    VisibilityEntry,
};
use crate::config::{is_fifo_queue, SqsConfig};
use crate::Error;

/// [`QueueClient`] backed by `aws-sdk-sqs`.
///
/// Cheap to clone; all containers and templates in a process share one
/// underlying SDK client.
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    client: Client,
}

impl SqsQueueClient {
    /// Builds a client from connection settings, falling back to the ambient
    /// AWS credential chain when no static credentials are configured.
    pub async fn new(config: &SqsConfig) -> Result<Self, Error> {
        let mut builder =
            aws_sdk_sqs::config::Builder::default().behavior_version(BehaviorVersion::latest());

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let provider = Credentials::new(
                    key,
                    secret,
                    config.session_token.clone(),
                    None,
                    "awskit",
                );
                builder = builder.credentials_provider(provider);
            }
            _ => {
                let aws_cfg = aws_config::load_from_env().await;
                let provider = aws_cfg.credentials_provider().ok_or(Error::Configuration(
                    "could not establish AWS credentials".into(),
                ))?;
                builder = builder.credentials_provider(provider);
                if config.region.is_none() {
                    if let Some(region) = aws_cfg.region() {
                        builder = builder.region(region.clone());
                    }
                }
            }
        };

        if let Some(region) = &config.region {
            builder = builder.region(Region::new(region.clone()));
        }

        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        Ok(SqsQueueClient {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Wraps an already-configured SDK client.
    pub fn from_client(client: Client) -> Self {
        SqsQueueClient { client }
    }
}

fn kind_for_code(code: &str) -> ErrorKind {
    match code {
        "AWS.SimpleQueueService.NonExistentQueue"
        | "QueueDoesNotExist"
        | "QueueDoesNotExistException" => ErrorKind::QueueNotFound,
        "ThrottlingException" | "Throttling" | "RequestThrottled" | "TooManyRequestsException" => {
            ErrorKind::Throttling
        }
        "RequestTimeout"
        | "RequestTimeoutException"
        | "ServiceUnavailable"
        | "InternalError"
        | "InternalFailure" => ErrorKind::Transient,
        "AccessDenied"
        | "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidClientTokenId"
        | "ExpiredToken"
        | "ExpiredTokenException"
        | "MissingAuthenticationToken"
        | "InvalidSecurity" => ErrorKind::Auth,
        _ => ErrorKind::Fatal,
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata,
{
    match &err {
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or("unknown");
            let message = ctx.err().message().unwrap_or("service error");
            ClientError::new(kind_for_code(code), format!("{code}: {message}"))
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ClientError::new(ErrorKind::Transient, format!("{err}"))
        }
        _ => ClientError::new(ErrorKind::Fatal, format!("{err}")),
    }
}

fn build_failure(message: impl std::fmt::Display) -> ClientError {
    ClientError::new(ErrorKind::Fatal, format!("invalid batch entry: {message}"))
}

fn string_attributes(
    attrs: &HashMap<String, String>,
) -> Result<HashMap<String, MessageAttributeValue>, ClientError> {
    let mut out = HashMap::with_capacity(attrs.len());
    for (name, value) in attrs {
        let attr = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(build_failure)?;
        let _ = out.insert(name.clone(), attr);
    }
    Ok(out)
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<RawMessage>, ClientError> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(options.max_messages)
            .wait_time_seconds(options.wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All");

        if let Some(timeout) = options.visibility_timeout {
            request = request.visibility_timeout(timeout);
        }

        let output = request.send().await.map_err(classify)?;

        let messages = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| {
                let attributes: HashMap<String, String> = m
                    .attributes
                    .as_ref()
                    .map(|a| {
                        a.iter()
                            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let message_attributes: HashMap<String, String> = m
                    .message_attributes
                    .as_ref()
                    .map(|a| {
                        a.iter()
                            .filter_map(|(k, v)| {
                                v.string_value().map(|s| (k.clone(), s.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                RawMessage {
                    message_id: m.message_id.clone().unwrap_or_default(),
                    receipt_handle: m.receipt_handle.clone().unwrap_or_default(),
                    body: m.body.clone().unwrap_or_default(),
                    message_group_id: attributes.get("MessageGroupId").cloned(),
                    sequence_number: attributes.get("SequenceNumber").cloned(),
                    attributes,
                    message_attributes,
                }
            })
            .collect();

        Ok(messages)
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchEntryResults, ClientError> {
        let mut request = self.client.delete_message_batch().queue_url(queue_url);
        for entry in entries {
            request = request.entries(
                DeleteMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .receipt_handle(&entry.receipt_handle)
                    .build()
                    .map_err(build_failure)?,
            );
        }

        let output = request.send().await.map_err(classify)?;
        Ok(BatchEntryResults {
            successful: output
                .successful()
                .iter()
                .map(|e| e.id().to_string())
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|e| BatchEntryFailure {
                    id: e.id().to_string(),
                    code: e.code().to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                    sender_fault: e.sender_fault(),
                })
                .collect(),
        })
    }

    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: &[VisibilityEntry],
    ) -> Result<BatchEntryResults, ClientError> {
        let mut request = self
            .client
            .change_message_visibility_batch()
            .queue_url(queue_url);
        for entry in entries {
            request = request.entries(
                ChangeMessageVisibilityBatchRequestEntry::builder()
                    .id(&entry.id)
                    .receipt_handle(&entry.receipt_handle)
                    .visibility_timeout(entry.visibility_timeout)
                    .build()
                    .map_err(build_failure)?,
            );
        }

        let output = request.send().await.map_err(classify)?;
        Ok(BatchEntryResults {
            successful: output
                .successful()
                .iter()
                .map(|e| e.id().to_string())
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|e| BatchEntryFailure {
                    id: e.id().to_string(),
                    code: e.code().to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                    sender_fault: e.sender_fault(),
                })
                .collect(),
        })
    }

    async fn send(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, ClientError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .set_message_attributes(if message.message_attributes.is_empty() {
                None
            } else {
                Some(string_attributes(&message.message_attributes)?)
            })
            .set_message_group_id(message.message_group_id)
            .set_message_deduplication_id(message.message_deduplication_id);

        if let Some(delay) = message.delay_seconds {
            request = request.delay_seconds(delay);
        }

        let output = request.send().await.map_err(classify)?;
        Ok(SendReceipt {
            message_id: output.message_id.unwrap_or_default(),
            sequence_number: output.sequence_number,
        })
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<(String, OutboundMessage)>,
    ) -> Result<SendBatchResults, ClientError> {
        let mut request = self.client.send_message_batch().queue_url(queue_url);
        for (id, message) in entries {
            let mut entry = SendMessageBatchRequestEntry::builder()
                .id(id)
                .message_body(message.body)
                .set_message_attributes(if message.message_attributes.is_empty() {
                    None
                } else {
                    Some(string_attributes(&message.message_attributes)?)
                })
                .set_message_group_id(message.message_group_id)
                .set_message_deduplication_id(message.message_deduplication_id);
            if let Some(delay) = message.delay_seconds {
                entry = entry.delay_seconds(delay);
            }
            request = request.entries(entry.build().map_err(build_failure)?);
        }

        let output = request.send().await.map_err(classify)?;
        Ok(SendBatchResults {
            successful: output
                .successful()
                .iter()
                .map(|e| SendEntryReceipt {
                    id: e.id().to_string(),
                    receipt: SendReceipt {
                        message_id: e.message_id().to_string(),
                        sequence_number: e.sequence_number().map(|s| s.to_string()),
                    },
                })
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|e| BatchEntryFailure {
                    id: e.id().to_string(),
                    code: e.code().to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                    sender_fault: e.sender_fault(),
                })
                .collect(),
        })
    }

    async fn get_queue_url(&self, queue_name: &str) -> Result<String, ClientError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(classify)?;
        output.queue_url.ok_or_else(|| {
            ClientError::new(
                ErrorKind::Fatal,
                format!("service returned no URL for queue {queue_name}"),
            )
        })
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError> {
        let mut request = self.client.create_queue().queue_name(queue_name);
        if is_fifo_queue(queue_name) {
            request = request.attributes(QueueAttributeName::FifoQueue, "true");
        }
        let output = request.send().await.map_err(classify)?;
        output.queue_url.ok_or_else(|| {
            ClientError::new(
                ErrorKind::Fatal,
                format!("service returned no URL for queue {queue_name}"),
            )
        })
    }
}
