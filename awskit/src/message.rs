//! The typed, immutable message value handed to listeners.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Error;

/// Destination of a manual acknowledgement, wired up by the container.
///
/// Implementations must accept at most one action per message and surface a
/// duplicate as [`Error::Listener`].
pub(crate) trait AckSink: Send + Sync {
    /// Positive acknowledgement: delete the message from the queue.
    fn ack(&self) -> Result<(), Error>;
    /// Negative acknowledgement: leave the message for redelivery.
    fn nack(&self) -> Result<(), Error>;
}

/// Everything about a received message except its body.
#[derive(Debug, Clone, Default)]
pub(crate) struct MessageHead {
    pub message_id: String,
    pub receipt_handle: String,
    pub queue: String,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, String>,
    pub message_group_id: Option<String>,
    pub sequence_number: Option<String>,
}

/// An immutable message as delivered to a handler.
///
/// Constructed by the listener container (or by
/// [`crate::testing::create_test_message`] in tests) and destroyed when
/// acknowledged or when its visibility expires on the service side.
#[derive(Clone)]
pub struct Message<T> {
    head: MessageHead,
    body: T,
    ack: Option<Arc<dyn AckSink>>,
}

impl<T: fmt::Debug> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.head.message_id)
            .field("queue", &self.head.queue)
            .field("message_group_id", &self.head.message_group_id)
            .field("body", &self.body)
            .finish()
    }
}

impl<T> Message<T> {
    pub(crate) fn new(head: MessageHead, body: T, ack: Option<Arc<dyn AckSink>>) -> Self {
        Message { head, body, ack }
    }

    /// The deserialized payload.
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Consumes the message, returning the payload.
    pub fn into_body(self) -> T {
        self.body
    }

    /// Service-assigned message id.
    pub fn message_id(&self) -> &str {
        &self.head.message_id
    }

    /// Opaque token authorizing delete and visibility changes for this
    /// delivery.
    pub fn receipt_handle(&self) -> &str {
        &self.head.receipt_handle
    }

    /// The queue this message was received from.
    pub fn queue(&self) -> &str {
        &self.head.queue
    }

    /// Service-set attributes, e.g. `ApproximateReceiveCount`.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.head.attributes
    }

    /// Sender-set attributes.
    pub fn message_attributes(&self) -> &HashMap<String, String> {
        &self.head.message_attributes
    }

    /// FIFO message group, when present.
    pub fn message_group_id(&self) -> Option<&str> {
        self.head.message_group_id.as_deref()
    }

    /// FIFO sequence number, when present.
    pub fn sequence_number(&self) -> Option<&str> {
        self.head.sequence_number.as_deref()
    }

    /// Positively acknowledges the message, feeding the container's
    /// acknowledgement processor.
    ///
    /// Only available under [`crate::AcknowledgementMode::Manual`] and
    /// [`crate::AcknowledgementMode::Never`]; a second ack or nack of the
    /// same message is a listener error.
    pub fn acknowledge(&self) -> Result<(), Error> {
        match &self.ack {
            Some(sink) => sink.ack(),
            None => Err(Error::Configuration(
                "manual acknowledgement requires MANUAL or NEVER acknowledgement mode".into(),
            )),
        }
    }

    /// Negatively acknowledges the message, leaving it for redelivery.
    ///
    /// Same availability rules as [`Message::acknowledge`].
    pub fn reject(&self) -> Result<(), Error> {
        match &self.ack {
            Some(sink) => sink.nack(),
            None => Err(Error::Configuration(
                "manual acknowledgement requires MANUAL or NEVER acknowledgement mode".into(),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSink {
        acks: AtomicU32,
    }

    impl AckSink for CountingSink {
        fn ack(&self) -> Result<(), Error> {
            if self.acks.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(Error::Listener("duplicate acknowledgement".into()));
            }
            Ok(())
        }

        fn nack(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn acknowledge_without_sink_is_a_configuration_error() {
        let message = Message::new(MessageHead::default(), 42u32, None);
        let err = message.acknowledge().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn acknowledge_routes_to_the_sink() {
        let sink = Arc::new(CountingSink {
            acks: AtomicU32::new(0),
        });
        let message = Message::new(MessageHead::default(), 42u32, Some(sink.clone()));
        message.acknowledge().unwrap();
        assert_eq!(sink.acks.load(Ordering::SeqCst), 1);
        assert!(message.acknowledge().is_err());
    }
}
