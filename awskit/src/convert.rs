//! Payload conversion between user values and SQS string bodies.
//!
//! Containers and the send template never touch `serde_json` directly for
//! message bodies; they go through a [`MessageConverter`] so applications can
//! swap in a different wire format. The no-type-target representation is
//! [`serde_json::Value`]; binding to a concrete payload type happens in the
//! adapter closure created at listener registration.
use serde_json::Value;

use crate::Error;

/// Serializes and deserializes payloads to and from the queue's string body.
pub trait MessageConverter: Send + Sync {
    /// Renders a structured payload as a message body.
    fn serialize(&self, payload: &Value) -> Result<String, Error>;

    /// Parses a message body into a structured value.
    fn deserialize(&self, body: &str) -> Result<Value, Error>;
}

/// JSON converter used by default.
///
/// ```
/// # use awskit::convert::{JsonMessageConverter, MessageConverter};
/// let converter = JsonMessageConverter::new();
/// let value = converter.deserialize(r#"{"order_id": 7}"#).unwrap();
/// assert_eq!(value["order_id"], 7);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageConverter;

impl JsonMessageConverter {
    /// Creates a new JSON converter.
    pub fn new() -> Self {
        Self
    }
}

impl MessageConverter for JsonMessageConverter {
    fn serialize(&self, payload: &Value) -> Result<String, Error> {
        serde_json::to_string(payload).map_err(|e| Error::Serialization(format!("{e}")))
    }

    fn deserialize(&self, body: &str) -> Result<Value, Error> {
        serde_json::from_str(body).map_err(|e| Error::Deserialization(format!("{e}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_json_objects() {
        let converter = JsonMessageConverter::new();
        let body = converter
            .serialize(&serde_json::json!({"order_id": 1, "amount": 9.5}))
            .unwrap();
        let value = converter.deserialize(&body).unwrap();
        assert_eq!(value["order_id"], 1);
        assert_eq!(value["amount"], 9.5);
    }

    #[test]
    fn invalid_body_is_a_deserialization_error() {
        let converter = JsonMessageConverter::new();
        let err = converter.deserialize("{not json").unwrap_err();
        assert_eq!(err.kind(), "deserialization_error");
    }
}
