//! Codec seam: mapping-shaped messages to and from text frames.

use serde_json::Value;
use thiserror::Error;

use crate::messages::Notification;

/// Errors from encoding or decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text is not valid JSON, or the value could not be serialized.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The text is valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Encodes and decodes mapping-shaped messages.
pub trait Codec: Send + Sync {
    /// Encode a message as one text frame.
    fn encode(&self, message: &Notification) -> Result<String, CodecError>;
    /// Decode one text frame into a message.
    fn decode(&self, text: &str) -> Result<Notification, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Notification) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, text: &str) -> Result<Notification, CodecError> {
        match serde_json::from_str(text)? {
            Value::Object(map) => Ok(map),
            Value::Array(_) => Err(CodecError::NotAnObject("array")),
            Value::String(_) => Err(CodecError::NotAnObject("string")),
            Value::Number(_) => Err(CodecError::NotAnObject("number")),
            Value::Bool(_) => Err(CodecError::NotAnObject("boolean")),
            Value::Null => Err(CodecError::NotAnObject("null")),
        }
    }
}
