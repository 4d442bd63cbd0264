//! Wire-level carrier for a serialized message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::descriptor::MessageDescriptor;
use super::headers::Headers;
use super::message::MessageType;

/// Error raised when an envelope frame cannot be encoded or decoded.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("binary envelope frame: {0}")]
    Binary(#[from] bitcode::Error),
    #[error("json envelope frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// The serialized form of a [`Message`](super::Message).
///
/// Transports move envelopes around without knowing the payload type. The
/// receiving side uses `type_name` for an exact match against locally
/// subscribed types and falls back to `descriptor` when the sender's type
/// is not known in this process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub headers: Headers,
    pub message_type: MessageType,
    pub descriptor: MessageDescriptor,
    /// Rust type path of the payload in the sending process.
    pub type_name: String,
    /// Serialized payload.
    #[serde(with = "content_serde")]
    pub content: Vec<u8>,
}

// JSON frames carry the content as one base64 string instead of an array of
// numbers. Binary frames keep the raw bytes.
mod content_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            STANDARD.encode(content).serialize(serializer)
        } else {
            content.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            STANDARD.decode(encoded).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

impl Envelope {
    /// Get the content as a string (if valid UTF-8).
    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Encode as a compact binary frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(bitcode::serialize(self)?)
    }

    /// Decode a binary frame produced by [`Envelope::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(bitcode::deserialize(bytes)?)
    }

    /// Encode as a JSON frame. Content is base64 encoded.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
