//! Payload serialization.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error raised while turning a payload into bytes or back.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("payload json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Turns payload values into envelope content and back.
///
/// Payloads cross this boundary as [`serde_json::Value`] so the trait stays
/// object safe and engines can hold it as `Arc<dyn Serializer>`. Every type
/// used as a command or event must round-trip through it.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(&self, content: &[u8]) -> Result<serde_json::Value, SerializationError>;
}

/// UTF-8 JSON content. The default serializer for every engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, content: &[u8]) -> Result<serde_json::Value, SerializationError> {
        let text = std::str::from_utf8(content)?;
        Ok(serde_json::from_str(text)?)
    }
}

/// Serialize a typed payload with `serializer`.
pub fn encode<T: Serialize>(
    serializer: &dyn Serializer,
    payload: &T,
) -> Result<Vec<u8>, SerializationError> {
    let value = serde_json::to_value(payload)?;
    serializer.serialize(&value)
}

/// Deserialize envelope content into `T`.
pub fn decode<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    content: &[u8],
) -> Result<T, SerializationError> {
    let value = serializer.deserialize(content)?;
    Ok(serde_json::from_value(value)?)
}
