//! Bus-level error types.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::engine::EngineError;
use crate::message::{MessageDescriptor, MessageType};

/// Error type for building, starting and stopping a bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The engine refused an operation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// Options or dependencies are invalid.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// A second handler was registered for the same payload type.
    #[error("a handler for `{0}` is already registered")]
    DuplicateHandler(&'static str),
    /// `start` was called on a running host.
    #[error("bus host is already running")]
    AlreadyStarted,
    /// The dispatch loop ended abnormally.
    #[error("dispatch loop failed: {0}")]
    DispatchLoop(String),
}

/// Error returned when an outbound message cannot be handed to the engine.
#[derive(Debug, Error)]
#[error("failed to dispatch {message_type} `{descriptor}`: {source}")]
pub struct DispatchError {
    pub message_type: MessageType,
    pub descriptor: MessageDescriptor,
    #[source]
    pub source: EngineError,
}

/// Raised when the engine delivers a message no handler was registered for.
///
/// Never retried: the message goes straight to the terminal rejection.
#[derive(Debug, Clone, Error)]
#[error("no handler registered for {message_type} `{descriptor}` ({type_name})")]
pub struct MissingHandlerError {
    pub message_type: MessageType,
    pub descriptor: MessageDescriptor,
    pub type_name: &'static str,
}
