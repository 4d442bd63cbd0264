//! Bus engines: the transport-facing side of the bus.
//!
//! ```text
//!        Dispatcher                          BusHost
//!            │ send_message                     ▲ MessageStream
//!            ▼                                  │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BusEngine                              │
//! │  subscribe / start / stop / send_message                    │
//! │  notify_success / notify_fail / send_to_error_queue         │
//! └─────────────────────────────────────────────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌───────────────────┐        ┌─────────────────────────────┐
//! │ InMemoryBusEngine │        │ BrokerBusEngine<Transport>  │
//! │ broadcast channel │        │ exchanges, queues, ack/nack │
//! └───────────────────┘        └─────────────────────────────┘
//! ```
//!
//! Engines decode inbound envelopes through a [`SubscriptionTable`]: only
//! types subscribed before `start` come out of the stream, everything else is
//! filtered without error.

#[cfg(feature = "broker")]
pub mod broker;
mod in_memory;
mod subscription;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::message::{Command, CommandMessage, EnvelopeError, Event, EventMessage, Message};
use crate::registry::RegistryError;
use crate::serializer::SerializationError;

pub use in_memory::InMemoryBusEngine;
pub use subscription::{Subscription, SubscriptionTable};

#[cfg(feature = "broker")]
use broker::TransportError;

/// Hot stream of decoded inbound messages returned by [`BusEngine::start`].
///
/// The stream completes when the engine is stopped.
pub type MessageStream = BoxStream<'static, Message>;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] SerializationError),
    #[error("failed to frame envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("subscription refused: {0}")]
    Registry(#[from] RegistryError),
    #[cfg(feature = "broker")]
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("message {0} was not received through this engine")]
    UnknownMessage(String),
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),
}

/// Transport contract every engine implements.
///
/// Subscriptions are declared before [`start`](BusEngine::start). Received
/// messages are settled exactly once through
/// [`notify_success`](BusEngine::notify_success) or
/// [`notify_fail`](BusEngine::notify_fail).
#[async_trait]
pub trait BusEngine: Send + Sync {
    /// Start accepting inbound messages for every subscribed type.
    async fn start(&self) -> Result<MessageStream, EngineError>;

    /// Complete the inbound stream and release transport resources.
    ///
    /// Safe to call when the engine was never started.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Declare interest in a payload type. Registers the type as a side effect.
    fn subscribe(&self, subscription: Subscription) -> Result<(), EngineError>;

    /// Serialize and transmit a single message.
    async fn send_message(&self, message: Message) -> Result<(), EngineError>;

    /// Acknowledge a received message.
    async fn notify_success(&self, message: &Message) -> Result<(), EngineError>;

    /// Reject a received message at the transport level.
    async fn notify_fail(&self, message: &Message) -> Result<(), EngineError>;

    /// Forward a failed message to a named error queue.
    async fn send_to_error_queue(&self, queue: &str, message: Message) -> Result<(), EngineError> {
        let _ = (queue, message);
        Err(EngineError::Unsupported("error queues"))
    }
}

/// Typed conveniences over [`BusEngine`].
#[async_trait]
pub trait BusEngineExt: BusEngine {
    fn subscribe_to_command<T: Command>(&self) -> Result<(), EngineError> {
        self.subscribe(Subscription::command::<T>())
    }

    fn subscribe_to_event<T: Event>(&self) -> Result<(), EngineError> {
        self.subscribe(Subscription::event::<T>())
    }

    async fn send_command<T: Command>(&self, message: CommandMessage<T>) -> Result<(), EngineError> {
        self.send_message(message.into()).await
    }

    async fn send_event<T: Event>(&self, message: EventMessage<T>) -> Result<(), EngineError> {
        self.send_message(message.into()).await
    }
}

impl<E: BusEngine + ?Sized> BusEngineExt for E {}
