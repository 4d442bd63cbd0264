//! Broker transport traits.
//!
//! Split the way message brokers split their primitives:
//! `Publisher` fans out through an exchange, `Sender` targets one named queue,
//! `Listener` declares and binds queues, consumes and cancels them, and
//! settles deliveries.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// One message handed to a consumer, awaiting ack or nack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Broker-assigned tag identifying this delivery for settlement.
    pub delivery_tag: u64,
    /// Raw frame bytes.
    pub body: Vec<u8>,
    /// True when the message was requeued after a nack.
    pub redelivered: bool,
}

/// Stream of deliveries from one consumed queue.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("queue `{0}` does not exist")]
    QueueNotFound(String),
    #[error("delivery {delivery_tag} on queue `{queue}` is not awaiting settlement")]
    UnknownDelivery { queue: String, delivery_tag: u64 },
    #[error("consumer `{consumer_tag}` already consumes queue `{queue}`")]
    ConsumerExists { queue: String, consumer_tag: String },
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("transport is closed")]
    Closed,
}

/// Fan-out publishing through named exchanges.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create the exchange if it does not exist.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError>;

    /// Publish a frame to every queue bound to `exchange`.
    ///
    /// Publishing to an exchange with no bindings drops the frame.
    async fn publish(&self, exchange: &str, body: Vec<u8>) -> Result<(), TransportError>;
}

/// Point-to-point delivery to a named queue.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send a frame to a declared queue.
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), TransportError>;
}

/// Queue consumption with explicit settlement.
///
/// Several consumers of the same queue compete: each frame goes to exactly
/// one of them.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Create the queue if it does not exist.
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Route frames published to `exchange` into `queue`.
    async fn bind(&self, queue: &str, exchange: &str) -> Result<(), TransportError>;

    /// Start consuming a declared queue under `consumer_tag`.
    ///
    /// Deliveries the consumer has not settled when its stream is dropped go
    /// back to the head of the queue flagged as redelivered.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, TransportError>;

    /// Stop delivering to a consumer.
    ///
    /// Deliveries handed to the consumer but not yet taken from its stream
    /// return to the queue. Taken deliveries can still be settled.
    async fn cancel(&self, queue: &str, consumer_tag: &str) -> Result<(), TransportError>;

    /// Settle a delivery as processed.
    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), TransportError>;

    /// Settle a delivery as failed, optionally putting it back at the head of the queue.
    async fn nack(&self, queue: &str, delivery_tag: u64, requeue: bool)
        -> Result<(), TransportError>;
}

/// Combined trait for a full broker connection.
pub trait Transport: Publisher + Sender + Listener {}

// Blanket implementation
impl<T: Publisher + Sender + Listener> Transport for T {}
