//! Broker-style engine and its transport contract.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BrokerBusEngine<Transport>                   │
//! │  exchange per descriptor, queue per command, event queue    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Publisher + Sender + Listener Traits              │
//! │  Publisher: declare_exchange / publish                      │
//! │  Sender: send(queue)                                        │
//! │  Listener: declare_queue / bind / consume / cancel / ack /  │
//! │            nack                                             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                  │
//!          ▼                                  ▼
//! ┌─────────────────┐              ┌─────────────────────────┐
//! │ InMemoryBroker  │              │ AMQP and other clients  │
//! │   (included)    │              │       (external)        │
//! └─────────────────┘              └─────────────────────────┘
//! ```

mod engine;
mod in_memory_broker;
mod transport;

pub use engine::{BrokerBusEngine, DELIVERY_TAG_HEADER, QUEUE_HEADER, TRANSPORT_HEADER_PREFIX};
pub use in_memory_broker::InMemoryBroker;
pub use transport::{
    Delivery, DeliveryStream, Listener, Publisher, Sender, Transport, TransportError,
};
