//! Typed commands and events over pluggable transport engines.
//!
//! Payload types derive [`Command`] or [`Event`]; a [`BusBuilder`] wires
//! handlers to an engine; the resulting [`BusHost`] drains the engine stream
//! into handlers and routes failures through an [`ErrorPipeline`].

extern crate self as nybus;

pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
mod error;
pub mod filters;
pub mod logging;
pub mod message;
pub mod registry;
pub mod serializer;

pub use nybus_macros::{Command, Event};

pub use bus::{
    BusBuilder, BusHost, CommandContext, CommandHandler, ConcurrencyPolicy, DelegateHandler,
    Dispatcher, EventContext, EventHandler, HostStats, ResolveError, ResolverScope,
    ServiceRegistry, ServiceResolver,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigurationError, FilterConfiguration, NybusOptions};
pub use engine::{
    BusEngine, BusEngineExt, EngineError, InMemoryBusEngine, MessageStream, Subscription,
    SubscriptionTable,
};
pub use error::{BusError, DispatchError, MissingHandlerError};
pub use filters::{
    DeadLetterErrorFilter, DiscardErrorFilter, ErrorContext, ErrorFilter, ErrorFilterProvider,
    ErrorFilterProviders, ErrorPipeline, FallbackErrorFilter, Next, RetryErrorFilter,
};
pub use logging::init_tracing;
pub use message::{
    Command, CommandMessage, DescriptorError, Envelope, EnvelopeError, Event, EventMessage,
    Headers, Message, MessageDescriptor, MessageType, Payload,
};
pub use registry::{MessageDescriptorStore, RegistryError};
pub use serializer::{JsonSerializer, SerializationError, Serializer};

#[cfg(feature = "broker")]
pub use engine::broker::{BrokerBusEngine, InMemoryBroker, TransportError};
