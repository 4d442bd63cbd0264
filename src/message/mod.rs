//! Message model: descriptors, headers, typed and erased messages, envelopes.

mod descriptor;
mod envelope;
mod headers;
#[allow(clippy::module_inception)]
mod message;
mod payload;

pub use descriptor::{DescriptorError, MessageDescriptor};
pub use envelope::{Envelope, EnvelopeError};
pub use headers::Headers;
pub use message::{CommandMessage, EventMessage, Message, MessageType};
pub use payload::{Command, Event, Payload};
