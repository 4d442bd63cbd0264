//! Typed and type-erased messages.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::descriptor::MessageDescriptor;
use super::envelope::Envelope;
use super::headers::Headers;
use super::payload::{AnyPayload, Command, Event, Payload};
use crate::serializer::{SerializationError, Serializer};

/// Whether a message carries a command or an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Event,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Command => write!(f, "Command"),
            MessageType::Event => write!(f, "Event"),
        }
    }
}

macro_rules! typed_message {
    ($(#[$meta:meta])* $name:ident, $bound:ident, $accessor:ident, $kind:expr) => {
        $(#[$meta])*
        pub struct $name<T: $bound> {
            message_id: String,
            headers: Headers,
            item: Arc<T>,
        }

        impl<T: $bound> $name<T> {
            /// Wrap a payload in a new message with a fresh message id and no headers.
            pub fn new(item: T) -> Self {
                Self {
                    message_id: Uuid::new_v4().to_string(),
                    headers: Headers::new(),
                    item: Arc::new(item),
                }
            }

            pub(crate) fn from_parts(message_id: String, headers: Headers, item: Arc<T>) -> Self {
                Self {
                    message_id,
                    headers,
                    item,
                }
            }

            pub fn message_id(&self) -> &str {
                &self.message_id
            }

            pub fn headers(&self) -> &Headers {
                &self.headers
            }

            pub fn headers_mut(&mut self) -> &mut Headers {
                &mut self.headers
            }

            pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.headers.insert(key, value);
                self
            }

            pub fn $accessor(&self) -> &T {
                &self.item
            }

            pub fn message_type(&self) -> MessageType {
                $kind
            }

            pub fn descriptor(&self) -> MessageDescriptor {
                T::descriptor()
            }
        }

        impl<T: $bound> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    message_id: self.message_id.clone(),
                    headers: self.headers.clone(),
                    item: Arc::clone(&self.item),
                }
            }
        }

        impl<T: $bound + fmt::Debug> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("message_id", &self.message_id)
                    .field("headers", &self.headers)
                    .field(stringify!($accessor), &self.item)
                    .finish()
            }
        }

        impl<T: $bound> From<$name<T>> for Message {
            fn from(message: $name<T>) -> Self {
                Message {
                    message_id: message.message_id,
                    headers: message.headers,
                    message_type: $kind,
                    descriptor: T::descriptor(),
                    type_id: TypeId::of::<T>(),
                    type_name: std::any::type_name::<T>(),
                    item: message.item,
                }
            }
        }
    };
}

typed_message!(
    /// A command in flight, typed by its payload.
    CommandMessage,
    Command,
    command,
    MessageType::Command
);

typed_message!(
    /// An event in flight, typed by its payload.
    EventMessage,
    Event,
    event,
    MessageType::Event
);

/// A message with its payload type erased.
///
/// This is what engines hand to the dispatch layer. The payload is fixed at
/// construction; headers stay mutable so the error pipeline can record retry
/// and fault state before resending.
#[derive(Clone)]
pub struct Message {
    message_id: String,
    headers: Headers,
    message_type: MessageType,
    descriptor: MessageDescriptor,
    type_id: TypeId,
    type_name: &'static str,
    item: Arc<dyn AnyPayload>,
}

impl Message {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Runtime identity of the payload type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type path of the payload type in this process.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.headers.correlation_id()
    }

    pub fn sent_on(&self) -> Option<DateTime<Utc>> {
        self.headers.sent_on()
    }

    pub fn retry_count(&self) -> u32 {
        self.headers.retry_count()
    }

    /// Borrow the payload if it is a `T`.
    pub fn item<T: Payload>(&self) -> Option<&T> {
        self.item.as_any().downcast_ref::<T>()
    }

    /// Typed view of this message, if it is a command of type `T`.
    pub fn to_command<T: Command>(&self) -> Option<CommandMessage<T>> {
        if self.message_type != MessageType::Command {
            return None;
        }
        let item = Arc::clone(&self.item).into_any().downcast::<T>().ok()?;
        Some(CommandMessage::from_parts(
            self.message_id.clone(),
            self.headers.clone(),
            item,
        ))
    }

    /// Typed view of this message, if it is an event of type `T`.
    pub fn to_event<T: Event>(&self) -> Option<EventMessage<T>> {
        if self.message_type != MessageType::Event {
            return None;
        }
        let item = Arc::clone(&self.item).into_any().downcast::<T>().ok()?;
        Some(EventMessage::from_parts(
            self.message_id.clone(),
            self.headers.clone(),
            item,
        ))
    }

    /// Serialize into the wire form.
    ///
    /// A message without `CorrelationId` leaves with a fresh one, so every
    /// redelivery of it shares the same id.
    pub fn to_envelope(&self, serializer: &dyn Serializer) -> Result<Envelope, SerializationError> {
        let value = self.item.to_value()?;
        let content = serializer.serialize(&value)?;
        let mut headers = self.headers.clone();
        if headers.correlation_id().is_none() {
            headers.set_correlation_id(Uuid::new_v4());
        }
        Ok(Envelope {
            message_id: self.message_id.clone(),
            headers,
            message_type: self.message_type,
            descriptor: self.descriptor.clone(),
            type_name: self.type_name.to_string(),
            content,
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("descriptor", &self.descriptor)
            .field("type_name", &self.type_name)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
