//! Contexts handed to message handlers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::message::{Command, CommandMessage, Event, EventMessage, Headers};

macro_rules! handler_context {
    ($(#[$meta:meta])* $name:ident, $bound:ident, $message:ident, $accessor:ident) => {
        $(#[$meta])*
        pub struct $name<T: $bound> {
            message: $message<T>,
            received_on: DateTime<Utc>,
            sent_on: DateTime<Utc>,
            correlation_id: Uuid,
        }

        impl<T: $bound> $name<T> {
            /// Build a context for a message received at `received_on`.
            ///
            /// A message without `SentOn` reports its receive time. A message
            /// without `CorrelationId` gets a fresh one.
            pub fn new(message: $message<T>, received_on: DateTime<Utc>) -> Self {
                let headers = message.headers();
                let sent_on = headers.sent_on().unwrap_or(received_on);
                let correlation_id = headers.correlation_id().unwrap_or_else(Uuid::new_v4);
                Self {
                    message,
                    received_on,
                    sent_on,
                    correlation_id,
                }
            }

            pub fn message(&self) -> &$message<T> {
                &self.message
            }

            pub fn $accessor(&self) -> &T {
                self.message.$accessor()
            }

            pub fn headers(&self) -> &Headers {
                self.message.headers()
            }

            pub fn received_on(&self) -> DateTime<Utc> {
                self.received_on
            }

            pub fn sent_on(&self) -> DateTime<Utc> {
                self.sent_on
            }

            pub fn correlation_id(&self) -> Uuid {
                self.correlation_id
            }

            pub fn retry_count(&self) -> u32 {
                self.message.headers().retry_count()
            }
        }

        impl<T: $bound> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    message: self.message.clone(),
                    received_on: self.received_on,
                    sent_on: self.sent_on,
                    correlation_id: self.correlation_id,
                }
            }
        }

        impl<T: $bound + std::fmt::Debug> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("message", &self.message)
                    .field("received_on", &self.received_on)
                    .field("sent_on", &self.sent_on)
                    .field("correlation_id", &self.correlation_id)
                    .finish()
            }
        }
    };
}

handler_context!(
    /// What a command handler sees: the typed command plus delivery metadata.
    CommandContext,
    Command,
    CommandMessage,
    command
);

handler_context!(
    /// What an event handler sees: the typed event plus delivery metadata.
    EventContext,
    Event,
    EventMessage,
    event
);
