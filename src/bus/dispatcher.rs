//! Outbound side of the bus: typed commands and events into the engine.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::BusEngine;
use crate::error::DispatchError;
use crate::message::{Command, CommandMessage, Event, EventMessage, Headers, Message};

/// Sends commands and raises events.
///
/// Every outbound message is stamped with `CorrelationId` and `SentOn`.
/// Handlers receive a dispatcher so handling one message can produce more;
/// correlation is not carried over implicitly, pass
/// `context.correlation_id()` to keep a causal chain.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn BusEngine>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn BusEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    pub async fn invoke_command<T: Command>(&self, command: T) -> Result<(), DispatchError> {
        self.invoke_command_with_correlation(command, None).await
    }

    /// Send a command, reusing `correlation_id` when given.
    pub async fn invoke_command_with_correlation<T: Command>(
        &self,
        command: T,
        correlation_id: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        let mut message = CommandMessage::new(command);
        self.stamp(message.headers_mut(), correlation_id);
        self.send(message.into()).await
    }

    pub async fn raise_event<T: Event>(&self, event: T) -> Result<(), DispatchError> {
        self.raise_event_with_correlation(event, None).await
    }

    /// Raise an event, reusing `correlation_id` when given.
    pub async fn raise_event_with_correlation<T: Event>(
        &self,
        event: T,
        correlation_id: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        let mut message = EventMessage::new(event);
        self.stamp(message.headers_mut(), correlation_id);
        self.send(message.into()).await
    }

    fn stamp(&self, headers: &mut Headers, correlation_id: Option<Uuid>) {
        headers.set_correlation_id(correlation_id.unwrap_or_else(Uuid::new_v4));
        headers.set_sent_on(self.clock.now());
    }

    async fn send(&self, message: Message) -> Result<(), DispatchError> {
        let message_type = message.message_type();
        let descriptor = message.descriptor().clone();
        debug!(
            message_id = message.message_id(),
            %descriptor,
            %message_type,
            "dispatching message"
        );

        self.engine
            .send_message(message)
            .await
            .map_err(|source| DispatchError {
                message_type,
                descriptor,
                source,
            })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
