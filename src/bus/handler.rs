//! Handler traits and the type-erased adapters the host dispatches through.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::context::{CommandContext, EventContext};
use super::dispatcher::Dispatcher;
use super::resolver::ServiceResolver;
use crate::message::{Command, Event, Message};

/// Handles commands of type `T`.
///
/// Returning an error hands the message to the command error pipeline.
#[async_trait]
pub trait CommandHandler<T: Command>: Send + Sync {
    async fn handle(&self, dispatcher: &Dispatcher, context: &CommandContext<T>) -> anyhow::Result<()>;
}

/// Handles events of type `T`.
#[async_trait]
pub trait EventHandler<T: Event>: Send + Sync {
    async fn handle(&self, dispatcher: &Dispatcher, context: &EventContext<T>) -> anyhow::Result<()>;
}

/// Wraps an async closure so it can be registered as a handler.
///
/// The closure receives owned clones of the dispatcher and the context, so the
/// returned future can be `'static`.
#[derive(Clone)]
pub struct DelegateHandler<F> {
    delegate: F,
}

impl<F> DelegateHandler<F> {
    pub fn new(delegate: F) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl<T, F, Fut> CommandHandler<T> for DelegateHandler<F>
where
    T: Command,
    F: Fn(Dispatcher, CommandContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, dispatcher: &Dispatcher, context: &CommandContext<T>) -> anyhow::Result<()> {
        (self.delegate)(dispatcher.clone(), context.clone()).await
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler<T> for DelegateHandler<F>
where
    T: Event,
    F: Fn(Dispatcher, EventContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, dispatcher: &Dispatcher, context: &EventContext<T>) -> anyhow::Result<()> {
        (self.delegate)(dispatcher.clone(), context.clone()).await
    }
}

/// A handler with its payload type erased, keyed in the host by type id.
#[async_trait]
pub(crate) trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        message: &Message,
        received_on: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

fn wrong_payload<T>(message: &Message) -> anyhow::Error {
    anyhow!(
        "message {} carries `{}`, expected `{}`",
        message.message_id(),
        message.type_name(),
        std::any::type_name::<T>()
    )
}

pub(crate) struct CommandHandlerAdapter<T, H> {
    handler: H,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> CommandHandlerAdapter<T, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> MessageHandler for CommandHandlerAdapter<T, H>
where
    T: Command,
    H: CommandHandler<T> + 'static,
{
    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        message: &Message,
        received_on: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let typed = message
            .to_command::<T>()
            .ok_or_else(|| wrong_payload::<T>(message))?;
        let context = CommandContext::new(typed, received_on);
        self.handler.handle(dispatcher, &context).await
    }
}

pub(crate) struct EventHandlerAdapter<T, H> {
    handler: H,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> EventHandlerAdapter<T, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> MessageHandler for EventHandlerAdapter<T, H>
where
    T: Event,
    H: EventHandler<T> + 'static,
{
    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        message: &Message,
        received_on: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let typed = message
            .to_event::<T>()
            .ok_or_else(|| wrong_payload::<T>(message))?;
        let context = EventContext::new(typed, received_on);
        self.handler.handle(dispatcher, &context).await
    }
}

/// Resolves a fresh `H` from a per-message scope and releases it afterwards.
pub(crate) struct ResolvedCommandHandler<T, H> {
    resolver: Arc<dyn ServiceResolver>,
    _types: PhantomData<fn() -> (T, H)>,
}

impl<T, H> ResolvedCommandHandler<T, H>
where
    T: Command,
    H: CommandHandler<T> + 'static,
{
    pub(crate) fn erased(resolver: Arc<dyn ServiceResolver>) -> Arc<dyn MessageHandler> {
        Arc::new(Self {
            resolver,
            _types: PhantomData,
        })
    }
}

#[async_trait]
impl<T, H> MessageHandler for ResolvedCommandHandler<T, H>
where
    T: Command,
    H: CommandHandler<T> + 'static,
{
    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        message: &Message,
        received_on: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let typed = message
            .to_command::<T>()
            .ok_or_else(|| wrong_payload::<T>(message))?;
        let context = CommandContext::new(typed, received_on);

        let mut scope = self.resolver.begin_scope();
        let handler = scope.resolve::<H>()?;
        let result = handler.handle(dispatcher, &context).await;
        scope.release(handler);
        result
    }
}

pub(crate) struct ResolvedEventHandler<T, H> {
    resolver: Arc<dyn ServiceResolver>,
    _types: PhantomData<fn() -> (T, H)>,
}

impl<T, H> ResolvedEventHandler<T, H>
where
    T: Event,
    H: EventHandler<T> + 'static,
{
    pub(crate) fn erased(resolver: Arc<dyn ServiceResolver>) -> Arc<dyn MessageHandler> {
        Arc::new(Self {
            resolver,
            _types: PhantomData,
        })
    }
}

#[async_trait]
impl<T, H> MessageHandler for ResolvedEventHandler<T, H>
where
    T: Event,
    H: EventHandler<T> + 'static,
{
    async fn handle(
        &self,
        dispatcher: &Dispatcher,
        message: &Message,
        received_on: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let typed = message
            .to_event::<T>()
            .ok_or_else(|| wrong_payload::<T>(message))?;
        let context = EventContext::new(typed, received_on);

        let mut scope = self.resolver.begin_scope();
        let handler = scope.resolve::<H>()?;
        let result = handler.handle(dispatcher, &context).await;
        scope.release(handler);
        result
    }
}
