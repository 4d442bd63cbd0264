//! Composition root for a bus host.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::context::{CommandContext, EventContext};
use super::dispatcher::Dispatcher;
use super::handler::{
    CommandHandler, CommandHandlerAdapter, DelegateHandler, EventHandler, EventHandlerAdapter,
    MessageHandler, ResolvedCommandHandler, ResolvedEventHandler,
};
use super::host::{BusHost, ConcurrencyPolicy, HostParts};
use super::resolver::ServiceResolver;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigurationError, NybusOptions};
use crate::engine::{BusEngine, Subscription};
use crate::error::BusError;
use crate::filters::{ErrorFilter, ErrorFilterProviders, ErrorPipeline};
use crate::message::{Command, Event};

type ResolvedFactory = fn(Arc<dyn ServiceResolver>) -> Arc<dyn MessageHandler>;

enum HandlerSource {
    Ready(Arc<dyn MessageHandler>),
    Resolved(ResolvedFactory),
}

struct Registration {
    subscription: Subscription,
    source: HandlerSource,
}

/// Collects handlers, filters and dependencies, then builds a [`BusHost`].
///
/// Registration errors are collected and reported by [`build`](Self::build).
///
/// ```no_run
/// use std::sync::Arc;
/// use nybus::{BusBuilder, CommandContext, Dispatcher, InMemoryBusEngine};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, nybus::Command)]
/// #[message(namespace = "Shop", name = "PlaceOrder")]
/// struct PlaceOrder {
///     id: u32,
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let host = BusBuilder::new(Arc::new(InMemoryBusEngine::new()))
///     .subscribe_to_command_with(|_: Dispatcher, context: CommandContext<PlaceOrder>| async move {
///         println!("placing order {}", context.command().id);
///         Ok(())
///     })
///     .build()?;
///
/// host.start().await?;
/// host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await?;
/// host.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct BusBuilder {
    engine: Arc<dyn BusEngine>,
    clock: Arc<dyn Clock>,
    resolver: Option<Arc<dyn ServiceResolver>>,
    concurrency: ConcurrencyPolicy,
    registrations: Vec<Registration>,
    command_filters: Vec<Arc<dyn ErrorFilter>>,
    event_filters: Vec<Arc<dyn ErrorFilter>>,
    error: Option<BusError>,
}

impl BusBuilder {
    pub fn new(engine: Arc<dyn BusEngine>) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            resolver: None,
            concurrency: ConcurrencyPolicy::default(),
            registrations: Vec::new(),
            command_filters: Vec::new(),
            event_filters: Vec::new(),
            error: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolver used by `subscribe_to_*_resolved` handlers.
    pub fn with_resolver(mut self, resolver: Arc<dyn ServiceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Apply the host section and build both error chains from configuration.
    ///
    /// Configured filters are appended after any added with
    /// `with_*_error_filter`.
    pub fn configure(mut self, options: &NybusOptions, providers: &ErrorFilterProviders) -> Self {
        let configured = options.host.concurrency().and_then(|concurrency| {
            let commands = providers.create_filters(&options.command_error_filters)?;
            let events = providers.create_filters(&options.event_error_filters)?;
            Ok((concurrency, commands, events))
        });

        match configured {
            Ok((concurrency, commands, events)) => {
                self.concurrency = concurrency;
                self.command_filters.extend(commands);
                self.event_filters.extend(events);
            }
            Err(err) => self.fail(err.into()),
        }
        self
    }

    pub fn with_command_error_filter(mut self, filter: impl ErrorFilter + 'static) -> Self {
        self.command_filters.push(Arc::new(filter));
        self
    }

    pub fn with_event_error_filter(mut self, filter: impl ErrorFilter + 'static) -> Self {
        self.event_filters.push(Arc::new(filter));
        self
    }

    pub fn subscribe_to_command<T, H>(mut self, handler: H) -> Self
    where
        T: Command,
        H: CommandHandler<T> + 'static,
    {
        let handler = Arc::new(CommandHandlerAdapter::<T, H>::new(handler));
        self.register(Subscription::command::<T>(), HandlerSource::Ready(handler));
        self
    }

    /// Register an async closure as the handler for `T`.
    pub fn subscribe_to_command_with<T, F, Fut>(self, handler: F) -> Self
    where
        T: Command,
        F: Fn(Dispatcher, CommandContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_to_command::<T, _>(DelegateHandler::new(handler))
    }

    /// Resolve a fresh `H` from the resolver for every command of type `T`.
    pub fn subscribe_to_command_resolved<T, H>(mut self) -> Self
    where
        T: Command,
        H: CommandHandler<T> + Any + 'static,
    {
        self.register(
            Subscription::command::<T>(),
            HandlerSource::Resolved(ResolvedCommandHandler::<T, H>::erased),
        );
        self
    }

    pub fn subscribe_to_event<T, H>(mut self, handler: H) -> Self
    where
        T: Event,
        H: EventHandler<T> + 'static,
    {
        let handler = Arc::new(EventHandlerAdapter::<T, H>::new(handler));
        self.register(Subscription::event::<T>(), HandlerSource::Ready(handler));
        self
    }

    pub fn subscribe_to_event_with<T, F, Fut>(self, handler: F) -> Self
    where
        T: Event,
        F: Fn(Dispatcher, EventContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_to_event::<T, _>(DelegateHandler::new(handler))
    }

    pub fn subscribe_to_event_resolved<T, H>(mut self) -> Self
    where
        T: Event,
        H: EventHandler<T> + Any + 'static,
    {
        self.register(
            Subscription::event::<T>(),
            HandlerSource::Resolved(ResolvedEventHandler::<T, H>::erased),
        );
        self
    }

    fn register(&mut self, subscription: Subscription, source: HandlerSource) {
        let duplicate = self.registrations.iter().any(|existing| {
            existing.subscription.message_type() == subscription.message_type()
                && existing.subscription.type_id() == subscription.type_id()
        });
        if duplicate {
            self.fail(BusError::DuplicateHandler(subscription.type_name()));
            return;
        }
        self.registrations.push(Registration {
            subscription,
            source,
        });
    }

    fn fail(&mut self, error: BusError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Subscribe every handler on the engine and assemble the host.
    pub fn build(self) -> Result<BusHost, BusError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let needs_resolver = self
            .registrations
            .iter()
            .any(|registration| matches!(registration.source, HandlerSource::Resolved(_)));
        if needs_resolver && self.resolver.is_none() {
            return Err(ConfigurationError::MissingDependency("service resolver").into());
        }

        let mut handlers = HashMap::with_capacity(self.registrations.len());
        for Registration {
            subscription,
            source,
        } in self.registrations
        {
            let key = (subscription.message_type(), subscription.type_id());
            let handler = match source {
                HandlerSource::Ready(handler) => handler,
                HandlerSource::Resolved(factory) => match &self.resolver {
                    Some(resolver) => factory(Arc::clone(resolver)),
                    None => return Err(ConfigurationError::MissingDependency("service resolver").into()),
                },
            };

            debug!(
                message_type = %subscription.message_type(),
                descriptor = %subscription.descriptor(),
                type_name = subscription.type_name(),
                "registering handler"
            );
            self.engine.subscribe(subscription)?;
            handlers.insert(key, handler);
        }

        Ok(BusHost::new(HostParts {
            engine: self.engine,
            clock: self.clock,
            handlers,
            command_pipeline: ErrorPipeline::new(self.command_filters),
            event_pipeline: ErrorPipeline::new(self.event_filters),
            concurrency: self.concurrency,
        }))
    }
}
