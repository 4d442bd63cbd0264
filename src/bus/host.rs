//! The host: drains the engine stream into handlers and settles every message.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::dispatcher::Dispatcher;
use super::handler::MessageHandler;
use crate::clock::Clock;
use crate::engine::{BusEngine, MessageStream};
use crate::error::{BusError, MissingHandlerError};
use crate::filters::{ErrorContext, ErrorPipeline};
use crate::message::{Message, MessageType};

/// How many messages the host handles at the same time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// One message at a time, in stream order.
    #[default]
    Sequential,
    /// Up to `n` messages in flight. Order across messages is not kept.
    Concurrent(NonZeroUsize),
}

/// Counters reported by [`BusHost::stop`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Messages taken off the engine stream.
    pub received: usize,
    /// Messages whose handler succeeded.
    pub handled: usize,
    /// Messages whose handler failed or panicked.
    pub failed: usize,
    /// Messages with no registered handler.
    pub missing_handler: usize,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicUsize,
    handled: AtomicUsize,
    failed: AtomicUsize,
    missing_handler: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> HostStats {
        HostStats {
            received: self.received.load(Ordering::SeqCst),
            handled: self.handled.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            missing_handler: self.missing_handler.load(Ordering::SeqCst),
        }
    }
}

pub(crate) type HandlerKey = (MessageType, TypeId);

pub(crate) struct HostParts {
    pub(crate) engine: Arc<dyn BusEngine>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) handlers: HashMap<HandlerKey, Arc<dyn MessageHandler>>,
    pub(crate) command_pipeline: ErrorPipeline,
    pub(crate) event_pipeline: ErrorPipeline,
    pub(crate) concurrency: ConcurrencyPolicy,
}

struct HostInner {
    engine: Arc<dyn BusEngine>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    handlers: HashMap<HandlerKey, Arc<dyn MessageHandler>>,
    command_pipeline: ErrorPipeline,
    event_pipeline: ErrorPipeline,
    concurrency: ConcurrencyPolicy,
    counters: Counters,
}

/// A built bus, ready to start. Created by [`BusBuilder`](super::BusBuilder).
pub struct BusHost {
    inner: Arc<HostInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusHost {
    pub(crate) fn new(parts: HostParts) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&parts.engine), Arc::clone(&parts.clock));
        Self {
            inner: Arc::new(HostInner {
                engine: parts.engine,
                clock: parts.clock,
                dispatcher,
                handlers: parts.handlers,
                command_pipeline: parts.command_pipeline,
                event_pipeline: parts.event_pipeline,
                concurrency: parts.concurrency,
                counters: Counters::default(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Dispatcher bound to this host's engine and clock.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn engine(&self) -> &Arc<dyn BusEngine> {
        &self.inner.engine
    }

    pub fn concurrency(&self) -> ConcurrencyPolicy {
        self.inner.concurrency
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn stats(&self) -> HostStats {
        self.inner.counters.snapshot()
    }

    /// Start the engine and spawn the dispatch loop on the current runtime.
    pub async fn start(&self) -> Result<(), BusError> {
        if self.is_running() {
            return Err(BusError::AlreadyStarted);
        }

        let stream = self.inner.engine.start().await?;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(stream));

        let mut task = self.task.lock();
        if task.is_some() {
            handle.abort();
            return Err(BusError::AlreadyStarted);
        }
        *task = Some(handle);

        info!(
            handlers = self.inner.handlers.len(),
            concurrency = ?self.inner.concurrency,
            "bus host started"
        );
        Ok(())
    }

    /// Stop the engine and wait for in-flight messages to finish.
    ///
    /// Safe to call on a host that was never started.
    pub async fn stop(&self) -> Result<HostStats, BusError> {
        let task = self.task.lock().take();
        self.inner.engine.stop().await?;

        if let Some(task) = task {
            task.await
                .map_err(|err| BusError::DispatchLoop(err.to_string()))?;
        }

        let stats = self.stats();
        info!(?stats, "bus host stopped");
        Ok(stats)
    }
}

impl Drop for BusHost {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for BusHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusHost")
            .field("handlers", &self.inner.handlers.len())
            .field("concurrency", &self.inner.concurrency)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl HostInner {
    async fn run(self: Arc<Self>, stream: MessageStream) {
        match self.concurrency {
            ConcurrencyPolicy::Sequential => {
                let mut stream = stream;
                while let Some(message) = stream.next().await {
                    self.process(message).await;
                }
            }
            ConcurrencyPolicy::Concurrent(limit) => {
                let this = &self;
                stream
                    .for_each_concurrent(limit.get(), |message| this.process(message))
                    .await;
            }
        }
        debug!("engine stream completed");
    }

    fn pipeline(&self, message_type: MessageType) -> &ErrorPipeline {
        match message_type {
            MessageType::Command => &self.command_pipeline,
            MessageType::Event => &self.event_pipeline,
        }
    }

    async fn process(&self, message: Message) {
        let span = info_span!(
            "nybus.dispatch",
            message_id = message.message_id(),
            message_type = %message.message_type(),
            descriptor = %message.descriptor(),
            retry_count = message.retry_count(),
        );
        self.dispatch(message).instrument(span).await
    }

    async fn dispatch(&self, message: Message) {
        self.counters.received.fetch_add(1, Ordering::SeqCst);
        let received_on = self.clock.now();
        let message_type = message.message_type();

        let Some(handler) = self.handlers.get(&(message_type, message.type_id())) else {
            self.counters.missing_handler.fetch_add(1, Ordering::SeqCst);
            let missing = MissingHandlerError {
                message_type,
                descriptor: message.descriptor().clone(),
                type_name: message.type_name(),
            };
            warn!(error = %missing, "rejecting message without handler");
            let context = self.error_context(message, missing.into());
            self.pipeline(message_type).fallback(&context).await;
            return;
        };

        let outcome = AssertUnwindSafe(handler.handle(&self.dispatcher, &message, received_on))
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(())) => {
                self.counters.handled.fetch_add(1, Ordering::SeqCst);
                debug!("message handled");
                if let Err(err) = self.engine.notify_success(&message).await {
                    error!(error = %err, "failed to acknowledge message");
                }
                return;
            }
            Ok(Err(err)) => err,
            Err(panic) => anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        warn!(error = %error, "handler failed");
        let context = self.error_context(message, error);
        self.pipeline(message_type).handle(&context).await;
    }

    fn error_context(&self, message: Message, error: anyhow::Error) -> ErrorContext {
        ErrorContext::new(
            message,
            error,
            Arc::clone(&self.engine),
            Arc::clone(&self.clock),
        )
    }
}
