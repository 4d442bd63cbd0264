//! Error filter pipeline run when a handler fails.
//!
//! ```text
//!  handler error
//!       │
//!       ▼
//!  ┌─────────┐  next  ┌─────────────┐  next  ┌──────────┐
//!  │  retry  │ ─────▶ │ dead-letter │ ─────▶ │ fallback │  (always last)
//!  └─────────┘        └─────────────┘        └──────────┘
//!    resend             forward to             notify_fail
//!    + ack              error queue
//! ```
//!
//! Each filter either settles the failure through the engine or hands it to
//! the rest of the chain. The fallback filter guarantees that every failure
//! ends in an explicit transport rejection.

mod dead_letter;
mod discard;
mod fallback;
mod provider;
mod retry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::clock::Clock;
use crate::engine::{BusEngine, EngineError};
use crate::message::Message;

pub use dead_letter::{DeadLetterErrorFilter, DeadLetterFilterOptions, DEFAULT_ERROR_QUEUE};
pub use discard::DiscardErrorFilter;
pub use fallback::FallbackErrorFilter;
pub use provider::{
    DeadLetterFilterProvider, DiscardFilterProvider, ErrorFilterProvider, ErrorFilterProviders,
    RetryFilterProvider,
};
pub use retry::{RetryErrorFilter, RetryFilterOptions};

/// One link of an error pipeline.
#[async_trait]
pub trait ErrorFilter: Send + Sync {
    /// Settle the failure or pass it on with `next.run(context)`.
    async fn handle_error(&self, context: &ErrorContext, next: Next<'_>);
}

/// Continuation to the rest of the chain.
pub struct Next<'a> {
    filters: &'a [Arc<dyn ErrorFilter>],
}

impl<'a> Next<'a> {
    /// A continuation with nothing left to run.
    pub fn end() -> Self {
        Self { filters: &[] }
    }

    pub async fn run(self, context: &ErrorContext) {
        if let Some((filter, rest)) = self.filters.split_first() {
            filter.handle_error(context, Next { filters: rest }).await;
        }
    }
}

/// A failed message together with what filters need to settle it.
pub struct ErrorContext {
    message: Message,
    error: anyhow::Error,
    engine: Arc<dyn BusEngine>,
    clock: Arc<dyn Clock>,
    settled: AtomicBool,
}

impl ErrorContext {
    pub fn new(
        message: Message,
        error: anyhow::Error,
        engine: Arc<dyn BusEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            message,
            error,
            engine,
            clock,
            settled: AtomicBool::new(false),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn engine(&self) -> &Arc<dyn BusEngine> {
        &self.engine
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether the transport delivery was already acked or rejected.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    /// Acknowledge the received delivery. No-op once settled.
    pub async fn notify_success(&self) -> Result<(), EngineError> {
        if !self.claim() {
            return Ok(());
        }
        let result = self.engine.notify_success(&self.message).await;
        self.release_on_error(result)
    }

    /// Reject the received delivery. No-op once settled.
    pub async fn notify_fail(&self) -> Result<(), EngineError> {
        if !self.claim() {
            return Ok(());
        }
        let result = self.engine.notify_fail(&self.message).await;
        self.release_on_error(result)
    }

    fn claim(&self) -> bool {
        let claimed = self
            .settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !claimed {
            trace!(message_id = self.message.message_id(), "delivery already settled");
        }
        claimed
    }

    // A failed settlement leaves the delivery open for the next filter.
    fn release_on_error(&self, result: Result<(), EngineError>) -> Result<(), EngineError> {
        if result.is_err() {
            self.settled.store(false, Ordering::SeqCst);
        }
        result
    }
}

impl fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("message", &self.message)
            .field("error", &self.error)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}

/// Ordered error filters, terminated by a [`FallbackErrorFilter`].
#[derive(Clone)]
pub struct ErrorPipeline {
    filters: Arc<[Arc<dyn ErrorFilter>]>,
}

impl Default for ErrorPipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ErrorPipeline {
    pub fn new(mut filters: Vec<Arc<dyn ErrorFilter>>) -> Self {
        filters.push(Arc::new(FallbackErrorFilter));
        Self {
            filters: filters.into(),
        }
    }

    /// Number of filters, fallback included.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the whole chain.
    pub async fn handle(&self, context: &ErrorContext) {
        Next {
            filters: &self.filters,
        }
        .run(context)
        .await
    }

    /// Skip the configured filters and reject directly.
    pub async fn fallback(&self, context: &ErrorContext) {
        FallbackErrorFilter.handle_error(context, Next::end()).await
    }
}

impl fmt::Debug for ErrorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPipeline")
            .field("filters", &self.filters.len())
            .finish()
    }
}
