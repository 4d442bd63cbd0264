use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{ErrorContext, ErrorFilter, Next};
use crate::message::Headers;

pub const DEFAULT_ERROR_QUEUE: &str = "nybus.errors";

/// Settings of the `dead-letter` provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeadLetterFilterOptions {
    pub queue: String,
}

impl Default for DeadLetterFilterOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_ERROR_QUEUE.to_string(),
        }
    }
}

/// Forwards failed messages to an error queue, decorated with fault headers.
///
/// The original delivery is rejected once the copy is queued. If the error
/// queue cannot be reached the failure moves on down the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetterErrorFilter {
    queue: String,
}

impl DeadLetterErrorFilter {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl From<DeadLetterFilterOptions> for DeadLetterErrorFilter {
    fn from(options: DeadLetterFilterOptions) -> Self {
        Self::new(options.queue)
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[async_trait]
impl ErrorFilter for DeadLetterErrorFilter {
    async fn handle_error(&self, context: &ErrorContext, next: Next<'_>) {
        let mut message = context.message().clone();
        let headers = message.headers_mut();
        headers.insert(Headers::EXCEPTION_MESSAGE, context.error().to_string());
        headers.insert(Headers::EXCEPTION_STACK_TRACE, format!("{:?}", context.error()));
        headers.insert(Headers::FAILED_ON, context.now().to_rfc3339());
        headers.insert(Headers::HOST, host_name());
        headers.insert(Headers::PROCESS_ID, std::process::id().to_string());

        let message_id = context.message().message_id();
        match context.engine().send_to_error_queue(&self.queue, message).await {
            Ok(()) => {
                info!(message_id, queue = %self.queue, "message moved to error queue");
                if let Err(err) = context.notify_fail().await {
                    warn!(message_id, error = %err, "failed to reject dead-lettered message");
                    next.run(context).await
                }
            }
            Err(err) => {
                error!(message_id, queue = %self.queue, error = %err, "failed to reach error queue");
                next.run(context).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryBusEngine;
    use crate::filters::tests::{failed, failed_on, Unreliable};
    use crate::filters::ErrorPipeline;
    use std::sync::Arc;

    #[tokio::test]
    async fn forwards_with_fault_headers() {
        let engine = Arc::new(InMemoryBusEngine::new());
        let context = failed(&engine, Some(2));

        DeadLetterErrorFilter::new("billing.errors")
            .handle_error(&context, Next::end())
            .await;

        let queued = engine.error_queue("billing.errors");
        assert_eq!(queued.len(), 1);
        let headers = queued[0].headers();
        assert_eq!(headers.get(Headers::EXCEPTION_MESSAGE), Some("card declined"));
        assert!(headers.contains(Headers::EXCEPTION_STACK_TRACE));
        assert!(headers.contains(Headers::FAILED_ON));
        assert!(headers.contains(Headers::HOST));
        assert_eq!(
            headers.get(Headers::PROCESS_ID),
            Some(std::process::id().to_string().as_str())
        );
        assert_eq!(headers.retry_count(), 2);
        assert_eq!(engine.rejected().len(), 1);
    }

    #[test]
    fn options_default_queue() {
        let filter = DeadLetterErrorFilter::from(DeadLetterFilterOptions::default());
        assert_eq!(filter.queue(), DEFAULT_ERROR_QUEUE);
    }

    #[tokio::test]
    async fn unreachable_error_queue_falls_through_to_the_fallback() {
        let engine = Unreliable::failing_rejections(0);
        let pipeline = ErrorPipeline::new(vec![Arc::new(DeadLetterErrorFilter::new("billing.errors"))]);

        let context = failed_on(engine.clone(), None);
        pipeline.handle(&context).await;

        assert!(context.is_settled());
        assert_eq!(engine.dead_lettered(), 0);
        assert_eq!(engine.rejected(), 1);
    }

    #[tokio::test]
    async fn failed_rejection_after_forwarding_reaches_the_fallback() {
        let engine = Unreliable::with_error_queue(1);
        let pipeline = ErrorPipeline::new(vec![Arc::new(DeadLetterErrorFilter::new("billing.errors"))]);

        let context = failed_on(engine.clone(), None);
        pipeline.handle(&context).await;

        assert!(context.is_settled());
        assert_eq!(engine.dead_lettered(), 1);
        assert_eq!(engine.rejected(), 1);
    }
}
