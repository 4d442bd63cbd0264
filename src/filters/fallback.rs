use async_trait::async_trait;
use tracing::{debug, error};

use super::{ErrorContext, ErrorFilter, Next};

/// Last link of every pipeline: rejects the delivery unconditionally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FallbackErrorFilter;

#[async_trait]
impl ErrorFilter for FallbackErrorFilter {
    async fn handle_error(&self, context: &ErrorContext, _next: Next<'_>) {
        let message_id = context.message().message_id();
        if context.is_settled() {
            debug!(message_id, "failure already settled");
            return;
        }
        if let Err(err) = context.notify_fail().await {
            error!(message_id, error = %err, "failed to reject message");
        }
    }
}
