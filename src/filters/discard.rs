use async_trait::async_trait;
use tracing::{info, warn};

use super::{ErrorContext, ErrorFilter, Next};

/// Rejects the delivery right away, without retrying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscardErrorFilter;

#[async_trait]
impl ErrorFilter for DiscardErrorFilter {
    async fn handle_error(&self, context: &ErrorContext, next: Next<'_>) {
        let message_id = context.message().message_id();
        match context.notify_fail().await {
            Ok(()) => info!(message_id, error = %context.error(), "message discarded"),
            Err(err) => {
                warn!(message_id, error = %err, "failed to discard message");
                next.run(context).await
            }
        }
    }
}
