use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{ErrorContext, ErrorFilter, Next};
use crate::config::ConfigurationError;

/// Settings of the `retry` provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFilterOptions {
    pub max_retries: i64,
}

/// Resends a failed message until its retry count reaches `max_retries`.
///
/// A message arriving with `RetryCount = n < max_retries` is resent with
/// `n + 1` and the original delivery is acked. Once the count reaches the
/// maximum the delivery is rejected and the rest of the chain runs.
/// `max_retries = 0` never resends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryErrorFilter {
    max_retries: u32,
}

impl RetryErrorFilter {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn from_options(options: &RetryFilterOptions) -> Result<Self, ConfigurationError> {
        u32::try_from(options.max_retries)
            .map(Self::new)
            .map_err(|_| ConfigurationError::InvalidMaxRetries(options.max_retries))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[async_trait]
impl ErrorFilter for RetryErrorFilter {
    async fn handle_error(&self, context: &ErrorContext, next: Next<'_>) {
        let message = context.message();
        let retry_count = message.retry_count();

        if retry_count < self.max_retries {
            let mut retry = message.clone();
            retry.headers_mut().set_retry_count(retry_count + 1);

            match context.engine().send_message(retry).await {
                Ok(()) => {
                    info!(
                        message_id = message.message_id(),
                        descriptor = %message.descriptor(),
                        retry_count = retry_count + 1,
                        max_retries = self.max_retries,
                        "message scheduled for retry"
                    );
                    if let Err(err) = context.notify_success().await {
                        warn!(message_id = message.message_id(), error = %err, "failed to ack retried delivery");
                    }
                    return;
                }
                Err(err) => {
                    error!(message_id = message.message_id(), error = %err, "failed to resend message");
                    return next.run(context).await;
                }
            }
        }

        warn!(
            message_id = message.message_id(),
            descriptor = %message.descriptor(),
            retry_count,
            error = %context.error(),
            "retries exhausted"
        );
        if let Err(err) = context.notify_fail().await {
            warn!(message_id = message.message_id(), error = %err, "failed to reject message");
        }
        next.run(context).await
    }
}
