//! Tracing subscriber setup for applications hosting a bus.

use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingOptions};

const LOG_ENV: &str = "NYBUS_LOG";

/// Install a global tracing subscriber.
///
/// The filter comes from `NYBUS_LOG`, then `RUST_LOG`, then
/// [`LoggingOptions::filter`]. Calling this more than once is harmless: only
/// the first subscriber is installed.
pub fn init_tracing(options: &LoggingOptions) {
    let filter = build_filter(options);

    let fmt_layer = match options.format {
        LogFormat::Json => fmt::layer().with_target(false).json().boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).pretty().boxed(),
        LogFormat::Compact => fmt::layer().with_target(true).compact().boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        info!(format = ?options.format, "tracing initialised");
    }
}

fn build_filter(options: &LoggingOptions) -> EnvFilter {
    let directive = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| options.filter.clone());

    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter `{directive}` ({err}); falling back to `info`");
        EnvFilter::new("info")
    })
}
