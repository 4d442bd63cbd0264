//! Typed options bound from the `nybus` configuration section.
//!
//! ```toml
//! [nybus.host]
//! max_concurrency = 4
//!
//! [[nybus.command_error_filters]]
//! type = "retry"
//! max_retries = 3
//!
//! [[nybus.command_error_filters]]
//! type = "dead-letter"
//! queue = "orders.errors"
//!
//! [[nybus.event_error_filters]]
//! type = "discard"
//! ```
//!
//! Environment variables override the file, with `__` as the section
//! separator: `NYBUS__HOST__MAX_CONCURRENCY=8`.

use std::num::NonZeroUsize;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::ConcurrencyPolicy;

/// Name of the configuration section the bus binds.
pub const SECTION: &str = "nybus";

/// Error raised while loading or applying configuration.
///
/// Configuration problems fail at setup time; nothing is silently defaulted.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] ConfigError),
    #[error("max_retries must be zero or positive, got {0}")]
    InvalidMaxRetries(i64),
    #[error("no error filter provider named `{0}`")]
    UnknownFilterProvider(String),
    #[error("invalid settings for error filter provider `{provider}`: {message}")]
    InvalidFilterSettings { provider: String, message: String },
    #[error("host.max_concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),
}

/// Root of the `nybus` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NybusOptions {
    /// Error filters applied, in order, when a command handler fails.
    pub command_error_filters: Vec<FilterConfiguration>,
    /// Error filters applied, in order, when an event handler fails.
    pub event_error_filters: Vec<FilterConfiguration>,
    pub host: HostOptions,
    pub in_memory: InMemoryOptions,
    pub broker: BrokerOptions,
    pub logging: LoggingOptions,
}

/// One entry of an error filter chain: a provider name plus its settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfiguration {
    #[serde(rename = "type")]
    pub provider: String,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl FilterConfiguration {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    /// Messages handled at the same time. 1 keeps delivery order.
    pub max_concurrency: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self { max_concurrency: 1 }
    }
}

impl HostOptions {
    pub fn concurrency(&self) -> Result<ConcurrencyPolicy, ConfigurationError> {
        match NonZeroUsize::new(self.max_concurrency) {
            None => Err(ConfigurationError::InvalidConcurrency),
            Some(n) if n.get() == 1 => Ok(ConcurrencyPolicy::Sequential),
            Some(n) => Ok(ConcurrencyPolicy::Concurrent(n)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryOptions {
    /// Buffer of the broadcast channel. Slow receivers past it lose messages.
    pub capacity: usize,
    /// Entries kept per traffic log (sent, settled, each error queue).
    /// The oldest entry is dropped past the limit; `0` turns recording off.
    pub record_limit: usize,
}

impl Default for InMemoryOptions {
    fn default() -> Self {
        Self {
            capacity: 1024,
            record_limit: 1024,
        }
    }
}

/// Wire framing for broker messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Binary,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// Queue shared by every process handling commands.
    pub command_queue: String,
    /// Queue for this process's events. Generated per engine when unset.
    pub event_queue: Option<String>,
    /// Ask the broker to redeliver messages rejected with `notify_fail`.
    pub requeue_on_fail: bool,
    pub frame_format: FrameFormat,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            command_queue: "nybus.commands".to_string(),
            event_queue: None,
            requeue_on_fail: false,
            frame_format: FrameFormat::Binary,
        }
    }
}

/// Output format for [`init_tracing`](crate::logging::init_tracing).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    pub format: LogFormat,
    /// Filter directive used when neither `NYBUS_LOG` nor `RUST_LOG` is set.
    pub filter: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            filter: "info".to_string(),
        }
    }
}

impl NybusOptions {
    /// Load options from an optional file, overridden by environment variables.
    ///
    /// A missing file or a missing `nybus` section yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()?;
        Self::bind(&config)
    }

    /// Parse options from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigurationError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Self::bind(&config)
    }

    fn bind(config: &Config) -> Result<Self, ConfigurationError> {
        let options = match config.get::<NybusOptions>(SECTION) {
            Ok(options) => options,
            Err(ConfigError::NotFound(_)) => NybusOptions::default(),
            Err(err) => return Err(err.into()),
        };
        options.validate()?;
        Ok(options)
    }

    /// Check values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.host.concurrency()?;
        Ok(())
    }
}
