//! Named factories turning configuration entries into error filters.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{
    DeadLetterErrorFilter, DeadLetterFilterOptions, DiscardErrorFilter, ErrorFilter, ErrorPipeline,
    RetryErrorFilter, RetryFilterOptions,
};
use crate::config::{ConfigurationError, FilterConfiguration};

/// Builds an error filter from the settings of one configuration entry.
pub trait ErrorFilterProvider: Send + Sync {
    /// Value of `type` selecting this provider.
    fn provider_name(&self) -> &str;

    fn create_filter(&self, settings: &Map<String, Value>) -> Result<Arc<dyn ErrorFilter>, ConfigurationError>;
}

fn parse_settings<T: DeserializeOwned>(
    provider: &str,
    settings: &Map<String, Value>,
) -> Result<T, ConfigurationError> {
    serde_json::from_value(Value::Object(settings.clone())).map_err(|err| {
        ConfigurationError::InvalidFilterSettings {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    })
}

/// `type = "retry"`, requires `max_retries`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryFilterProvider;

impl ErrorFilterProvider for RetryFilterProvider {
    fn provider_name(&self) -> &str {
        "retry"
    }

    fn create_filter(&self, settings: &Map<String, Value>) -> Result<Arc<dyn ErrorFilter>, ConfigurationError> {
        let options: RetryFilterOptions = parse_settings(self.provider_name(), settings)?;
        Ok(Arc::new(RetryErrorFilter::from_options(&options)?))
    }
}

/// `type = "discard"`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardFilterProvider;

impl ErrorFilterProvider for DiscardFilterProvider {
    fn provider_name(&self) -> &str {
        "discard"
    }

    fn create_filter(&self, _settings: &Map<String, Value>) -> Result<Arc<dyn ErrorFilter>, ConfigurationError> {
        Ok(Arc::new(DiscardErrorFilter))
    }
}

/// `type = "dead-letter"`, optional `queue`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeadLetterFilterProvider;

impl ErrorFilterProvider for DeadLetterFilterProvider {
    fn provider_name(&self) -> &str {
        "dead-letter"
    }

    fn create_filter(&self, settings: &Map<String, Value>) -> Result<Arc<dyn ErrorFilter>, ConfigurationError> {
        let options: DeadLetterFilterOptions = parse_settings(self.provider_name(), settings)?;
        Ok(Arc::new(DeadLetterErrorFilter::from(options)))
    }
}

/// Providers by name. The default set holds `retry`, `discard` and `dead-letter`.
#[derive(Clone)]
pub struct ErrorFilterProviders {
    providers: IndexMap<String, Arc<dyn ErrorFilterProvider>>,
}

impl Default for ErrorFilterProviders {
    fn default() -> Self {
        Self::empty()
            .with(RetryFilterProvider)
            .with(DiscardFilterProvider)
            .with(DeadLetterFilterProvider)
    }
}

impl ErrorFilterProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry without the built-in providers.
    pub fn empty() -> Self {
        Self {
            providers: IndexMap::new(),
        }
    }

    /// Add a provider, replacing one with the same name.
    pub fn register(&mut self, provider: impl ErrorFilterProvider + 'static) {
        self.providers
            .insert(provider.provider_name().to_string(), Arc::new(provider));
    }

    pub fn with(mut self, provider: impl ErrorFilterProvider + 'static) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErrorFilterProvider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn create_filter(
        &self,
        configuration: &FilterConfiguration,
    ) -> Result<Arc<dyn ErrorFilter>, ConfigurationError> {
        self.get(&configuration.provider)
            .ok_or_else(|| ConfigurationError::UnknownFilterProvider(configuration.provider.clone()))?
            .create_filter(&configuration.settings)
    }

    /// Build the filters for a chain, in configuration order.
    pub fn create_filters(
        &self,
        configurations: &[FilterConfiguration],
    ) -> Result<Vec<Arc<dyn ErrorFilter>>, ConfigurationError> {
        configurations
            .iter()
            .map(|configuration| self.create_filter(configuration))
            .collect()
    }

    pub fn build_pipeline(
        &self,
        configurations: &[FilterConfiguration],
    ) -> Result<ErrorPipeline, ConfigurationError> {
        Ok(ErrorPipeline::new(self.create_filters(configurations)?))
    }
}

impl fmt::Debug for ErrorFilterProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}
