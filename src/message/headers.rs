//! Message headers and the reserved header names.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered, case-sensitive string headers attached to every message.
///
/// The core reserves names starting with [`Headers::RESERVED_PREFIX`]. Engines
/// attaching their own metadata (delivery tags and the like) must use a
/// different prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: IndexMap<String, String>,
}

impl Headers {
    pub const RESERVED_PREFIX: &'static str = "Nybus:";

    pub const MESSAGE_ID: &'static str = "Nybus:MessageId";
    pub const MESSAGE_TYPE: &'static str = "Nybus:MessageType";
    pub const CORRELATION_ID: &'static str = "Nybus:CorrelationId";
    pub const SENT_ON: &'static str = "Nybus:SentOn";
    pub const RETRY_COUNT: &'static str = "Nybus:RetryCount";

    pub const EXCEPTION_MESSAGE: &'static str = "Nybus:ExceptionMessage";
    pub const EXCEPTION_STACK_TRACE: &'static str = "Nybus:ExceptionStackTrace";
    pub const FAILED_ON: &'static str = "Nybus:FailedOn";
    pub const HOST: &'static str = "Nybus:Host";
    pub const PROCESS_ID: &'static str = "Nybus:ProcessId";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a header, returning the previous value. Existing keys keep their position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every header whose name starts with `prefix`.
    pub fn remove_prefixed(&mut self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_reserved(key: &str) -> bool {
        key.starts_with(Self::RESERVED_PREFIX)
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.get(Self::CORRELATION_ID)
            .and_then(|value| Uuid::parse_str(value).ok())
    }

    pub fn set_correlation_id(&mut self, correlation_id: Uuid) {
        self.insert(Self::CORRELATION_ID, correlation_id.to_string());
    }

    pub fn sent_on(&self) -> Option<DateTime<Utc>> {
        self.get(Self::SENT_ON)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
    }

    pub fn set_sent_on(&mut self, sent_on: DateTime<Utc>) {
        self.insert(Self::SENT_ON, sent_on.to_rfc3339());
    }

    /// Number of times the message has been resent. Absent or unparsable reads as 0.
    pub fn retry_count(&self) -> u32 {
        self.get(Self::RETRY_COUNT)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.insert(Self::RETRY_COUNT, retry_count.to_string());
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
