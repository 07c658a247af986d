//! Cache invalidation port.
//!
//! The data-fetching layer implements [`CacheInvalidator`]; the stream
//! decides which keys go stale for each event type through a static
//! [`InvalidationTable`].

use std::collections::HashMap;
use std::fmt;

use watchtower_protocol::EventType;

/// Identifier of a cached query in the data-fetching layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives a cache key whenever an event makes it stale.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn invalidate(&self, key: &CacheKey) {
        self(key)
    }
}

/// Static mapping from event type to the cache keys it invalidates.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationTable {
    entries: HashMap<EventType, Vec<CacheKey>>,
}

impl InvalidationTable {
    /// A table that invalidates nothing.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Sets the keys for an event type, replacing any previous entry.
    pub fn with<I, K>(mut self, event_type: EventType, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        self.entries
            .insert(event_type, keys.into_iter().map(Into::into).collect());
        self
    }

    /// Keys to invalidate for an event type. Empty when unmapped.
    pub fn keys_for(&self, event_type: EventType) -> &[CacheKey] {
        self.entries
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for InvalidationTable {
    fn default() -> Self {
        Self::empty()
            .with(EventType::ThreatDetected, ["threats", "dashboard-stats"])
            .with(EventType::ProviderHealthChange, ["providers", "provider-health"])
            .with(EventType::CostThresholdAlert, ["costs", "cost-alerts"])
            .with(EventType::SystemStatusUpdate, ["system-status"])
    }
}
