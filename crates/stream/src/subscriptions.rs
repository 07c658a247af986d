//! Event types the UI wants delivered.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use watchtower_protocol::{ControlFrame, EventType};

/// Process-wide set of subscribed event types.
///
/// Independent callers add to one shared set; nobody overwrites another's
/// request. The set outlives individual connections.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    types: Mutex<BTreeSet<EventType>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds event types to the set. Returns `true` if anything was new.
    pub fn add(&self, event_types: impl IntoIterator<Item = EventType>) -> bool {
        let mut types = self.lock();
        let mut changed = false;
        for event_type in event_types {
            changed |= types.insert(event_type);
        }
        changed
    }

    /// Removes event types from the set. Returns `true` if anything was removed.
    pub fn remove(&self, event_types: impl IntoIterator<Item = EventType>) -> bool {
        let mut types = self.lock();
        let mut changed = false;
        for event_type in event_types {
            changed |= types.remove(&event_type);
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current set in a stable order.
    pub fn snapshot(&self) -> Vec<EventType> {
        self.lock().iter().copied().collect()
    }

    /// Subscribe frame carrying the full current set.
    pub fn frame(&self) -> ControlFrame {
        ControlFrame::subscribe(self.snapshot())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<EventType>> {
        self.types.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
