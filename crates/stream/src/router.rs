//! Inbound event routing.
//!
//! Every parsed event goes two ways: to the handlers registered for its
//! type, then to the cache invalidator for each key the table maps the
//! type to. The second step does not depend on the first; an event with no
//! handlers still invalidates.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error, trace, warn};

use watchtower_protocol::{Event, EventType};

use crate::cache::{CacheInvalidator, InvalidationTable};

/// Callback invoked for each matching event.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

type HandlerMap = HashMap<EventType, Vec<(u64, Handler)>>;

/// Dispatches inbound events to handlers and the cache invalidator.
pub struct EventRouter {
    handlers: Arc<Mutex<HandlerMap>>,
    next_id: AtomicU64,
    table: InvalidationTable,
    invalidator: Arc<dyn CacheInvalidator>,
}

/// Identifies one handler registration so it can be removed on its own.
#[derive(Debug)]
pub struct HandlerRegistration {
    handlers: Weak<Mutex<HandlerMap>>,
    event_type: EventType,
    id: u64,
}

impl HandlerRegistration {
    /// Removes exactly this handler. Other handlers for the same type stay.
    /// Returns `false` if it was already gone.
    pub fn remove(self) -> bool {
        let Some(handlers) = self.handlers.upgrade() else {
            return false;
        };
        let mut map = handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = map.get_mut(&self.event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&self.event_type);
        }
        removed
    }
}

impl EventRouter {
    pub fn new(table: InvalidationTable, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            table,
            invalidator,
        }
    }

    /// Registers a handler for an event type.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerRegistration
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(%event_type, id, "handler registered");
        HandlerRegistration {
            handlers: Arc::downgrade(&self.handlers),
            event_type,
            id,
        }
    }

    /// Number of handlers currently registered for an event type.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.lock().get(&event_type).map_or(0, Vec::len)
    }

    /// Parses a text frame and dispatches it. Parse failures are logged and
    /// the frame is dropped.
    pub fn dispatch_text(&self, text: &str) {
        match Event::parse(text) {
            Ok(event) => self.dispatch(&event),
            Err(e) => warn!("dropping unparseable frame: {e}"),
        }
    }

    /// Dispatches a parsed event to handlers, then invalidates caches.
    pub fn dispatch(&self, event: &Event) {
        let event_type = event.event_type();

        // Snapshot so handlers may register or remove handlers themselves.
        let handlers: Vec<Handler> = self
            .lock()
            .get(&event_type)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        trace!(%event_type, handlers = handlers.len(), "dispatching event");
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(%event_type, "event handler panicked: {}", panic_message(&*panic));
            }
        }

        for key in self.table.keys_for(event_type) {
            debug!(%event_type, key = %key, "invalidating cache");
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.invalidator.invalidate(key))) {
                error!(key = %key, "cache invalidator panicked: {}", panic_message(&*panic));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandlerMap> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;

    const THREAT: &str = r#"{"type":"threat_detected","timestamp":"2024-05-01T12:00:00Z",
        "data":{"threat_id":"t-9","severity":"high","category":"pii_leak","description":"ssn in output"}}"#;
    const HEALTH: &str = r#"{"type":"provider_health_change","timestamp":"2024-05-01T12:00:00Z",
        "data":{"provider":"openai","status":"down"}}"#;

    fn recording_router() -> (EventRouter, Arc<Mutex<Vec<String>>>) {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let k = keys.clone();
        let router = EventRouter::new(
            InvalidationTable::default(),
            Arc::new(move |key: &CacheKey| k.lock().unwrap().push(key.to_string())),
        );
        (router, keys)
    }

    #[test]
    fn dispatches_to_matching_handlers_only() {
        let (router, _) = recording_router();
        let threats = Arc::new(Mutex::new(0));
        let health = Arc::new(Mutex::new(0));
        let t = threats.clone();
        let h = health.clone();
        let _ = router.on(EventType::ThreatDetected, move |_| *t.lock().unwrap() += 1);
        let _ = router.on(EventType::ProviderHealthChange, move |_| *h.lock().unwrap() += 1);

        router.dispatch_text(THREAT);
        router.dispatch_text(THREAT);

        assert_eq!(*threats.lock().unwrap(), 2);
        assert_eq!(*health.lock().unwrap(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let (router, _) = recording_router();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let _ = router.on(EventType::ThreatDetected, |_| panic!("handler bug"));
        let _ = router.on(EventType::ThreatDetected, move |_| *c.lock().unwrap() += 1);

        router.dispatch_text(THREAT);
        assert_eq!(*calls.lock().unwrap(), 1);

        router.dispatch_text(THREAT);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn invalidates_without_handlers() {
        let (router, keys) = recording_router();
        assert_eq!(router.handler_count(EventType::ProviderHealthChange), 0);

        router.dispatch_text(HEALTH);

        assert_eq!(
            *keys.lock().unwrap(),
            vec!["providers".to_string(), "provider-health".to_string()]
        );
    }

    #[test]
    fn handlers_run_before_invalidation() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        let router = EventRouter::new(
            InvalidationTable::default(),
            Arc::new(move |key: &CacheKey| o.lock().unwrap().push(format!("key:{key}"))),
        );
        let o = order.clone();
        let _ = router.on(EventType::SystemStatusUpdate, move |_| {
            o.lock().unwrap().push("handler".into())
        });

        router.dispatch_text(
            r#"{"type":"system_status_update","timestamp":"2024-05-01T12:00:00Z","data":{"status":"ok"}}"#,
        );

        assert_eq!(
            *order.lock().unwrap(),
            vec!["handler".to_string(), "key:system-status".to_string()]
        );
    }

    #[test]
    fn remove_only_drops_that_handler() {
        let (router, _) = recording_router();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let f = first.clone();
        let s = second.clone();
        let reg_first = router.on(EventType::ThreatDetected, move |_| *f.lock().unwrap() += 1);
        let _reg_second = router.on(EventType::ThreatDetected, move |_| *s.lock().unwrap() += 1);

        assert!(reg_first.remove());
        router.dispatch_text(THREAT);

        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
        assert_eq!(router.handler_count(EventType::ThreatDetected), 1);
    }

    #[test]
    fn remove_after_router_dropped_is_false() {
        let (router, _) = recording_router();
        let reg = router.on(EventType::Pong, |_| {});
        drop(router);
        assert!(!reg.remove());
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let (router, _) = recording_router();
        let router = Arc::new(router);
        let r = Arc::downgrade(&router);
        let _ = router.on(EventType::ThreatDetected, move |_| {
            if let Some(router) = r.upgrade() {
                let _ = router.on(EventType::Pong, |_| {});
            }
        });

        router.dispatch_text(THREAT);
        assert_eq!(router.handler_count(EventType::Pong), 1);
    }

    #[test]
    fn unparseable_frame_is_dropped() {
        let (router, keys) = recording_router();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let _ = router.on(EventType::ThreatDetected, move |_| *c.lock().unwrap() += 1);

        router.dispatch_text("not valid json {{{");
        router.dispatch_text(r#"{"type":"threat_detected","timestamp":"2024-05-01T12:00:00Z","data":{}}"#);

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(keys.lock().unwrap().is_empty());
    }
}
