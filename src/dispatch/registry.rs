//! # Per-event handler registry.
//!
//! [`CollectorEvents`] holds one ordered list of handlers per
//! [`EventKind`]. Every slot is created at construction; a kind without a
//! slot reaching the dispatcher is a defect in this table, not a data error.
//!
//! ## Rules
//! - Registration order is invocation order.
//! - The same handler may be subscribed to several kinds; each subscription
//!   gets its own [`SubscriptionId`].
//! - Readers get a snapshot; no lock is held while handlers run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::events::EventKind;

use super::handler::EventHandler;

/// Handle returned by [`CollectorEvents::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Ordered handler lists keyed by event kind.
pub struct CollectorEvents {
    slots: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl CollectorEvents {
    /// Creates a registry with an empty slot for every known event kind.
    pub fn new() -> Self {
        let slots = EventKind::ALL.iter().map(|k| (*k, Vec::new())).collect();
        Self {
            slots: RwLock::new(slots),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends `handler` to the slot of `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(kind)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Removes one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for subs in slots.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Removes every subscription but keeps all slots.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for subs in slots.values_mut() {
            subs.clear();
        }
    }

    /// Returns `true` if at least one handler is subscribed to `kind`.
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&kind).is_some_and(|subs| !subs.is_empty())
    }

    /// Returns `true` if anyone listens to test case start, end or failed.
    pub fn has_test_case_listeners(&self) -> bool {
        EventKind::ALL
            .iter()
            .filter(|k| k.is_test_case_scoped())
            .any(|k| self.has_listeners(*k))
    }

    /// Total number of subscriptions across all kinds.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the handlers for `kind`, in registration order.
    ///
    /// `None` means the kind has no slot at all.
    pub fn handlers(&self, kind: EventKind) -> Option<Vec<Arc<dyn EventHandler>>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&kind)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
    }

    #[cfg(test)]
    pub(crate) fn without_slot(kind: EventKind) -> Self {
        let events = Self::new();
        events
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
        events
    }
}

impl Default for CollectorEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{HandlerFn, HandlerIdentity};
    use crate::events::CollectionEvent;

    fn noop(method: &str) -> Arc<dyn EventHandler> {
        HandlerFn::arc(HandlerIdentity::new("Test", method), |_ev: CollectionEvent| async { Ok(()) })
    }

    #[test]
    fn every_kind_has_an_empty_slot() {
        let events = CollectorEvents::new();
        for kind in EventKind::ALL {
            assert_eq!(events.handlers(kind).map(|h| h.len()), Some(0));
            assert!(!events.has_listeners(kind));
        }
        assert!(events.is_empty());
    }

    #[test]
    fn handlers_keep_registration_order() {
        let events = CollectorEvents::new();
        events.subscribe(EventKind::SessionStart, noop("a"));
        events.subscribe(EventKind::SessionStart, noop("b"));
        events.subscribe(EventKind::SessionStart, noop("c"));

        let order: Vec<String> = events
            .handlers(EventKind::SessionStart)
            .unwrap()
            .iter()
            .map(|h| h.identity().method.to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_subscription() {
        let events = CollectorEvents::new();
        let first = events.subscribe(EventKind::TestCaseEnd, noop("first"));
        events.subscribe(EventKind::TestCaseEnd, noop("second"));

        assert!(events.unsubscribe(first));
        assert!(!events.unsubscribe(first));
        let left = events.handlers(EventKind::TestCaseEnd).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identity().method.as_ref(), "second");
    }

    #[test]
    fn test_case_listener_check_ignores_other_kinds() {
        let events = CollectorEvents::new();
        events.subscribe(EventKind::SessionEnd, noop("end"));
        assert!(!events.has_test_case_listeners());

        events.subscribe(EventKind::TestCaseFailed, noop("failed"));
        assert!(events.has_test_case_listeners());

        events.clear();
        assert!(!events.has_test_case_listeners());
        assert!(events.handlers(EventKind::TestCaseFailed).is_some());
    }
}
