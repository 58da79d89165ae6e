//! Context-wide set of queries whose data facet is loading.
//!
//! Going from empty to non-empty emits [`GlobalEvent::InFlightQueryStart`];
//! removing the last member emits [`GlobalEvent::InFlightQueryEnd`]. Events are
//! emitted while the set is locked so start/end always alternate; the lock is
//! reentrant so handlers may inspect the tracker.

use crate::events::{EventEmitter, GlobalEvent, HandlerId};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::debug;

/// Stable per-instance key of a query. Distinct from the hash, since queries
/// created with the cache disabled share hashes.
pub type InstanceKey = u64;

#[derive(Default)]
pub struct InFlightTracker {
    members: ReentrantMutex<RefCell<HashSet<InstanceKey>>>,
    events: EventEmitter<GlobalEvent>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a query as in flight. Returns `false` if it already was.
    pub fn add(&self, key: InstanceKey) -> bool {
        let guard = self.members.lock();
        let (inserted, first) = {
            let mut members = guard.borrow_mut();
            let first = members.is_empty();
            (members.insert(key), first)
        };
        if inserted && first {
            debug!(instance = key, "In-flight queries started");
            self.events.emit(&GlobalEvent::InFlightQueryStart);
        }
        inserted
    }

    /// Mark a query as settled. Returns `false` if it was not in flight.
    pub fn remove(&self, key: InstanceKey) -> bool {
        let guard = self.members.lock();
        let (removed, last) = {
            let mut members = guard.borrow_mut();
            let removed = members.remove(&key);
            (removed, members.is_empty())
        };
        if removed && last {
            debug!(instance = key, "In-flight queries settled");
            self.events.emit(&GlobalEvent::InFlightQueryEnd);
        }
        removed
    }

    pub fn contains(&self, key: InstanceKey) -> bool {
        self.members.lock().borrow().contains(&key)
    }

    pub fn len(&self) -> usize {
        self.members.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every member. Emits the end event if anything was in flight.
    pub fn reset(&self) {
        let guard = self.members.lock();
        let had_members = {
            let mut members = guard.borrow_mut();
            let had = !members.is_empty();
            members.clear();
            had
        };
        if had_members {
            self.events.emit(&GlobalEvent::InFlightQueryEnd);
        }
    }

    pub fn add_event_listener<F>(&self, event: GlobalEvent, handler: F) -> HandlerId
    where
        F: Fn(&GlobalEvent, GlobalEvent) + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    pub fn remove_event_listener(&self, event: GlobalEvent, id: HandlerId) -> bool {
        self.events.off(event, id)
    }
}
