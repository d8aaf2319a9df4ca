//! Typed publish/subscribe for engine lifecycle events.
//!
//! Observers (a connectivity indicator, a "changes not saved" banner) register
//! callbacks per [`EventKind`]. A panicking callback is caught and logged so it
//! cannot break the publish loop or the engine.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::item::{BatchSummary, QueueState};

/// Event discriminant used for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Online,
    Offline,
    ForegroundRegained,
    SyncStart,
    SyncComplete,
    SyncFailed,
    QueueChange,
}

/// A lifecycle event and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connectivity came back
    Online,
    /// Connectivity dropped
    Offline,
    /// The host surface became visible after being hidden
    ForegroundRegained,
    /// A batch is about to run
    SyncStart,
    /// A batch finished without failures
    SyncComplete(BatchSummary),
    /// A batch finished with at least one failure
    SyncFailed(BatchSummary),
    /// Queue contents or status counts changed
    QueueChange(QueueState),
}

impl SyncEvent {
    /// The kind subscribers register for.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Online => EventKind::Online,
            Self::Offline => EventKind::Offline,
            Self::ForegroundRegained => EventKind::ForegroundRegained,
            Self::SyncStart => EventKind::SyncStart,
            Self::SyncComplete(_) => EventKind::SyncComplete,
            Self::SyncFailed(_) => EventKind::SyncFailed,
            Self::QueueChange(_) => EventKind::QueueChange,
        }
    }
}

type Callback = Rc<dyn Fn(&SyncEvent)>;

#[derive(Default)]
struct Registry {
    next_id: Cell<u64>,
    subscribers: RefCell<HashMap<EventKind, Vec<(u64, Callback)>>>,
}

/// Event bus shared by the engine components.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Rc<Registry>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + 'static,
    {
        let id = self.registry.next_id.get();
        self.registry.next_id.set(id + 1);

        self.registry
            .subscribers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push((id, Rc::new(callback)));

        Subscription {
            registry: Rc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Deliver `event` to every current subscriber of its kind.
    pub fn publish(&self, event: &SyncEvent) {
        // Snapshot so callbacks may (un)subscribe while we iterate
        let callbacks: Vec<Callback> = self
            .registry
            .subscribers
            .borrow()
            .get(&event.kind())
            .map(|subs| subs.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                log::error!("subscriber for {:?} panicked; continuing", event.kind());
            }
        }
    }

    /// Number of subscribers registered for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry
            .subscribers
            .borrow()
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the callback from the bus. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };

        let mut subscribers = registry.subscribers.borrow_mut();
        let Some(list) = subscribers.get_mut(&self.kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&self.kind);
        }
        removed
    }
}
