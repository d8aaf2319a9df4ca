//! Caller-facing sync engine.
//!
//! [`SyncEngine`] wires the queue, executor, scheduler, connectivity monitor
//! and event bus together. Construct one per process at startup and hand
//! clones of the handle to whatever needs it; clones share all state.
//!
//! The engine is single-threaded. Scheduling uses
//! [`tokio::task::spawn_local`], so every method that may schedule a run
//! (`init`, `add_to_queue`, `retry_failed`, connectivity changes) must be
//! called from inside a [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::FutureExt;
use serde_json::Value;

use super::connectivity::ConnectivityMonitor;
use super::events::{EventBus, EventKind, Subscription, SyncEvent};
use super::executor::SyncExecutor;
use super::item::{BatchSummary, OperationType, QueueState, SyncItem};
use super::queue::QueueStore;
use super::scheduler::Scheduler;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::storage::BackingStore;

struct Inner {
    settings: SyncSettings,
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    queue: Rc<QueueStore>,
    scheduler: Rc<Scheduler>,
    executor: Rc<SyncExecutor>,
    initialized: Cell<bool>,
    wiring: RefCell<Vec<Subscription>>,
}

/// Offline operation queue and reconciliation engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Rc<Inner>,
}

impl SyncEngine {
    /// Build an engine writing through `store`.
    ///
    /// `online` seeds the connectivity signal with the platform's current
    /// state. Nothing is loaded or scheduled until [`SyncEngine::init`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `settings` fail validation.
    pub fn new(
        store: Rc<dyn BackingStore>,
        settings: SyncSettings,
        online: bool,
    ) -> Result<Self, SyncError> {
        settings.validate()?;

        let bus = EventBus::new();
        let connectivity = ConnectivityMonitor::new(bus.clone(), online);
        let queue = Rc::new(QueueStore::new(
            Rc::clone(&store),
            settings.queue_key.clone(),
            settings.max_retry_count,
        ));

        // The executor reschedules itself through the scheduler, so the
        // scheduler only holds a weak reference back to it.
        let target: Rc<RefCell<Weak<SyncExecutor>>> = Rc::new(RefCell::new(Weak::new()));
        let scheduler = Rc::new(Scheduler::new({
            let target = Rc::clone(&target);
            move || {
                let executor = target.borrow().upgrade();
                async move {
                    if let Some(executor) = executor {
                        executor.run_once().await;
                    }
                }
                .boxed_local()
            }
        }));

        let executor = Rc::new(SyncExecutor::new(
            Rc::clone(&queue),
            store,
            bus.clone(),
            connectivity.clone(),
            Rc::clone(&scheduler),
            settings.clone(),
        ));
        *target.borrow_mut() = Rc::downgrade(&executor);

        Ok(Self {
            inner: Rc::new(Inner {
                settings,
                bus,
                connectivity,
                queue,
                scheduler,
                executor,
                initialized: Cell::new(false),
                wiring: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Load the persisted queue, start reacting to connectivity changes, and
    /// schedule a run if work is pending while online.
    ///
    /// Calling it again is a no-op.
    pub fn init(&self) {
        if self.inner.initialized.replace(true) {
            return;
        }

        let loaded = self.inner.queue.load();
        log::info!("sync engine started with {loaded} queued item(s)");

        let weak = Rc::downgrade(&self.inner);
        let on_online = self.inner.bus.subscribe(EventKind::Online, {
            let weak = weak.clone();
            move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.scheduler.schedule_run(inner.settings.immediate_delay());
                }
            }
        });
        let on_offline = self.inner.bus.subscribe(EventKind::Offline, {
            let weak = weak.clone();
            move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.scheduler.cancel_scheduled();
                }
            }
        });
        let on_foreground = self.inner.bus.subscribe(EventKind::ForegroundRegained, move |_| {
            if let Some(inner) = weak.upgrade() {
                if inner.connectivity.is_online() {
                    inner.scheduler.schedule_run(inner.settings.immediate_delay());
                }
            }
        });
        self.inner
            .wiring
            .borrow_mut()
            .extend([on_online, on_offline, on_foreground]);

        self.publish_queue_change();
        if self.inner.queue.has_pending() && self.inner.connectivity.is_online() {
            self.inner
                .scheduler
                .schedule_run(self.inner.settings.immediate_delay());
        }
    }

    /// Queue a mutation of `key`. Returns the ID of the new or merged item.
    ///
    /// When online, a run is scheduled after the immediate delay so that a
    /// burst of edits lands in a single batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ReservedKey`] if `key` is the queue snapshot key.
    pub fn add_to_queue(
        &self,
        key: &str,
        operation: OperationType,
        payload: Value,
    ) -> Result<String, SyncError> {
        if key == self.inner.settings.queue_key {
            log::error!("refusing to queue {operation:?} for reserved key {key}");
            return Err(SyncError::ReservedKey(key.to_string()));
        }

        self.init();

        let id = self.inner.queue.enqueue(key, operation, payload);
        self.publish_queue_change();

        if self.inner.connectivity.is_online() {
            self.inner
                .scheduler
                .schedule_run(self.inner.settings.immediate_delay());
        }
        Ok(id)
    }

    /// Current derived queue state.
    #[must_use]
    pub fn queue_state(&self) -> QueueState {
        self.inner.executor.queue_state()
    }

    /// Items parked after exhausting their retries.
    #[must_use]
    pub fn failed_items(&self) -> Vec<SyncItem> {
        self.inner.queue.failed_items()
    }

    /// Give every failed item a fresh retry budget and schedule a run.
    ///
    /// Returns the number of items reset.
    pub fn retry_failed(&self) -> usize {
        let reset = self.inner.queue.reset_all_failed();
        if reset == 0 {
            return 0;
        }

        log::info!("retrying {reset} failed item(s)");
        self.publish_queue_change();
        if self.inner.connectivity.is_online() {
            self.inner
                .scheduler
                .schedule_run(self.inner.settings.immediate_delay());
        }
        reset
    }

    /// Drop every failed item without retrying. Returns how many were dropped.
    pub fn clear_failed(&self) -> usize {
        let dropped = self.inner.queue.clear_failed();
        if dropped > 0 {
            self.publish_queue_change();
        }
        dropped
    }

    /// Run a batch now, replacing any scheduled run.
    ///
    /// Returns `Ok(None)` if there was nothing to do or a batch was already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Offline`] if the connectivity signal is offline.
    pub async fn force_sync(&self) -> Result<Option<BatchSummary>, SyncError> {
        if !self.inner.connectivity.is_online() {
            return Err(SyncError::Offline);
        }

        self.init();
        self.inner.scheduler.cancel_scheduled();
        Ok(self.inner.executor.run_once().await)
    }

    /// Current connectivity signal.
    #[must_use]
    pub fn check_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Subscribe to engine events.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + 'static,
    {
        self.inner.bus.subscribe(kind, callback)
    }

    /// Handle the platform glue uses to report connectivity and visibility.
    #[must_use]
    pub fn connectivity(&self) -> ConnectivityMonitor {
        self.inner.connectivity.clone()
    }

    /// True when nothing is pending and no run is scheduled.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        !self.inner.queue.has_pending()
            && !self.inner.scheduler.is_scheduled()
            && !self.inner.executor.is_running()
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    fn publish_queue_change(&self) {
        self.inner
            .bus
            .publish(&SyncEvent::QueueChange(self.queue_state()));
    }
}
