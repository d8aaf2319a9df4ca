//! Sync executor for applying queued items.
//!
//! Drains the queue in bounded batches. Each item is applied independently:
//! one failure never aborts the rest of the batch.

use std::cell::Cell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use super::connectivity::ConnectivityMonitor;
use super::events::{EventBus, SyncEvent};
use super::item::{BatchSummary, OperationType, QueueState, SyncItem};
use super::queue::QueueStore;
use super::scheduler::Scheduler;
use crate::config::SyncSettings;
use crate::error::StoreError;
use crate::storage::BackingStore;

/// Clears the running flag even if the batch future is dropped mid-way.
struct RunFlag<'a>(&'a Cell<bool>);

impl Drop for RunFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Executor applying queued items to the backing store.
pub struct SyncExecutor {
    queue: Rc<QueueStore>,
    store: Rc<dyn BackingStore>,
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    scheduler: Rc<Scheduler>,
    settings: SyncSettings,
    running: Cell<bool>,
    last_sync_at: Cell<Option<DateTime<Utc>>>,
}

impl SyncExecutor {
    /// Create a new executor.
    #[must_use]
    pub fn new(
        queue: Rc<QueueStore>,
        store: Rc<dyn BackingStore>,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
        scheduler: Rc<Scheduler>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            queue,
            store,
            bus,
            connectivity,
            scheduler,
            settings,
            running: Cell::new(false),
            last_sync_at: Cell::new(None),
        }
    }

    /// Apply one batch of pending items.
    ///
    /// Does nothing (returns `None`) if a batch is already running, the
    /// connectivity signal is offline, or nothing is pending. If work is still
    /// pending afterwards, the next run is scheduled after the retry delay.
    pub async fn run_once(&self) -> Option<BatchSummary> {
        if self.running.get() {
            log::debug!("sync already running; trigger dropped");
            return None;
        }
        if !self.connectivity.is_online() {
            log::debug!("offline; skipping sync run");
            return None;
        }

        let batch = self.queue.next_batch(self.settings.batch_size);
        if batch.is_empty() {
            return None;
        }

        self.running.set(true);
        let flag = RunFlag(&self.running);

        log::info!("sync batch starting with {} item(s)", batch.len());
        self.bus.publish(&SyncEvent::SyncStart);

        let mut summary = BatchSummary::default();
        for queued in batch {
            // A merge or retry action may have touched the item since the batch was taken
            if !self.queue.get(&queued.id).is_some_and(|i| i.is_pending()) {
                continue;
            }
            let Some(item) = self.queue.mark_in_flight(&queued.id) else {
                continue;
            };

            match self.apply(&item) {
                Ok(()) => {
                    self.queue.mark_completed(&item.id);
                    summary.succeeded += 1;
                },
                Err(e) => {
                    log::warn!("{} for {} failed: {e}", item.operation, item.key);
                    self.queue.mark_failed(&item.id, &e.to_string());
                    summary.failed += 1;
                },
            }

            tokio::task::yield_now().await;
        }

        self.last_sync_at.set(Some(Utc::now()));
        drop(flag);

        log::info!("sync batch finished: {summary}");
        if summary.all_succeeded() {
            self.bus.publish(&SyncEvent::SyncComplete(summary));
        } else {
            self.bus.publish(&SyncEvent::SyncFailed(summary));
        }
        self.bus.publish(&SyncEvent::QueueChange(self.queue_state()));

        if self.queue.has_pending() && self.connectivity.is_online() {
            self.scheduler.schedule_run(self.settings.retry_delay());
        }

        Some(summary)
    }

    /// Whether a batch is executing right now.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Current derived queue state.
    #[must_use]
    pub fn queue_state(&self) -> QueueState {
        let counts = self.queue.counts();
        QueueState {
            pending_count: counts.pending,
            in_flight_count: counts.in_flight,
            failed_count: counts.failed,
            total_count: counts.total,
            is_online: self.connectivity.is_online(),
            is_syncing: self.running.get(),
            last_sync_at: self.last_sync_at.get(),
            oldest_pending_at: self.queue.oldest_pending_at(),
        }
    }

    fn apply(&self, item: &SyncItem) -> Result<(), StoreError> {
        match item.operation {
            OperationType::Create | OperationType::Update => self.store.set(&item.key, &item.payload),
            OperationType::Delete => self.store.remove(&item.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, MockBackingStore};
    use crate::sync::events::EventKind;
    use crate::sync::item::SyncStatus;
    use futures::FutureExt;
    use mockall::predicate::eq;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use tokio::task::LocalSet;

    struct Harness {
        queue: Rc<QueueStore>,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
        scheduler: Rc<Scheduler>,
        executor: SyncExecutor,
    }

    /// Queue snapshots go to their own store so only record writes hit `store`.
    fn harness(store: Rc<dyn BackingStore>, settings: SyncSettings) -> Harness {
        let bus = EventBus::new();
        let connectivity = ConnectivityMonitor::new(bus.clone(), true);
        let queue = Rc::new(QueueStore::new(
            Rc::new(MemoryStore::new()),
            settings.queue_key.clone(),
            settings.max_retry_count,
        ));
        let scheduler = Rc::new(Scheduler::new(|| async {}.boxed_local()));
        let executor = SyncExecutor::new(
            Rc::clone(&queue),
            store,
            bus.clone(),
            connectivity.clone(),
            Rc::clone(&scheduler),
            settings,
        );
        Harness {
            queue,
            bus,
            connectivity,
            scheduler,
            executor,
        }
    }

    fn record_kinds(bus: &EventBus) -> Rc<RefCell<Vec<EventKind>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [
            EventKind::SyncStart,
            EventKind::SyncComplete,
            EventKind::SyncFailed,
            EventKind::QueueChange,
        ] {
            let sink = Rc::clone(&log);
            let _ = bus.subscribe(kind, move |e| sink.borrow_mut().push(e.kind()));
        }
        log
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_each_operation() {
        LocalSet::new()
            .run_until(async {
                let mut store = MockBackingStore::new();
                store
                    .expect_set()
                    .with(eq("a"), eq(json!({"title": "A"})))
                    .times(1)
                    .returning(|_, _| Ok(()));
                store
                    .expect_remove()
                    .with(eq("b"))
                    .times(1)
                    .returning(|_| Ok(()));
                let h = harness(Rc::new(store), SyncSettings::default());
                let events = record_kinds(&h.bus);

                h.queue.enqueue("a", OperationType::Create, json!({"title": "A"}));
                h.queue.enqueue("b", OperationType::Delete, Value::Null);

                let summary = h.executor.run_once().await.unwrap();

                assert_eq!(summary, BatchSummary { succeeded: 2, failed: 0 });
                assert_eq!(h.queue.counts().total, 0);
                assert!(h.executor.queue_state().last_sync_at.is_some());
                assert!(!h.scheduler.is_scheduled());
                assert_eq!(
                    *events.borrow(),
                    vec![EventKind::SyncStart, EventKind::SyncComplete, EventKind::QueueChange]
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_abort_batch() {
        LocalSet::new()
            .run_until(async {
                let mut store = MockBackingStore::new();
                store
                    .expect_set()
                    .with(eq("bad"), mockall::predicate::always())
                    .returning(|_, _| Err(StoreError::Unavailable("locked".to_string())));
                store
                    .expect_set()
                    .with(eq("good"), mockall::predicate::always())
                    .times(1)
                    .returning(|_, _| Ok(()));
                let h = harness(Rc::new(store), SyncSettings::default());
                let events = record_kinds(&h.bus);

                h.queue.enqueue("bad", OperationType::Update, json!(1));
                h.queue.enqueue("good", OperationType::Update, json!(2));

                let summary = h.executor.run_once().await.unwrap();

                assert_eq!(summary, BatchSummary { succeeded: 1, failed: 1 });
                let pending = h.queue.pending_items();
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].key, "bad");
                assert_eq!(pending[0].retry_count, 1);
                assert_eq!(
                    pending[0].error_message.as_deref(),
                    Some("store unavailable: locked")
                );
                assert!(pending[0].last_attempt_at.is_some());
                assert!(events.borrow().contains(&EventKind::SyncFailed));
                assert!(h.scheduler.is_scheduled());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_respects_batch_size() {
        LocalSet::new()
            .run_until(async {
                let settings = SyncSettings {
                    batch_size: 2,
                    ..SyncSettings::default()
                };
                let store = Rc::new(MemoryStore::new());
                let h = harness(Rc::clone(&store) as Rc<dyn BackingStore>, settings);

                for key in ["a", "b", "c", "d", "e"] {
                    h.queue.enqueue(key, OperationType::Create, json!(key));
                }

                let summary = h.executor.run_once().await.unwrap();

                assert_eq!(summary.total(), 2);
                assert_eq!(store.len(), 2);
                assert_eq!(h.queue.counts().pending, 3);
                assert!(h.scheduler.is_scheduled());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_is_noop() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Rc::new(MockBackingStore::new()), SyncSettings::default());
                h.connectivity.set_online(false);
                h.queue.enqueue("a", OperationType::Update, json!(1));

                assert!(h.executor.run_once().await.is_none());
                assert_eq!(h.queue.counts().pending, 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_is_noop() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Rc::new(MockBackingStore::new()), SyncSettings::default());
                let events = record_kinds(&h.bus);

                assert!(h.executor.run_once().await.is_none());
                assert!(events.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_trigger_is_dropped() {
        LocalSet::new()
            .run_until(async {
                let store = Rc::new(MemoryStore::new());
                let h = Rc::new(harness(
                    Rc::clone(&store) as Rc<dyn BackingStore>,
                    SyncSettings::default(),
                ));
                h.queue.enqueue("a", OperationType::Update, json!(1));
                h.queue.enqueue("b", OperationType::Update, json!(2));

                let first = Rc::clone(&h);
                let running = tokio::task::spawn_local(async move { first.executor.run_once().await });
                // Let the first run reach its first yield point
                tokio::task::yield_now().await;
                assert!(h.executor.is_running());
                assert!(h.executor.run_once().await.is_none());

                let summary = running.await.unwrap().unwrap();
                assert_eq!(summary.succeeded, 2);
                assert!(!h.executor.is_running());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_during_batch_is_applied() {
        LocalSet::new()
            .run_until(async {
                let store = Rc::new(MemoryStore::new());
                let h = Rc::new(harness(
                    Rc::clone(&store) as Rc<dyn BackingStore>,
                    SyncSettings::default(),
                ));
                h.queue.enqueue("a", OperationType::Update, json!(1));
                h.queue.enqueue("b", OperationType::Update, json!("old"));

                let runner = Rc::clone(&h);
                let running = tokio::task::spawn_local(async move { runner.executor.run_once().await });
                tokio::task::yield_now().await;

                // "b" is still pending, so this merges into it
                h.queue.enqueue("b", OperationType::Update, json!("new"));
                running.await.unwrap();

                assert_eq!(store.get("b").unwrap(), Some(json!("new")));
                assert_eq!(h.queue.counts().total, 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parks_after_max_retries() {
        LocalSet::new()
            .run_until(async {
                let mut store = MockBackingStore::new();
                store
                    .expect_set()
                    .times(3)
                    .returning(|_, _| Err(StoreError::Database("io".to_string())));
                let h = harness(Rc::new(store), SyncSettings::default());
                let id = h.queue.enqueue("x", OperationType::Create, json!(1));

                for _ in 0..3 {
                    h.executor.run_once().await.unwrap();
                }

                let item = h.queue.get(&id).unwrap();
                assert_eq!(item.status, SyncStatus::Failed);
                assert_eq!(item.retry_count, 3);
                assert!(h.executor.run_once().await.is_none());
            })
            .await;
    }
}
