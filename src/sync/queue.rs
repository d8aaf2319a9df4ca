//! Durable queue store.
//!
//! The in-memory queue is authoritative. After every mutation the whole queue
//! is written to the backing store as a JSON snapshot; a failed snapshot write
//! is logged and otherwise ignored until the next mutation persists again.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::item::{OperationType, SyncItem, SyncStatus};
use crate::storage::BackingStore;

/// Status counts over the current queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub total: usize,
}

/// Queue of buffered mutations mirrored into a [`BackingStore`].
pub struct QueueStore {
    items: RefCell<Vec<SyncItem>>,
    store: Rc<dyn BackingStore>,
    queue_key: String,
    max_retry_count: u32,
}

impl QueueStore {
    /// Create an empty queue persisted under `queue_key`.
    #[must_use]
    pub fn new(
        store: Rc<dyn BackingStore>,
        queue_key: impl Into<String>,
        max_retry_count: u32,
    ) -> Self {
        Self {
            items: RefCell::new(Vec::new()),
            store,
            queue_key: queue_key.into(),
            max_retry_count,
        }
    }

    /// Replace the in-memory queue with the persisted snapshot.
    ///
    /// Items left in flight by an interrupted batch go back to pending.
    /// Returns the number of items loaded.
    pub fn load(&self) -> usize {
        let loaded = match self.store.get(&self.queue_key) {
            Ok(Some(value)) => serde_json::from_value::<Vec<SyncItem>>(value).unwrap_or_else(|e| {
                log::warn!("discarding unreadable queue snapshot: {e}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("failed to read queue snapshot: {e}");
                Vec::new()
            },
        };

        let interrupted: Vec<String> = loaded
            .iter()
            .filter(|item| item.status == SyncStatus::InFlight)
            .map(|item| item.id.clone())
            .collect();

        *self.items.borrow_mut() = loaded;
        for id in &interrupted {
            self.return_to_pending(id);
        }
        if !interrupted.is_empty() {
            log::info!("recovered {} interrupted item(s)", interrupted.len());
            self.persist();
        }

        let count = self.items.borrow().len();
        log::debug!("loaded {count} queued item(s)");
        count
    }

    /// Add a mutation, merging it into the pending item for `key` if there is one.
    ///
    /// Returns the ID of the new or merged item.
    pub fn enqueue(&self, key: &str, operation: OperationType, payload: Value) -> String {
        let id = {
            let mut items = self.items.borrow_mut();
            if let Some(existing) = items.iter_mut().find(|i| i.is_pending() && i.key == key) {
                existing.absorb(operation, payload);
                log::debug!("merged {operation} for {key} into {} ({})", existing.id, existing.operation);
                existing.id.clone()
            } else {
                let item = SyncItem::new(key, operation, payload);
                log::debug!("queued {operation} for {key} as {}", item.id);
                let id = item.id.clone();
                items.push(item);
                id
            }
        };

        self.persist();
        id
    }

    /// All pending items, oldest first.
    #[must_use]
    pub fn pending_items(&self) -> Vec<SyncItem> {
        self.items
            .borrow()
            .iter()
            .filter(|i| i.is_pending())
            .cloned()
            .collect()
    }

    /// Up to `limit` pending items, oldest first.
    #[must_use]
    pub fn next_batch(&self, limit: usize) -> Vec<SyncItem> {
        self.items
            .borrow()
            .iter()
            .filter(|i| i.is_pending())
            .take(limit)
            .cloned()
            .collect()
    }

    /// All items parked after exhausting their retries.
    #[must_use]
    pub fn failed_items(&self) -> Vec<SyncItem> {
        self.items
            .borrow()
            .iter()
            .filter(|i| i.status == SyncStatus::Failed)
            .cloned()
            .collect()
    }

    /// Look up an item by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SyncItem> {
        self.items.borrow().iter().find(|i| i.id == id).cloned()
    }

    /// Mark an item as being applied and record the attempt time.
    ///
    /// Returns the item as it is now, or `None` if it no longer exists.
    pub fn mark_in_flight(&self, id: &str) -> Option<SyncItem> {
        let updated = self.update(id, |item| {
            item.status = SyncStatus::InFlight;
            item.last_attempt_at = Some(Utc::now());
        });
        if updated.is_some() {
            self.persist();
        }
        updated
    }

    /// Remove an applied item.
    pub fn mark_completed(&self, id: &str) -> bool {
        let removed = self.remove_item(id);
        if removed {
            self.persist();
        }
        removed
    }

    /// Record a failed attempt.
    ///
    /// The item is parked as failed once its retry count reaches the limit,
    /// otherwise it goes back to pending for another attempt.
    pub fn mark_failed(&self, id: &str, error_message: &str) -> Option<SyncStatus> {
        let max = self.max_retry_count;
        let item = self.update(id, |item| {
            item.retry_count += 1;
            item.error_message = Some(error_message.to_string());
            if item.retry_count >= max {
                item.status = SyncStatus::Failed;
            }
        })?;

        let status = if item.status == SyncStatus::Failed {
            log::warn!(
                "{} for {} failed {} time(s), parking: {error_message}",
                item.operation,
                item.key,
                item.retry_count
            );
            SyncStatus::Failed
        } else {
            self.return_to_pending(id);
            SyncStatus::Pending
        };

        self.persist();
        Some(status)
    }

    /// Give a failed item a fresh retry budget.
    pub fn reset_for_retry(&self, id: &str) -> bool {
        let reset = self
            .update(id, |item| {
                item.retry_count = 0;
                item.error_message = None;
            })
            .is_some();

        if reset {
            self.return_to_pending(id);
            self.persist();
        }
        reset
    }

    /// Reset every failed item. Returns how many were reset.
    pub fn reset_all_failed(&self) -> usize {
        let ids: Vec<String> = self.failed_items().into_iter().map(|i| i.id).collect();
        ids.iter().filter(|id| self.reset_for_retry(id)).count()
    }

    /// Drop every failed item without retrying. Returns how many were dropped.
    pub fn clear_failed(&self) -> usize {
        let dropped = {
            let mut items = self.items.borrow_mut();
            let before = items.len();
            items.retain(|i| i.status != SyncStatus::Failed);
            before - items.len()
        };

        if dropped > 0 {
            log::info!("discarded {dropped} failed item(s)");
            self.persist();
        }
        dropped
    }

    /// Status counts over the current queue.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        let items = self.items.borrow();
        let mut counts = QueueCounts {
            total: items.len(),
            ..QueueCounts::default()
        };
        for item in items.iter() {
            match item.status {
                SyncStatus::Pending => counts.pending += 1,
                SyncStatus::InFlight => counts.in_flight += 1,
                SyncStatus::Failed => counts.failed += 1,
                SyncStatus::Completed => {},
            }
        }
        counts
    }

    /// Timestamp of the oldest pending item.
    #[must_use]
    pub fn oldest_pending_at(&self) -> Option<DateTime<Utc>> {
        self.items
            .borrow()
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| i.created_at)
            .min()
    }

    /// Check if there are any pending items.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.items.borrow().iter().any(SyncItem::is_pending)
    }

    fn update<F>(&self, id: &str, f: F) -> Option<SyncItem>
    where
        F: FnOnce(&mut SyncItem),
    {
        let mut items = self.items.borrow_mut();
        let item = items.iter_mut().find(|i| i.id == id)?;
        f(item);
        Some(item.clone())
    }

    fn remove_item(&self, id: &str) -> bool {
        let mut items = self.items.borrow_mut();
        let before = items.len();
        items.retain(|i| i.id != id);
        items.len() != before
    }

    /// Flip an item to pending without breaking the one-pending-per-key rule.
    ///
    /// If a newer pending item exists for the same key, the older item is
    /// folded into it and removed: the newer payload wins and the older
    /// operation participates in the merge as the prior one.
    fn return_to_pending(&self, id: &str) {
        let mut items = self.items.borrow_mut();
        let Some(idx) = items.iter().position(|i| i.id == id) else {
            return;
        };

        let key = items[idx].key.clone();
        let newer = items
            .iter()
            .position(|i| i.is_pending() && i.key == key && i.id != id);

        match newer {
            Some(other) => {
                let prior = items[idx].operation;
                let merged = OperationType::merge(prior, items[other].operation);
                items[other].operation = merged;
                log::debug!("folded {id} into newer pending item {}", items[other].id);
                items.remove(idx);
            },
            None => items[idx].status = SyncStatus::Pending,
        }
    }

    fn persist(&self) {
        let snapshot = match serde_json::to_value(&*self.items.borrow()) {
            Ok(value) => value,
            Err(e) => {
                log::error!("failed to encode queue snapshot: {e}");
                return;
            },
        };

        if let Err(e) = self.store.set(&self.queue_key, &snapshot) {
            log::warn!("failed to persist queue snapshot: {e}");
        }
    }
}
