//! Queue item types.
//!
//! Defines the buffered mutation record, its status state machine, and the
//! derived queue summary published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a payload is applied to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Write a new record
    Create,
    /// Overwrite an existing record
    Update,
    /// Remove the record
    Delete,
}

impl OperationType {
    /// Get the display name for this operation type.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Resolve the operation of a pending item after `next` is merged into it.
    ///
    /// A delete always wins. A pending create stays a create, since a create
    /// followed by an update is still, net, a create. Anything else becomes an
    /// update.
    #[must_use]
    pub const fn merge(prior: Self, next: Self) -> Self {
        match (prior, next) {
            (_, Self::Delete) => Self::Delete,
            (Self::Create, _) => Self::Create,
            _ => Self::Update,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Status of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting to be applied
    Pending,
    /// Currently being applied
    InFlight,
    /// Applied; removed from the queue right after
    Completed,
    /// Retry budget exhausted
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Unique ID, stable for the item's lifetime
    pub id: String,
    /// Backing store key the mutation targets
    pub key: String,
    /// How `payload` is applied
    pub operation: OperationType,
    /// Value to write; ignored for deletes
    pub payload: Value,
    /// When the item was last mutated (refreshed on merge)
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: SyncStatus,
    /// Number of failed application attempts
    pub retry_count: u32,
    /// Last attempt timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Last error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SyncItem {
    /// Create a new pending item with a fresh ID.
    #[must_use]
    pub fn new(key: impl Into<String>, operation: OperationType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            operation,
            payload,
            created_at: Utc::now(),
            status: SyncStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            error_message: None,
        }
    }

    /// Fold a newer mutation for the same key into this item.
    pub fn absorb(&mut self, operation: OperationType, payload: Value) {
        self.operation = OperationType::merge(self.operation, operation);
        self.payload = payload;
        self.created_at = Utc::now();
    }

    /// Check if the item is waiting to be applied.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::Pending
    }
}

/// Summary of one executor batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Items applied successfully
    pub succeeded: usize,
    /// Items whose application failed
    pub failed: usize,
}

impl BatchSummary {
    /// Check if every item in the batch was applied.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get total items attempted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} item(s): {} succeeded, {} failed",
            self.total(),
            self.succeeded,
            self.failed
        )
    }
}

/// Derived view of the queue for observers. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueState {
    /// Items waiting to be applied
    pub pending_count: usize,
    /// Items currently being applied
    pub in_flight_count: usize,
    /// Items parked after exhausting retries
    pub failed_count: usize,
    /// All items in the queue
    pub total_count: usize,
    /// Current connectivity signal
    pub is_online: bool,
    /// Whether a batch is executing right now
    pub is_syncing: bool,
    /// When the last batch finished
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Oldest pending item timestamp
    pub oldest_pending_at: Option<DateTime<Utc>>,
}
