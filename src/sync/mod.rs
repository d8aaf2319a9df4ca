//! Offline operation queue and reconciliation engine.
//!
//! Mutations made while disconnected are buffered in a durable queue and
//! replayed against the backing store once connectivity returns.
//!
//! Features:
//! - Per-key merge on enqueue (at most one pending item per key)
//! - Bounded batches with per-item retry counts
//! - Debounced scheduling on enqueue, reconnect and foreground regain
//! - Lifecycle events for observers

pub mod connectivity;
pub mod engine;
pub mod events;
pub mod executor;
pub mod item;
pub mod queue;
pub mod scheduler;

pub use connectivity::ConnectivityMonitor;
pub use engine::SyncEngine;
pub use events::{EventBus, EventKind, Subscription, SyncEvent};
pub use executor::SyncExecutor;
pub use item::{BatchSummary, OperationType, QueueState, SyncItem, SyncStatus};
pub use queue::{QueueCounts, QueueStore};
pub use scheduler::Scheduler;
