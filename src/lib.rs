//! draft-sync - offline operation queue for a local-first writing tool
//!
//! This crate buffers record mutations made while the app is disconnected,
//! watches for connectivity transitions, and replays the buffered mutations
//! against a key/value backing store with bounded retries and per-key merging.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

pub use config::{Paths, Settings, SyncSettings};
pub use error::{StoreError, SyncError};
pub use storage::{BackingStore, MemoryStore, SqliteStore};
pub use sync::{EventKind, OperationType, QueueState, SyncEngine, SyncEvent, SyncItem, SyncStatus};
