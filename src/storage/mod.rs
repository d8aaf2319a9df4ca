//! Storage layer for draft-sync.
//!
//! This module provides the [`BackingStore`] contract the engine writes
//! through, an in-memory implementation, and a SQLite-backed durable one.

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
#[cfg(test)]
pub use store::MockBackingStore;
pub use store::{BackingStore, MemoryStore};
