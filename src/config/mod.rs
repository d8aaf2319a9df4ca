//! Configuration management for draft-sync.
//!
//! This module handles loading and saving configuration from `~/.draftsync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Settings, SyncSettings};
