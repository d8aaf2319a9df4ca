//! Engine settings.
//!
//! Settings are loaded from `~/.draftsync/config.yaml`. Every field has a
//! default, so a missing file or a partial file is always valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::SyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Sync engine tunables.
    pub sync: SyncSettings,
}

/// Tunables for the queue, executor and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Maximum number of items applied in one executor run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Failed attempts after which an item is parked as failed.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// Delay before a run requested by an enqueue, reconnect or foreground event.
    #[serde(default = "default_immediate_delay_ms")]
    pub immediate_delay_ms: u64,
    /// Delay before the follow-up run after a batch that left work pending.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Backing store key the queue snapshot is persisted under.
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
}

const fn default_batch_size() -> usize {
    10
}

const fn default_max_retry_count() -> u32 {
    3
}

const fn default_immediate_delay_ms() -> u64 {
    100
}

const fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_queue_key() -> String {
    "sync_queue".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retry_count: default_max_retry_count(),
            immediate_delay_ms: default_immediate_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            queue_key: default_queue_key(),
        }
    }
}

impl SyncSettings {
    /// Delay used for "run as soon as possible".
    #[must_use]
    pub const fn immediate_delay(&self) -> Duration {
        Duration::from_millis(self.immediate_delay_ms)
    }

    /// Delay used between waves of a backlog and before retrying failures.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Check that the tunables describe a usable engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size or retry limit is zero.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be at least 1".to_string()));
        }
        if self.max_retry_count == 0 {
            return Err(SyncError::Config(
                "sync.max_retry_count must be at least 1".to_string(),
            ));
        }
        if self.queue_key.is_empty() {
            return Err(SyncError::Config("sync.queue_key must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from the default path.
    ///
    /// If the config file doesn't exist, returns default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load settings from a specific path.
    ///
    /// If the config file doesn't exist, returns default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// holds invalid values.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        let settings: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!("Failed to parse config file {}: {e}", path.display()))
        })?;

        settings.sync.validate()?;
        Ok(settings)
    }

    /// Save settings to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!("Failed to write config file {}: {e}", path.display()))
        })
    }
}
