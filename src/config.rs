//! Configuration for msgstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a message store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory holding every partition's shard files (flat layout):
    ///   {data_dir}/
    ///     ├── {partition}-{first_id:020}.msg
    ///     └── {partition}-{first_id:020}.idx
    pub data_dir: PathBuf,

    /// Shard capacity: number of id slots per shard file pair.
    ///
    /// Shard boundaries are derived from this value, so it must stay the same
    /// for the lifetime of a data directory. Opening existing shards with a
    /// different value is reported as a configuration error.
    pub messages_per_file: u64,

    /// Sync strategy: how often to fsync shard files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Fetch Configuration
    // -------------------------------------------------------------------------
    /// Number of messages a fetch worker may read ahead of its consumer
    pub fetch_buffer: usize,
}

/// Shard sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appends (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./msgstore_data"),
            messages_per_file: 10_000,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            fetch_buffer: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.messages_per_file == 0 {
            return Err(StoreError::Config(
                "messages_per_file must be greater than zero".to_string(),
            ));
        }
        if self.fetch_buffer == 0 {
            return Err(StoreError::Config(
                "fetch_buffer must be greater than zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(StoreError::Config(
                "sync count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all shard files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the shard capacity
    pub fn messages_per_file(mut self, count: u64) -> Self {
        self.config.messages_per_file = count;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the fetch read-ahead buffer (in messages)
    pub fn fetch_buffer(mut self, size: usize) -> Self {
        self.config.fetch_buffer = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
