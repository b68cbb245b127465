//! Runtime configuration, builder-style, with every knob in-process
//! rather than file-backed, since VergeDB's engine is embedded, not a
//! standalone server process.

use serde::{Deserialize, Serialize};
use verge_durability::DurabilityMode;

/// Every tunable the engine exposes, with the defaults the interface
/// spec enumerates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Partitioning degree. Immutable per dataset once chosen.
    pub shard_count: usize,
    /// Per-collection buffer high-water mark before a forced flush.
    pub buffer_size: usize,
    /// Flush timer cadence, milliseconds.
    pub flush_interval_ms: u64,
    /// Max entries drained per collection per flush.
    pub batch_size: usize,
    /// Enables WAL fsync and crash recovery. `false` runs fully in memory.
    pub safe_mode: bool,
    /// Read-cache entry TTL, milliseconds.
    pub cache_ttl_ms: i64,
    /// Per-document applied-op-id retention.
    pub applied_op_history: usize,
    /// Idle threshold for the presence sweeper, milliseconds.
    pub presence_ttl_ms: i64,
    /// Tombstone GC horizon, milliseconds.
    pub tombstone_retention_ms: i64,
    /// Max shard-commit retries during a flush before surfacing a
    /// durable error. Not part of the enumerated wire config, but
    /// needed to bound the write buffer's own retry-with-backoff loop.
    pub max_flush_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shard_count: 8,
            buffer_size: 10_000,
            flush_interval_ms: 100,
            batch_size: 1_000,
            safe_mode: true,
            cache_ttl_ms: 60_000,
            applied_op_history: 1_000,
            presence_ttl_ms: 30_000,
            tombstone_retention_ms: 86_400_000,
            max_flush_retries: 5,
        }
    }
}

impl Config {
    /// Start a builder seeded with the default values.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The WAL durability mode implied by `safe_mode`/`flush_interval_ms`/`batch_size`.
    pub fn durability_mode(&self) -> DurabilityMode {
        if !self.safe_mode {
            DurabilityMode::InMemory
        } else {
            DurabilityMode::Batched {
                interval_ms: self.flush_interval_ms,
                batch_size: self.batch_size,
            }
        }
    }

    /// `verge_core::Limits` derived from this config's document knobs.
    pub fn limits(&self) -> verge_core::Limits {
        verge_core::Limits {
            applied_op_history: self.applied_op_history,
            ..verge_core::Limits::default()
        }
    }
}

/// Fluent builder over [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder(Config);

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder(Config::default())
    }
}

impl ConfigBuilder {
    /// Override `shard_count`.
    pub fn shard_count(mut self, n: usize) -> Self {
        self.0.shard_count = n;
        self
    }

    /// Override `buffer_size`.
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.0.buffer_size = n;
        self
    }

    /// Override `flush_interval_ms`.
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.0.flush_interval_ms = ms;
        self
    }

    /// Override `batch_size`.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.0.batch_size = n;
        self
    }

    /// Override `safe_mode`.
    pub fn safe_mode(mut self, on: bool) -> Self {
        self.0.safe_mode = on;
        self
    }

    /// Override `cache_ttl_ms`.
    pub fn cache_ttl_ms(mut self, ms: i64) -> Self {
        self.0.cache_ttl_ms = ms;
        self
    }

    /// Override `applied_op_history`.
    pub fn applied_op_history(mut self, n: usize) -> Self {
        self.0.applied_op_history = n;
        self
    }

    /// Override `presence_ttl_ms`.
    pub fn presence_ttl_ms(mut self, ms: i64) -> Self {
        self.0.presence_ttl_ms = ms;
        self
    }

    /// Override `tombstone_retention_ms`.
    pub fn tombstone_retention_ms(mut self, ms: i64) -> Self {
        self.0.tombstone_retention_ms = ms;
        self
    }

    /// Override `max_flush_retries`.
    pub fn max_flush_retries(mut self, n: usize) -> Self {
        self.0.max_flush_retries = n;
        self
    }

    /// Finish building.
    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_enumerated_spec_values() {
        let config = Config::default();
        assert_eq!(config.shard_count, 8);
        assert_eq!(config.buffer_size, 10_000);
        assert_eq!(config.flush_interval_ms, 100);
        assert_eq!(config.batch_size, 1_000);
        assert!(config.safe_mode);
        assert_eq!(config.cache_ttl_ms, 60_000);
        assert_eq!(config.applied_op_history, 1_000);
        assert_eq!(config.presence_ttl_ms, 30_000);
        assert_eq!(config.tombstone_retention_ms, 86_400_000);
    }

    #[test]
    fn builder_overrides_only_requested_fields() {
        let config = Config::builder().shard_count(16).safe_mode(false).build();
        assert_eq!(config.shard_count, 16);
        assert!(!config.safe_mode);
        assert_eq!(config.buffer_size, 10_000);
    }

    #[test]
    fn unsafe_mode_selects_in_memory_durability() {
        let config = Config::builder().safe_mode(false).build();
        assert!(matches!(config.durability_mode(), DurabilityMode::InMemory));
    }
}
