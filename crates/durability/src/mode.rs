//! WAL durability modes.

/// Controls when the WAL is fsynced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every append. Safest, slowest; not the default.
    Strict,
    /// fsync every `batch_size` writes or every `interval_ms`,
    /// whichever comes first. The default (`safe_mode=true` maps
    /// here).
    Batched {
        /// Maximum time between fsyncs, in milliseconds.
        interval_ms: u64,
        /// Maximum writes between fsyncs.
        batch_size: usize,
    },
    /// No WAL at all. Only valid with `safe_mode=false`; used in
    /// tests, never in a deployment that cares about crash recovery.
    InMemory,
}

impl DurabilityMode {
    /// The default batched mode: `interval_ms=100`, `batch_size=1000`.
    pub fn default_batched() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }

    /// `false` only for [`DurabilityMode::InMemory`].
    pub fn requires_wal(&self) -> bool {
        !matches!(self, DurabilityMode::InMemory)
    }

    /// `true` only for [`DurabilityMode::Strict`].
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::default_batched()
    }
}
