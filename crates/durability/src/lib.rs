//! Write-ahead log: durability modes, the append/fsync writer, and
//! crash-recovery replay.
//!
//! The WAL is line-delimited JSON ([`record::WalRecord`]), one record
//! per buffered write, written through [`wal::WalWriter`] and replayed
//! with [`wal::recover`] on startup.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mode;
pub mod record;
pub mod wal;

pub use mode::DurabilityMode;
pub use record::{WalOp, WalRecord};
pub use wal::{recover, WalWriter};
