//! The embedded engine: write buffer, CRDT sync hub, tombstone GC, and
//! the [`database::Database`] facade tying them to the shard pool and
//! WAL.
//!
//! [`buffer::WriteBuffer`] is the write path's WAL-first staging area;
//! [`hub::SyncHub`] owns live CRDT document state and fan-out;
//! [`database::Database`] wires both to `verge-storage`'s shard pool
//! behind the REST-shaped [`database::CoreApi`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod database;
pub mod gc;
pub mod hub;

pub use buffer::{BufferedLookup, WriteBuffer};
pub use config::{Config, ConfigBuilder};
pub use database::{CoreApi, Database};
pub use gc::sweep_tombstones;
pub use hub::{BroadcastEnvelope, BroadcastSink, SyncHub, SyncLog, SyncLogEntry};
