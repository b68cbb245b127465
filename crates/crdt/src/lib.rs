//! Operation-based CRDT primitives and the per-document tree that
//! composes them.
//!
//! - [`registers`] — the three register types (`MapLww`, `Rga`, `OrSet`)
//!   that resolve concurrent writes deterministically.
//! - [`op`] — the `Operation` envelope exchanged between replicas.
//! - [`document`] — [`CrdtDocument`], the arena-based tree a single
//!   `(collection, docId)` is stored as.
//!
//! Every primitive here resolves ties with the same rule
//! ([`verge_core::tie_break`]), except `Rga` sibling ordering, which
//! needs its own total order to produce a stable list rather than pick
//! a single winner (see [`registers::Rga`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod op;
pub mod registers;

pub use document::CrdtDocument;
pub use op::{ElementId, OpPayload, Operation, Tag};
pub use registers::{ContainerKind, MapLww, OrSet, RegisterValue, Rga};
