//! Core types for VergeDB
//!
//! This crate defines the foundational types shared across every other
//! crate in the workspace:
//! - [`CollectionName`] / [`DocId`] / [`NodeId`]: identifiers
//! - [`OpId`]: globally unique operation identifier
//! - [`VectorClock`]: per-node logical time with causal comparison
//! - [`Value`]: tagged-union value domain used by the CRDT and wire layers
//! - [`VergeError`] / [`ErrorCode`]: the error taxonomy from the error
//!   handling design
//! - [`Limits`]: size limits enforced at the storage/wire boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod ids;
pub mod limits;
pub mod value;

pub use clock::{tie_break, ClockOrdering, VectorClock};
pub use error::{ErrorCode, VergeError, VergeResult};
pub use ids::{validate_collection_name, CollectionName, DocId, NameError, NodeId, OpId};
pub use limits::Limits;
pub use value::Value;
