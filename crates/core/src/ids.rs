//! Identifiers used throughout VergeDB.
//!
//! Validation rules here are frozen for dataset compatibility (see
//! [`crate::clock`] for the companion tie-break rule): changing them
//! changes which collection/doc names existing data is addressable by.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved system prefix for internal collection names.
pub const RESERVED_PREFIX: &str = "_verge/";

/// Error returned by [`validate_collection_name`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    /// Name was empty.
    #[error("name must not be empty")]
    Empty,
    /// Name contained a character outside `[A-Za-z0-9_]`.
    #[error("name contains invalid character: {0:?}")]
    InvalidChar(char),
    /// Name used the reserved system prefix.
    #[error("name uses reserved prefix {RESERVED_PREFIX:?}")]
    ReservedPrefix,
}

/// Validate a collection name against `[A-Za-z0-9_]+`.
///
/// Collections are created implicitly on first write, so this is the
/// only gate standing between a client-supplied string and a directory
/// on disk — it must reject anything that isn't safe to use as a table
/// name in every shard store.
pub fn validate_collection_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(NameError::ReservedPrefix);
    }
    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return Err(NameError::InvalidChar(c));
        }
    }
    Ok(())
}

/// A named collection namespace. Carries no schema; created implicitly
/// on first write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate and wrap a collection name.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_collection_name(&name)?;
        Ok(Self(name))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document identifier, unique within a [`CollectionName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    /// Validate and wrap a document id. Must be non-empty and NUL-free.
    pub fn new(id: impl Into<String>) -> Result<Self, NameError> {
        let id = id.into();
        if id.is_empty() {
            return Err(NameError::Empty);
        }
        if id.contains('\0') {
            return Err(NameError::InvalidChar('\0'));
        }
        Ok(Self(id))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a CRDT replica: a server node or a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a node identifier. Node ids are not format-validated — they
    /// are generated by the runtime (UUIDs, connection ids), not parsed
    /// from untrusted collection/doc name input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Globally unique identifier for a single CRDT mutation.
///
/// `(node, counter)` alone would suffice for uniqueness under a
/// correct client, but `nonce` guards against a replica replaying a
/// stale counter after local storage loss (e.g. a client that lost its
/// offline queue and restarted its counter from zero).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    /// Originating replica.
    pub node: NodeId,
    /// Per-node monotonic counter.
    pub counter: u64,
    /// Disambiguates a counter reused by a replica that lost state.
    pub nonce: u64,
}

impl OpId {
    /// Construct an id.
    pub fn new(node: NodeId, counter: u64, nonce: u64) -> Self {
        Self {
            node,
            counter,
            nonce,
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node, self.counter, self.nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_accepts_alphanumeric_and_underscore() {
        assert!(CollectionName::new("users_2024").is_ok());
    }

    #[test]
    fn collection_name_rejects_empty() {
        assert_eq!(CollectionName::new(""), Err(NameError::Empty));
    }

    #[test]
    fn collection_name_rejects_reserved_prefix() {
        assert_eq!(
            CollectionName::new("_verge/internal"),
            Err(NameError::ReservedPrefix)
        );
    }

    #[test]
    fn collection_name_rejects_punctuation() {
        assert!(matches!(
            CollectionName::new("a-b"),
            Err(NameError::InvalidChar('-'))
        ));
    }

    #[test]
    fn doc_id_rejects_nul() {
        assert!(DocId::new("a\0b").is_err());
    }

    #[test]
    fn op_id_display_round_trips_components() {
        let id = OpId::new(NodeId::new("n1"), 5, 0);
        assert_eq!(id.to_string(), "n1:5:0");
    }
}
