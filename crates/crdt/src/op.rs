//! Operation envelope and payload types.
//!
//! Every mutation to a [`crate::document::CrdtDocument`] — local or
//! remote — is represented as an [`Operation`]: a path into the
//! document tree, a payload describing the mutation, and the causal
//! metadata (`op_id`, `clock`, `node_id`, `timestamp`) needed to
//! resolve it against concurrent writes from other replicas.

use serde::{Deserialize, Serialize};
use verge_core::{NodeId, OpId, VectorClock};

/// Identifies a single element inserted into an [`crate::registers::Rga`].
///
/// Distinct from [`OpId`]: an `ElementId` is the *payload* (the list
/// position marker clients refer to with `rga_delete`), while `OpId`
/// identifies the *mutation* that created it. `counter` is the
/// originating node's own vector-clock tick at creation time, which
/// doubles as the RGA sibling-ordering key (see
/// [`crate::registers::Rga::insert`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId {
    /// Originating node.
    pub node: NodeId,
    /// That node's own clock counter at creation.
    pub counter: u64,
}

/// A tag associated with one `OR-Set` add. Removal targets tags, not
/// values, which is what makes concurrent add/remove resolve
/// deterministically (add-wins when the tag is fresh, remove-wins when
/// the add's tag was already tombstoned).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Originating node.
    pub node: NodeId,
    /// That node's own clock counter at creation.
    pub counter: u64,
    /// Originator wall-clock time (tiebreaker only, never authority).
    pub timestamp: i64,
}

/// The mutation carried by an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpPayload {
    /// Set a scalar or nested-container value at `path`.
    MapSet {
        /// Path of map keys from the document root.
        path: Vec<String>,
        /// New value.
        value: verge_core::Value,
    },
    /// Delete the value at `path`, leaving a tombstone.
    MapDelete {
        /// Path of map keys from the document root.
        path: Vec<String>,
    },
    /// Insert into the RGA bound at `path`, after `after` (or at the
    /// head if `None`), producing `element_id`.
    RgaInsert {
        /// Path to the RGA (lazily created if absent).
        path: Vec<String>,
        /// Element to insert after, or `None` for index 0.
        after: Option<ElementId>,
        /// The newly allocated element id.
        element_id: ElementId,
        /// Element value.
        value: verge_core::Value,
    },
    /// Tombstone an RGA element.
    RgaDelete {
        /// Path to the RGA.
        path: Vec<String>,
        /// Element being removed.
        element_id: ElementId,
    },
    /// Associate a fresh tag with `value` in the OR-Set at `path`.
    OrSetAdd {
        /// Path to the OR-Set (lazily created if absent).
        path: Vec<String>,
        /// Value being added.
        value: verge_core::Value,
        /// Tag generated for this add.
        tag: Tag,
    },
    /// Tombstone the given tags for `value` in the OR-Set at `path`.
    OrSetRemove {
        /// Path to the OR-Set.
        path: Vec<String>,
        /// Value being removed.
        value: verge_core::Value,
        /// The tags observed live at remove time.
        tags: Vec<Tag>,
    },
}

impl OpPayload {
    /// The path this payload addresses, common to every variant.
    pub fn path(&self) -> &[String] {
        match self {
            OpPayload::MapSet { path, .. }
            | OpPayload::MapDelete { path }
            | OpPayload::RgaInsert { path, .. }
            | OpPayload::RgaDelete { path, .. }
            | OpPayload::OrSetAdd { path, .. }
            | OpPayload::OrSetRemove { path, .. } => path,
        }
    }
}

/// One CRDT mutation, with the causal metadata needed to order and
/// deduplicate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Globally unique id of this mutation.
    pub op_id: OpId,
    /// Vector clock snapshot at the originating node when this
    /// mutation was created.
    pub clock: VectorClock,
    /// Originating replica.
    pub node_id: NodeId,
    /// Originator wall-clock time (tiebreaker only, never authority).
    pub timestamp: i64,
    /// The mutation itself.
    pub payload: OpPayload,
}

impl Operation {
    /// The (node_id, timestamp, op_id) tuple used by the uniform
    /// tie-break rule.
    pub fn tie_break_key(&self) -> (&NodeId, i64, &OpId) {
        (&self.node_id, self.timestamp, &self.op_id)
    }
}
