//! Lightweight unique identifier for nodes within a [`Graph`](crate::graph::Graph).
//!
//! Each [`Node`](crate::node::Node) inserted into the graph is assigned a
//! sequential `NodeId` starting at 1. Ids are never reused, and a freshly
//! inserted node's id is strictly greater than every id handed out before
//! it — the duplicate reducer relies on this to break ties towards the
//! numerically smallest survivor.
//!
//! They’re small, `Copy`, and hashable, so they can be used efficiently as
//! keys in maps or sets when snapshotting or traversing the graph.

use serde::{Deserialize, Serialize};

/// Unique numeric identifier for a node in a graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a new `NodeId` (used internally by the graph).
    pub(crate) fn new(v: u32) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    ///
    /// Useful mainly for debugging or emitted identifiers.
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node{}", self.0)
    }
}
