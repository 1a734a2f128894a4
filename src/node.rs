//! Graph "nodes": kinds, per-kind parameters, payloads and duplicate tests.
//!
//! This module defines:
//! - [`NodeKind`]: the closed set of node kinds a graph may contain —
//!   tensor constants, the algebraic operations, interface sinks/sources
//!   and the control-transfer node.
//! - [`KindParams`]: the tagged per-kind parameter payloads (contraction
//!   index lists, permutations, projection ranges, Kronecker involutions,
//!   …). Parameters are plain data, `Eq`-comparable and hashable so the
//!   duplicate reducer can use them directly.
//! - [`Node`]: the record stored in the graph: ordered parents, child
//!   set, branch targets for control transfer, storage relations and the
//!   attached payload.
//!
//! # Notes
//! * Parents are an **ordered sequence** — operand order matters for
//!   every binary operation. Children are a set.
//! * `branch_true`/`branch_false` are control edges, kept strictly apart
//!   from the data-dependency `parents`; the data projection of the graph
//!   stays acyclic even when a While node re-enters an earlier region.
//! * Kronecker scaling uses [`OrderedFloat`] so parameter records stay
//!   `Eq + Hash` without hand-written float handling.

use crate::node_id::NodeId;
use crate::ring::Literal;
use crate::space::VectorSpace;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The closed set of node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Vector,
    VectorAddition,
    VectorContraction,
    VectorScalarProduct,
    VectorVectorProduct,
    VectorPower,
    VectorComparisonIsSmaller,
    VectorKroneckerDeltaProduct,
    VectorPermutation,
    VectorProjection,
    VectorJoinIndices,
    VectorIndexSplitSum,
    VectorCrossCorrelation,
    VectorMaxPool,
    Output,
    Input,
    ControlTransferWhile,
}

impl NodeKind {
    /// Stable display name, used in logs and emitted comments.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Vector => "VECTOR",
            NodeKind::VectorAddition => "VECTOR_ADDITION",
            NodeKind::VectorContraction => "VECTOR_CONTRACTION",
            NodeKind::VectorScalarProduct => "VECTOR_SCALAR_PRODUCT",
            NodeKind::VectorVectorProduct => "VECTOR_VECTOR_PRODUCT",
            NodeKind::VectorPower => "VECTOR_POWER",
            NodeKind::VectorComparisonIsSmaller => "VECTOR_COMPARISON_IS_SMALLER",
            NodeKind::VectorKroneckerDeltaProduct => "VECTOR_KRONECKER_DELTA_PRODUCT",
            NodeKind::VectorPermutation => "VECTOR_PERMUTATION",
            NodeKind::VectorProjection => "VECTOR_PROJECTION",
            NodeKind::VectorJoinIndices => "VECTOR_JOIN_INDICES",
            NodeKind::VectorIndexSplitSum => "VECTOR_INDEX_SPLIT_SUM",
            NodeKind::VectorCrossCorrelation => "VECTOR_CROSS_CORRELATION",
            NodeKind::VectorMaxPool => "VECTOR_MAX_POOL",
            NodeKind::Output => "OUTPUT",
            NodeKind::Input => "INPUT",
            NodeKind::ControlTransferWhile => "CONTROL_TRANSFER_WHILE",
        }
    }

    /// True for kinds the emitter turns into a kernel function.
    ///
    /// `Vector` constants are pure data and Kronecker deltas are fused
    /// into the kernels of their consumers; neither gets an entry in the
    /// emitted nodes table.
    #[must_use]
    pub fn is_executable(self) -> bool {
        !matches!(self, NodeKind::Vector | NodeKind::VectorKroneckerDeltaProduct)
    }
}

/// Per-kind parameter records.
///
/// Kinds without parameters use [`KindParams::None`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindParams {
    None,
    Contract {
        lfactors: Vec<u32>,
        rfactors: Vec<u32>,
    },
    Permute {
        /// The new tensor carries index `indices[j]` at position `j`.
        indices: Vec<u32>,
    },
    Project {
        /// One half-open `(lo, hi)` window per factor, `lo < hi <= dim`.
        range: Vec<(u32, u32)>,
    },
    JoinIndices {
        /// Sorted, mutually disjoint groups of factor indices.
        groups: Vec<Vec<u32>>,
    },
    IndexSplitSum {
        /// One entry per factor; 0 leaves the axis untouched.
        split_positions: Vec<u32>,
    },
    MaxPool {
        pool_size: Vec<u32>,
    },
    Kronecker {
        /// Involution over the rank: position `i` pairs with
        /// `delta_pairs[i]` and `delta_pairs[delta_pairs[i]] == i`.
        delta_pairs: Vec<u32>,
        scaling: OrderedFloat<f32>,
    },
}

/// The object attached to a node, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    None,
    /// A tensor-valued node: its space, and a dense initializer for
    /// constants (`None` for operation results and Kronecker deltas).
    Tensor {
        space: VectorSpace,
        value: Option<Literal>,
    },
    /// A named sink.
    Output { name: String },
    /// A named source with a default fill value.
    Input {
        name: String,
        space: VectorSpace,
        default: OrderedFloat<f32>,
    },
}

impl Payload {
    /// Ordinal fed into the partial hash; cheap proxy for the payload kind.
    fn kind_ordinal(&self) -> u8 {
        match self {
            Payload::None => 0,
            Payload::Tensor { .. } => 1,
            Payload::Output { .. } => 2,
            Payload::Input { .. } => 3,
        }
    }

    /// The space of a tensor-carrying payload.
    #[must_use]
    pub fn space(&self) -> Option<&VectorSpace> {
        match self {
            Payload::Tensor { space, .. } => Some(space),
            Payload::Input { space, .. } => Some(space),
            _ => None,
        }
    }

    /// The dense initializer of a constant, if present.
    #[must_use]
    pub fn value(&self) -> Option<&Literal> {
        match self {
            Payload::Tensor { value, .. } => value.as_ref(),
            _ => None,
        }
    }
}

/// A node in a [`Graph`](crate::graph::Graph).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub params: KindParams,
    pub payload: Payload,
    /// Ordered operand references; every id exists in the graph at the
    /// moment this node is inserted.
    pub parents: Vec<NodeId>,
    pub children: BTreeSet<NodeId>,
    /// Control edge taken by a While kernel when its condition is nonzero.
    pub branch_true: Option<NodeId>,
    /// Control edge taken when the condition is zero.
    pub branch_false: Option<NodeId>,
    /// This node writes its result into the buffer of the referenced node.
    pub stored_in: Option<NodeId>,
    /// Reciprocal of `stored_in`.
    pub used_as_storage_by: BTreeSet<NodeId>,
    pub id: NodeId,
}

impl Node {
    /// A fresh, unattached node of the given kind.
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            params: KindParams::None,
            payload: Payload::None,
            parents: Vec::new(),
            children: BTreeSet::new(),
            branch_true: None,
            branch_false: None,
            stored_in: None,
            used_as_storage_by: BTreeSet::new(),
            id: NodeId::new(0),
        }
    }

    /// Partial structural hash over `(parents, kind, payload kind)`.
    ///
    /// Nodes with equal hashes are *candidates* for being duplicates;
    /// equal hash does not mean they perform the same operation. The hash
    /// is order-sensitive over parents.
    #[must_use]
    pub fn partial_hash(&self) -> u64 {
        // djb2
        let mut h: u64 = 5381;
        let mut put = |byte: u8| h = h.wrapping_mul(33).wrapping_add(u64::from(byte));
        for p in &self.parents {
            for b in p.raw().to_le_bytes() {
                put(b);
            }
        }
        put(self.kind as u8);
        put(self.payload.kind_ordinal());
        h
    }

    /// Deep payload comparison: spaces, buffer bits, interface descriptors.
    #[must_use]
    pub fn same_payload(l: &Node, r: &Node) -> bool {
        match (&l.payload, &r.payload) {
            (Payload::None, Payload::None) => true,
            (
                Payload::Tensor { space: ls, value: lv },
                Payload::Tensor { space: rs, value: rv },
            ) => {
                if ls != rs {
                    return false;
                }
                match (lv, rv) {
                    (None, None) => true,
                    (Some(l), Some(r)) => l.same_bits(r),
                    _ => false,
                }
            }
            (Payload::Output { name: ln }, Payload::Output { name: rn }) => ln == rn,
            (
                Payload::Input { name: ln, space: ls, default: ld },
                Payload::Input { name: rn, space: rs, default: rd },
            ) => ln == rn && ls == rs && ld == rd,
            _ => false,
        }
    }

    /// The full duplicate test used by the reducer.
    ///
    /// Two nodes are duplicates iff they have an identical parent
    /// sequence, kind, kind parameters, payload (deep compare), storage
    /// relations and branch targets.
    #[must_use]
    pub fn are_duplicate(l: &Node, r: &Node) -> bool {
        l.parents == r.parents
            && l.stored_in == r.stored_in
            && l.used_as_storage_by == r.used_as_storage_by
            && l.branch_true == r.branch_true
            && l.branch_false == r.branch_false
            && l.kind == r.kind
            && l.params == r.params
            && Node::same_payload(l, r)
    }

    /// The space of this node's result, if it is tensor-valued.
    #[must_use]
    pub fn space(&self) -> Option<&VectorSpace> {
        self.payload.space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Ring;

    fn vector_node(init: Vec<f32>) -> Node {
        let mut n = Node::new(NodeKind::Vector);
        n.payload = Payload::Tensor {
            space: VectorSpace::new(Ring::Float32, init.len() as u32),
            value: Some(init.into()),
        };
        n
    }

    #[test]
    fn partial_hash_matches_for_same_shape() {
        let a = vector_node(vec![1.0, 2.0]);
        let b = vector_node(vec![3.0, 4.0]);
        assert_eq!(a.partial_hash(), b.partial_hash());
    }

    #[test]
    fn partial_hash_is_parent_order_sensitive() {
        let mut a = Node::new(NodeKind::VectorContraction);
        a.parents = vec![NodeId::new(1), NodeId::new(2)];
        let mut b = Node::new(NodeKind::VectorContraction);
        b.parents = vec![NodeId::new(2), NodeId::new(1)];
        assert_ne!(a.partial_hash(), b.partial_hash());
    }

    #[test]
    fn duplicate_requires_equal_buffers() {
        let a = vector_node(vec![1.0, 2.0]);
        let b = vector_node(vec![1.0, 2.0]);
        let c = vector_node(vec![1.0, 3.0]);
        assert!(Node::are_duplicate(&a, &b));
        assert!(!Node::are_duplicate(&a, &c));
    }

    #[test]
    fn duplicate_requires_equal_params() {
        let mut a = Node::new(NodeKind::VectorPermutation);
        a.params = KindParams::Permute { indices: vec![1, 0] };
        let mut b = Node::new(NodeKind::VectorPermutation);
        b.params = KindParams::Permute { indices: vec![0, 1] };
        assert!(!Node::are_duplicate(&a, &b));
    }
}
