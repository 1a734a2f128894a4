//! Tensor handles and the algebraic operations that grow the graph.
//!
//! A [`Tensor`] is a lightweight handle `(graph, node id, space)`. Every
//! operation validates its preconditions up front, allocates exactly one
//! new node on success, and returns a fresh handle; on failure the graph
//! is untouched. Operands must share the same graph
//! ([`Error::CrossGraph`] otherwise).
//!
//! The result-space rules follow the operation table in the crate
//! documentation; the notable special cases live here:
//!
//! * [`multiply`](Tensor::multiply) dispatches between a scalar product
//!   (no new factors) and a tensor product (concatenated factors) — the
//!   two are distinct node kinds, and the emitter picks buffer layouts
//!   from the kind.
//! * [`contract`](Tensor::contract) of two Kronecker-delta operands folds
//!   the involutions at graph-construction time instead of allocating a
//!   contraction node; the trace of a delta contributes a factor equal to
//!   the contracted dimension.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{KindParams, Node, NodeKind, Payload};
use crate::node_id::NodeId;
use crate::ring::{Literal, Ring};
use crate::space::{SimpleFactor, VectorSpace};
use ordered_float::OrderedFloat;
use std::collections::BTreeSet;

/// Anything that addresses a node on a graph: tensors, interface objects
/// and control-transfer handles.
pub trait NodeRef {
    fn node_id(&self) -> NodeId;
    fn graph(&self) -> &Graph;
}

/// A handle to a tensor-valued node.
#[derive(Clone)]
pub struct Tensor {
    graph: Graph,
    node: NodeId,
    space: VectorSpace,
}

impl NodeRef for Tensor {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor({}, dims {:?})", self.node, self.dims())
    }
}

fn has_duplicates(indices: &[u32]) -> Option<u32> {
    let mut seen = BTreeSet::new();
    indices.iter().copied().find(|&i| !seen.insert(i))
}

impl Tensor {
    pub(crate) fn new(graph: Graph, node: NodeId, space: VectorSpace) -> Self {
        Tensor { graph, node, space }
    }

    /// The space this tensor lives in.
    #[must_use]
    pub fn space(&self) -> &VectorSpace {
        &self.space
    }

    /// Factor dimensions, in order.
    #[must_use]
    pub fn dims(&self) -> Vec<u32> {
        self.space.factors().iter().map(|f| f.dim).collect()
    }

    /// Number of factors.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.space.rank()
    }

    /// True if the total dimension is 1.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.space.total_dim() == 1
    }

    fn ensure_same_graph(&self, other: &Tensor) -> Result<()> {
        if self.graph.same_graph(&other.graph) {
            Ok(())
        } else {
            Err(Error::CrossGraph)
        }
    }

    /// Factor-by-factor shape compatibility (dims must match; rings may
    /// differ and join to the superior ring).
    fn compatible_space(&self, other: &Tensor) -> Result<VectorSpace> {
        if self.rank() != other.rank() {
            return Err(Error::RankMismatch {
                detail: format!("rank {} vs {}", self.rank(), other.rank()),
            });
        }
        let mut factors = Vec::with_capacity(self.rank());
        for (l, r) in self.space.factors().iter().zip(other.space.factors()) {
            if l.dim != r.dim {
                return Err(Error::ShapeMismatch {
                    expected: l.dim as usize,
                    got: r.dim as usize,
                });
            }
            factors.push(SimpleFactor { ring: l.ring.superior(r.ring), dim: l.dim });
        }
        Ok(VectorSpace::from_factors(factors))
    }

    /// Allocate one operation node and return its handle.
    fn op_node(
        &self,
        kind: NodeKind,
        parents: Vec<NodeId>,
        params: KindParams,
        space: VectorSpace,
    ) -> Result<Tensor> {
        let mut node = Node::new(kind);
        node.parents = parents;
        node.params = params;
        node.payload = Payload::Tensor { space: space.clone(), value: None };
        let id = self.graph.insert_node(node)?;
        Ok(Tensor::new(self.graph.clone(), id, space))
    }

    /// Elementwise sum. Shapes must match factor-by-factor; the result
    /// ring is the superior ring per factor.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(other)?;
        let space = self.compatible_space(other)?;
        self.op_node(
            NodeKind::VectorAddition,
            vec![self.node, other.node],
            KindParams::None,
            space,
        )
    }

    /// `self - other`, defined as `self + (-1) · other`.
    pub fn subtract(&self, other: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(other)?;
        self.compatible_space(other)?;
        let minus_one = other.space.scalar(&self.graph, -1.0f32)?;
        let negated = minus_one.multiply(other)?;
        self.add(&negated)
    }

    /// Scalar or tensor product, dispatched on operand dimensions.
    ///
    /// * exactly one scalar operand: scalar product, result space is the
    ///   other operand's space;
    /// * two scalars: 1-dim space of the superior ring;
    /// * otherwise: tensor product, factors concatenated.
    pub fn multiply(&self, other: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(other)?;

        let l_scalar = self.is_scalar();
        let r_scalar = other.is_scalar();

        if l_scalar || r_scalar {
            let space = if l_scalar && r_scalar {
                let ring = self.space.ring().superior(other.space.ring());
                if ring == Ring::None {
                    return Err(Error::RingMismatch { detail: "no superior ring".into() });
                }
                VectorSpace::new(ring, 1)
            } else if l_scalar {
                other.space.clone()
            } else {
                self.space.clone()
            };
            return self.op_node(
                NodeKind::VectorScalarProduct,
                vec![self.node, other.node],
                KindParams::None,
                space,
            );
        }

        let space = VectorSpace::product(&[&self.space, &other.space]);
        self.op_node(
            NodeKind::VectorVectorProduct,
            vec![self.node, other.node],
            KindParams::None,
            space,
        )
    }

    /// Multiply by a bare literal; allocates the scalar node first.
    pub fn multiply_by(&self, factor: impl Into<Literal>) -> Result<Tensor> {
        let scalar = self.space.scalar(&self.graph, factor)?;
        self.multiply(&scalar)
    }

    /// `self / other`, defined as `self · other⁻¹`.
    pub fn divide(&self, other: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(other)?;
        let minus_one = other.space.scalar(&self.graph, -1.0f32)?;
        let inverse = other.power(&minus_one)?;
        self.multiply(&inverse)
    }

    /// Elementwise power with a scalar exponent.
    pub fn power(&self, exponent: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(exponent)?;
        if !exponent.is_scalar() {
            return Err(Error::RankMismatch {
                detail: "cannot raise to a non-scalar power".into(),
            });
        }
        self.op_node(
            NodeKind::VectorPower,
            vec![self.node, exponent.node],
            KindParams::None,
            self.space.clone(),
        )
    }

    /// Elementwise power with a bare literal exponent.
    pub fn power_by(&self, exponent: impl Into<Literal>) -> Result<Tensor> {
        let scalar = self.space.scalar(&self.graph, exponent)?;
        self.power(&scalar)
    }

    /// Power interpreted as repeated contraction, e.g. `B_ij^n = B_ik B_kl …`.
    ///
    /// Permitted only when half of the base's indices are contracted:
    /// `rank(base) == 2·|lfactors|`.
    pub fn power_contracted(
        &self,
        exponent: &Tensor,
        lfactors: &[u32],
        rfactors: &[u32],
    ) -> Result<Tensor> {
        self.ensure_same_graph(exponent)?;
        if !exponent.is_scalar() {
            return Err(Error::RankMismatch {
                detail: "cannot raise to a non-scalar power".into(),
            });
        }
        if lfactors.len() != rfactors.len() {
            return Err(Error::RankMismatch {
                detail: format!(
                    "contraction index lists differ in length ({} vs {})",
                    lfactors.len(),
                    rfactors.len()
                ),
            });
        }
        if self.rank() != 2 * lfactors.len() {
            return Err(Error::RankMismatch {
                detail: "a contraction power must contract half of the indices".into(),
            });
        }
        let rank = self.rank() as u32;
        for (&l, &r) in lfactors.iter().zip(rfactors) {
            if l >= rank || r >= rank {
                return Err(Error::IndexOutOfRange { index: l.max(r), limit: rank });
            }
            if self.space.factors()[l as usize].dim != self.space.factors()[r as usize].dim {
                return Err(Error::ShapeMismatch {
                    expected: self.space.factors()[l as usize].dim as usize,
                    got: self.space.factors()[r as usize].dim as usize,
                });
            }
        }
        if let Some(dup) = has_duplicates(lfactors).or_else(|| has_duplicates(rfactors)) {
            return Err(Error::DuplicateIndex { index: dup });
        }
        self.op_node(
            NodeKind::VectorPower,
            vec![self.node, exponent.node],
            KindParams::None,
            self.space.clone(),
        )
    }

    /// `‖self‖² < ‖other‖²`, as a 1-dim `Int32` tensor (1 or 0).
    pub fn is_smaller(&self, other: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(other)?;
        if self.space.total_dim() != other.space.total_dim() {
            return Err(Error::ShapeMismatch {
                expected: self.space.total_dim() as usize,
                got: other.space.total_dim() as usize,
            });
        }
        self.op_node(
            NodeKind::VectorComparisonIsSmaller,
            vec![self.node, other.node],
            KindParams::None,
            VectorSpace::new(Ring::Int32, 1),
        )
    }

    /// Einstein-sum contraction over the given factor pairs.
    ///
    /// Residual factors of `self` (in order) are followed by residual
    /// factors of `other`; a total contraction yields a 1-dim space of
    /// the superior ring. With empty index lists this is a tensor
    /// product. Two Kronecker operands fold into a new Kronecker delta
    /// instead of allocating a contraction.
    pub fn contract(&self, other: &Tensor, lfactors: &[u32], rfactors: &[u32]) -> Result<Tensor> {
        self.ensure_same_graph(other)?;
        if lfactors.len() != rfactors.len() {
            return Err(Error::RankMismatch {
                detail: format!(
                    "contraction index lists differ in length ({} vs {})",
                    lfactors.len(),
                    rfactors.len()
                ),
            });
        }
        if lfactors.is_empty() {
            // Not a contraction but a tensor product.
            return self.multiply(other);
        }

        for (&l, &r) in lfactors.iter().zip(rfactors) {
            if l as usize >= self.rank() {
                return Err(Error::IndexOutOfRange { index: l, limit: self.rank() as u32 });
            }
            if r as usize >= other.rank() {
                return Err(Error::IndexOutOfRange { index: r, limit: other.rank() as u32 });
            }
            let ldim = self.space.factors()[l as usize].dim;
            let rdim = other.space.factors()[r as usize].dim;
            if ldim != rdim {
                return Err(Error::ShapeMismatch { expected: ldim as usize, got: rdim as usize });
            }
        }
        if let Some(dup) = has_duplicates(lfactors).or_else(|| has_duplicates(rfactors)) {
            return Err(Error::DuplicateIndex { index: dup });
        }

        // Residual factors, erased from the tail so positions stay valid.
        let mut l_residual = self.space.factors().to_vec();
        let mut sorted = lfactors.to_vec();
        sorted.sort_unstable();
        for &f in sorted.iter().rev() {
            l_residual.remove(f as usize);
        }
        let mut r_residual = other.space.factors().to_vec();
        let mut sorted = rfactors.to_vec();
        sorted.sort_unstable();
        for &f in sorted.iter().rev() {
            r_residual.remove(f as usize);
        }

        let mut factors = l_residual;
        factors.extend(r_residual);
        if factors.is_empty() {
            // Total contraction: a scalar of the superior ring.
            let ring = self.space.ring().superior(other.space.ring());
            factors.push(SimpleFactor { ring, dim: 1 });
        }
        let space = VectorSpace::from_factors(factors);

        let l_kron = self.kron_params()?;
        let r_kron = other.kron_params()?;
        if let (Some((l_pairs, l_scale)), Some((r_pairs, r_scale))) = (l_kron, r_kron) {
            return self.fold_kron_contraction(
                space, &l_pairs, l_scale, &r_pairs, r_scale, lfactors, rfactors,
            );
        }

        self.op_node(
            NodeKind::VectorContraction,
            vec![self.node, other.node],
            KindParams::Contract { lfactors: lfactors.to_vec(), rfactors: rfactors.to_vec() },
            space,
        )
    }

    /// Single-index contraction convenience.
    pub fn contract1(&self, other: &Tensor, lfactor: u32, rfactor: u32) -> Result<Tensor> {
        self.contract(other, &[lfactor], &[rfactor])
    }

    /// Full contraction of two rank-1 tensors (the scalar product).
    pub fn contract_full(&self, other: &Tensor) -> Result<Tensor> {
        self.contract1(other, 0, 0)
    }

    fn kron_params(&self) -> Result<Option<(Vec<u32>, f32)>> {
        self.graph.with_node(self.node, |n| match (&n.kind, &n.params) {
            (NodeKind::VectorKroneckerDeltaProduct, KindParams::Kronecker { delta_pairs, scaling }) => {
                Some((delta_pairs.clone(), scaling.0))
            }
            _ => None,
        })
    }

    /// Contraction of two Kronecker deltas: merge the pairings, fold them
    /// pairwise across the contracted positions, and multiply the scaling
    /// by the dimension of every contracted index (the trace of a delta
    /// is its dimension).
    #[allow(clippy::too_many_arguments)]
    fn fold_kron_contraction(
        &self,
        space: VectorSpace,
        l_pairs: &[u32],
        l_scale: f32,
        r_pairs: &[u32],
        r_scale: f32,
        lfactors: &[u32],
        rfactors: &[u32],
    ) -> Result<Tensor> {
        let offset = l_pairs.len() as u32;
        let mut dp: Vec<u32> = l_pairs.to_vec();
        dp.extend(r_pairs.iter().map(|&p| p + offset));

        let mut scaling = l_scale * r_scale;
        let mut lf: Vec<u32> = lfactors.to_vec();
        let mut rf: Vec<u32> = rfactors.iter().map(|&r| r + offset).collect();

        for pair in 0..lf.len() {
            let l = lf[pair] as usize;
            let r = rf[pair] as usize;

            // Splice the involutions across the contracted pair: the
            // partner of `l` and the partner of `r` now pair with each
            // other (summing an index of one delta against an index of
            // the other identifies their partners).
            let l_partner = dp[l] as usize;
            let r_partner = dp[r] as usize;
            dp[l_partner] = r_partner as u32;
            dp[r_partner] = l_partner as u32;

            // The contracted positions disappear; r > l always holds
            // because r carries the right-operand offset.
            dp.remove(l);
            dp.remove(r - 1);

            for v in &mut dp {
                if (r as u32) < *v {
                    *v -= 2;
                } else if (l as u32) < *v {
                    *v -= 1;
                }
            }
            for list in [&mut lf, &mut rf] {
                for v in list.iter_mut() {
                    let mut shift = 0;
                    if (l as u32) < *v {
                        shift += 1;
                    }
                    if (r as u32) < *v {
                        shift += 1;
                    }
                    *v -= shift;
                }
            }

            scaling *= self.space.factors()[lfactors[pair] as usize].dim as f32;
        }

        let mut node = Node::new(NodeKind::VectorKroneckerDeltaProduct);
        node.params = KindParams::Kronecker { delta_pairs: dp, scaling: OrderedFloat(scaling) };
        node.payload = Payload::Tensor { space: space.clone(), value: None };
        let id = self.graph.insert_node(node)?;
        Ok(Tensor::new(self.graph.clone(), id, space))
    }

    /// Reorder factors: the result carries index `indices[j]` at
    /// position `j`. The space is unchanged.
    pub fn permute(&self, indices: &[u32]) -> Result<Tensor> {
        if indices.len() != self.rank()
            || has_duplicates(indices).is_some()
            || indices.iter().any(|&i| i as usize >= self.rank())
        {
            return Err(Error::InvalidPermutation);
        }
        self.op_node(
            NodeKind::VectorPermutation,
            vec![self.node],
            KindParams::Permute { indices: indices.to_vec() },
            self.space.clone(),
        )
    }

    /// Restrict each factor to a half-open `(lo, hi)` window.
    pub fn project(&self, range: &[(u32, u32)]) -> Result<Tensor> {
        if range.len() != self.rank() {
            return Err(Error::RankMismatch {
                detail: format!("one range per factor: {} vs rank {}", range.len(), self.rank()),
            });
        }
        for (factor, &(lo, hi)) in range.iter().enumerate() {
            let dim = self.space.factors()[factor].dim;
            if hi > dim {
                return Err(Error::IndexOutOfRange { index: hi, limit: dim });
            }
            if lo >= hi {
                return Err(Error::IndexOutOfRange { index: lo, limit: hi });
            }
        }
        let factors = self
            .space
            .factors()
            .iter()
            .zip(range)
            .map(|(f, &(lo, hi))| SimpleFactor { ring: f.ring, dim: hi - lo })
            .collect();
        self.op_node(
            NodeKind::VectorProjection,
            vec![self.node],
            KindParams::Project { range: range.to_vec() },
            VectorSpace::from_factors(factors),
        )
    }

    /// Rank-1 projection convenience.
    pub fn project1(&self, range: (u32, u32)) -> Result<Tensor> {
        if self.rank() != 1 {
            return Err(Error::RankMismatch {
                detail: "single-range projection needs a rank-1 tensor".into(),
            });
        }
        self.project(&[range])
    }

    /// Identify groups of equal-dimension indices, e.g.
    /// `B_ik = JoinIndices(A_ijk, {{0, 1}}) = A_iik` (no sum).
    ///
    /// The joined factor sits at the group's smallest original position;
    /// the remaining factors pass through.
    pub fn join_indices(&self, groups: &[Vec<u32>]) -> Result<Tensor> {
        let mut linear = Vec::new();
        for group in groups {
            for &index in group {
                if index as usize >= self.rank() {
                    return Err(Error::IndexOutOfRange { index, limit: self.rank() as u32 });
                }
                linear.push(index);
            }
        }
        if let Some(dup) = has_duplicates(&linear) {
            return Err(Error::DuplicateIndex { index: dup });
        }
        for group in groups {
            let dim = self.space.factors()[group[0] as usize].dim;
            for &index in group {
                let d = self.space.factors()[index as usize].dim;
                if d != dim {
                    return Err(Error::ShapeMismatch { expected: dim as usize, got: d as usize });
                }
            }
        }

        let mut sorted_groups: Vec<Vec<u32>> = groups.to_vec();
        for g in &mut sorted_groups {
            g.sort_unstable();
        }
        sorted_groups.sort();

        let mut factors = Vec::new();
        for (factor, f) in self.space.factors().iter().enumerate() {
            let factor = factor as u32;
            let keep = match sorted_groups.iter().find(|g| g.contains(&factor)) {
                // A joined factor survives only at its group's smallest position.
                Some(group) => group[0] == factor,
                None => true,
            };
            if keep {
                factors.push(*f);
            }
        }

        self.op_node(
            NodeKind::VectorJoinIndices,
            vec![self.node],
            KindParams::JoinIndices { groups: sorted_groups },
            VectorSpace::from_factors(factors),
        )
    }

    /// Split factors into contiguous windows and sum them.
    ///
    /// One split position per factor; `0` leaves the axis untouched. A
    /// position `s > 0` requires `s` to divide the factor's dimension and
    /// replaces the dimension by `s`:
    /// `out[.., j, ..] = Σ_w in[.., w·s + j, ..]`.
    pub fn index_split_sum(&self, split_positions: &[u32]) -> Result<Tensor> {
        if split_positions.len() != self.rank() {
            return Err(Error::RankMismatch {
                detail: format!(
                    "one split position per factor: {} vs rank {}",
                    split_positions.len(),
                    self.rank()
                ),
            });
        }
        let mut factors = self.space.factors().to_vec();
        for (factor, &s) in split_positions.iter().enumerate() {
            if s == 0 {
                continue;
            }
            let dim = factors[factor].dim;
            if s > dim {
                return Err(Error::IndexOutOfRange { index: s, limit: dim });
            }
            if dim % s != 0 {
                return Err(Error::ShapeMismatch { expected: dim as usize, got: s as usize });
            }
            factors[factor].dim = s;
        }
        self.op_node(
            NodeKind::VectorIndexSplitSum,
            vec![self.node],
            KindParams::IndexSplitSum { split_positions: split_positions.to_vec() },
            VectorSpace::from_factors(factors),
        )
    }

    /// Valid (no padding, unit stride) cross-correlation with `kernel`.
    ///
    /// Kernel rank must equal the input rank and no kernel dimension may
    /// exceed the input's; output dims are `D_i - k_i + 1`.
    pub fn cross_correlate(&self, kernel: &Tensor) -> Result<Tensor> {
        self.ensure_same_graph(kernel)?;
        if kernel.rank() != self.rank() {
            return Err(Error::RankMismatch {
                detail: format!("kernel rank {} vs input rank {}", kernel.rank(), self.rank()),
            });
        }
        let mut factors = Vec::with_capacity(self.rank());
        for (i, k) in self.space.factors().iter().zip(kernel.space.factors()) {
            if k.dim > i.dim {
                return Err(Error::ShapeMismatch { expected: i.dim as usize, got: k.dim as usize });
            }
            factors.push(SimpleFactor {
                ring: i.ring.superior(k.ring),
                dim: i.dim - k.dim + 1,
            });
        }
        self.op_node(
            NodeKind::VectorCrossCorrelation,
            vec![self.node, kernel.node],
            KindParams::None,
            VectorSpace::from_factors(factors),
        )
    }

    /// Non-overlapping max pooling with the given per-factor pool sizes.
    pub fn max_pool(&self, pool_size: &[u32]) -> Result<Tensor> {
        if pool_size.len() != self.rank() {
            return Err(Error::RankMismatch {
                detail: format!(
                    "one pool size per factor: {} vs rank {}",
                    pool_size.len(),
                    self.rank()
                ),
            });
        }
        let mut factors = self.space.factors().to_vec();
        for (factor, &p) in pool_size.iter().enumerate() {
            let dim = factors[factor].dim;
            if p == 0 || p > dim {
                return Err(Error::IndexOutOfRange { index: p, limit: dim });
            }
            if dim % p != 0 {
                return Err(Error::ShapeMismatch { expected: dim as usize, got: p as usize });
            }
            factors[factor].dim = dim / p;
        }
        self.op_node(
            NodeKind::VectorMaxPool,
            vec![self.node],
            KindParams::MaxPool { pool_size: pool_size.to_vec() },
            VectorSpace::from_factors(factors),
        )
    }

    /// Share the storage target's buffer: this node's kernel writes into
    /// `target`'s buffer instead of owning one. Both sides of the
    /// relation are recorded so the duplicate reducer can rewrite them.
    pub fn store_in(&self, target: &Tensor) -> Result<()> {
        self.ensure_same_graph(target)?;
        self.graph
            .with_node_mut(self.node, |n| n.stored_in = Some(target.node))?;
        self.graph.with_node_mut(target.node, |n| {
            n.used_as_storage_by.insert(self.node);
        })?;
        Ok(())
    }
}
