//! Symbolic differentiation over the graph.
//!
//! [`Tensor::derivative`] synthesizes `∂f/∂arg` as new graph nodes. The
//! algorithm has three phases:
//!
//! 1. **Dependency subgraph extraction** — walk `f`'s parents
//!    transitively, recording per visited node its parents and children
//!    inside the subgraph.
//! 2. **Prune non-arg roots** — repeatedly remove any subgraph node whose
//!    in-subgraph parent set is empty and that is not `arg`, repairing
//!    the neighboring sets. When this terminates, `arg` is the sole root
//!    (or it was never a dependency at all).
//! 3. **Synthesis** — recurse from `f`: for each in-subgraph parent `p`
//!    of the current node, compute the local partial `∂c/∂p` from the
//!    per-kind rules, chain it with the recursively computed `∂p/∂arg`
//!    (scalar multiply, or contraction of the trailing `p` indices of the
//!    inner derivative against the leading indices of the local one), and
//!    sum the contributions of all parents.
//!
//! The result lives in `arg.space ⊗ f.space` with the argument's factors
//! first, as in differential forms; a scalar argument collapses that to
//! `f.space`.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{KindParams, NodeKind, Payload};
use crate::node_id::NodeId;
use crate::space::VectorSpace;
use crate::tensor::{NodeRef, Tensor};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

#[derive(Default)]
struct DepNode {
    parents: BTreeSet<NodeId>,
    children: BTreeSet<NodeId>,
}

type DepMap = BTreeMap<NodeId, DepNode>;

/// Rebuild a tensor handle for an existing tensor-valued node.
fn tensor_for(graph: &Graph, id: NodeId) -> Result<Tensor> {
    let space = graph.with_node(id, |n| match &n.payload {
        Payload::Tensor { space, .. } => Some(space.clone()),
        _ => None,
    })?;
    match space {
        Some(space) => Ok(Tensor::new(graph.clone(), id, space)),
        None => Err(Error::DerivativeNonTensor),
    }
}

/// A Kronecker delta over `space ⊗ space` pairing position `i` with
/// `rank + i` — the identity map's derivative skeleton.
fn identity_kron(graph: &Graph, space: &VectorSpace) -> Result<Tensor> {
    let rank = space.rank();
    let mut pairs = vec![0u32; 2 * rank];
    for i in 0..rank {
        pairs[i] = (rank + i) as u32;
        pairs[rank + i] = i as u32;
    }
    space.power(2).element_kron(graph, &pairs, 1.0)
}

impl Tensor {
    /// The derivative of this tensor with respect to `arg`.
    ///
    /// Fails with [`Error::DerivativeSelf`] when `arg` is this node,
    /// [`Error::NotDependent`] when `arg` does not appear in this node's
    /// dependency graph, and [`Error::DerivativeUnsupported`] when a node
    /// on the path has no derivative rule.
    pub fn derivative(&self, arg: &Tensor) -> Result<Tensor> {
        if !self.graph().same_graph(arg.graph()) {
            return Err(Error::CrossGraph);
        }
        if self.node_id() == arg.node_id() {
            return Err(Error::DerivativeSelf);
        }

        // Phase 1: dependency subgraph between self and arg.
        let mut dep = DepMap::new();
        traverse_parents(self.graph(), &mut dep, self.node_id(), arg.node_id())?;
        if !dep.contains_key(&arg.node_id()) {
            return Err(Error::NotDependent);
        }

        // Phase 2: iteratively remove roots that are not arg.
        let mut to_remove: Vec<NodeId> = Vec::new();
        loop {
            for &id in &to_remove {
                let children = dep.remove(&id).map(|d| d.children).unwrap_or_default();
                for child in children {
                    if let Some(c) = dep.get_mut(&child) {
                        c.parents.remove(&id);
                    }
                }
            }
            to_remove = dep
                .iter()
                .filter(|(id, d)| d.parents.is_empty() && **id != arg.node_id())
                .map(|(id, _)| *id)
                .collect();
            if to_remove.is_empty() {
                break;
            }
        }
        if !dep.contains_key(&self.node_id()) {
            return Err(Error::NotDependent);
        }
        for (id, d) in &dep {
            trace!(node = %id, parents = ?d.parents, children = ?d.children, "dependency subgraph");
        }

        // Phase 3: chain-rule synthesis from self down to arg.
        chain_derivative(self.graph(), &dep, self, arg)
    }
}

/// Record the transitive parents of `current` in `dep`, stopping the
/// descent at `target`.
fn traverse_parents(graph: &Graph, dep: &mut DepMap, current: NodeId, target: NodeId) -> Result<()> {
    let parents = graph.with_node(current, |n| n.parents.clone())?;
    for parent in parents {
        dep.entry(parent).or_default().children.insert(current);
        let newly_seen = dep.entry(current).or_default().parents.insert(parent);
        if parent != target && newly_seen {
            traverse_parents(graph, dep, parent, target)?;
        }
    }
    Ok(())
}

/// Sum over all in-subgraph parents of `current`: local partial times the
/// recursive derivative of the parent.
fn chain_derivative(graph: &Graph, dep: &DepMap, current: &Tensor, arg: &Tensor) -> Result<Tensor> {
    if current.node_id() == arg.node_id() {
        return Err(Error::DerivativeSelf);
    }
    let parents = dep
        .get(&current.node_id())
        .map(|d| d.parents.clone())
        .unwrap_or_default();
    if parents.is_empty() {
        return Err(Error::NotDependent);
    }

    let mut sum: Option<Tensor> = None;
    for parent_id in parents {
        let parent = tensor_for(graph, parent_id)?;
        trace!(
            fct = %current.node_id(),
            wrt = %parent_id,
            "computing local derivative"
        );

        let mut contribution = local_derivative(graph, current, &parent)?;

        if parent_id != arg.node_id() {
            let inner = chain_derivative(graph, dep, &parent, arg)?;
            contribution = if contribution.is_scalar() {
                inner.multiply(&contribution)?
            } else {
                // Contract the trailing parent-indices of the inner
                // derivative with the leading indices of the local one.
                let parent_rank = parent.rank() as u32;
                let inner_rank = inner.rank() as u32;
                let lfactors: Vec<u32> = (inner_rank - parent_rank..inner_rank).collect();
                let rfactors: Vec<u32> = (0..parent_rank).collect();
                inner.contract(&contribution, &lfactors, &rfactors)?
            };
        }

        sum = Some(match sum {
            None => contribution,
            Some(acc) => acc.add(&contribution)?,
        });
    }

    // Parents were non-empty, so the sum exists.
    Ok(sum.unwrap())
}

/// The local partial `∂fct/∂arg` for a direct parent, by node kind.
fn local_derivative(graph: &Graph, fct: &Tensor, arg: &Tensor) -> Result<Tensor> {
    let (kind, parents) = graph.with_node(fct.node_id(), |n| (n.kind, n.parents.clone()))?;
    if !parents.contains(&arg.node_id()) {
        return Err(Error::NotDependent);
    }
    graph.with_node(arg.node_id(), |n| match n.payload {
        Payload::Tensor { .. } => Ok(()),
        _ => Err(Error::DerivativeNonTensor),
    })??;

    match kind {
        NodeKind::VectorAddition => add_derivative(graph, fct, arg),
        NodeKind::VectorContraction => contract_derivative(graph, fct, arg, &parents),
        NodeKind::VectorPermutation => permute_derivative(graph, fct, arg),
        NodeKind::VectorScalarProduct | NodeKind::VectorVectorProduct => {
            multiply_derivative(graph, fct, arg, &parents)
        }
        NodeKind::VectorPower => power_derivative(graph, fct, arg, &parents),
        NodeKind::VectorProjection => project_derivative(graph, fct, arg),
        other => Err(Error::DerivativeUnsupported { kind: other.name() }),
    }
}

/// `∂(a + b)/∂a` is the identity: a product of Kronecker deltas, or a
/// plain scalar one for a scalar argument.
fn add_derivative(graph: &Graph, fct: &Tensor, arg: &Tensor) -> Result<Tensor> {
    if arg.is_scalar() {
        return fct.space().scalar(graph, 1.0f32);
    }
    if arg.rank() != fct.rank() {
        return Err(Error::RankMismatch {
            detail: "addition operands must match the result's rank".into(),
        });
    }
    let rank = arg.rank();
    let space = VectorSpace::product(&[arg.space(), fct.space()]);
    let mut pairs = vec![0u32; 2 * rank];
    for i in 0..rank {
        pairs[i] = (rank + i) as u32;
        pairs[rank + i] = i as u32;
    }
    space.element_kron(graph, &pairs, 1.0)
}

/// `∂(a · b)/∂arg`: the other operand for a scalar argument; otherwise a
/// Kronecker over the argument's indices tensored with the other
/// operand, with a trailing permutation when the argument sat on the
/// right.
fn multiply_derivative(
    graph: &Graph,
    _fct: &Tensor,
    arg: &Tensor,
    parents: &[NodeId],
) -> Result<Tensor> {
    let arg_on_right = parents[0] != arg.node_id();
    let other_id = if arg_on_right { parents[0] } else { parents[1] };
    let other = tensor_for(graph, other_id)?;

    if arg.is_scalar() {
        return Ok(other);
    }

    let kron = identity_kron(graph, arg.space())?;
    let product = kron.multiply(&other)?;

    if !arg_on_right {
        return Ok(product);
    }

    // Reorder so the argument's image factors sit at the back.
    let arg_rank = arg.rank();
    let other_rank = other.rank();
    let mut permutation: Vec<u32> = (0..product.rank() as u32).collect();
    for other_factor in 0..other_rank {
        permutation[arg_rank + other_factor] = (2 * arg_rank + other_factor) as u32;
    }
    for arg_factor in 0..arg_rank {
        permutation[arg_rank + other_rank + arg_factor] = (arg_rank + arg_factor) as u32;
    }
    product.permute(&permutation)
}

/// `∂(b^e)/∂b = e · b^(e-1)`, with a diagonal Kronecker merged into the
/// function's indices for non-scalar bases (the power is elementwise).
fn power_derivative(
    graph: &Graph,
    _fct: &Tensor,
    arg: &Tensor,
    parents: &[NodeId],
) -> Result<Tensor> {
    if parents[0] != arg.node_id() {
        return Err(Error::DerivativeUnsupported { kind: "VECTOR_POWER (w.r.t. exponent)" });
    }
    let base = tensor_for(graph, parents[0])?;
    let exponent = tensor_for(graph, parents[1])?;

    let minus_one = exponent.space().scalar(graph, -1.0f32)?;
    let reduced = exponent.add(&minus_one)?;
    let power = base.power(&reduced)?;
    let derivative = exponent.multiply(&power)?;

    if derivative.is_scalar() {
        return Ok(derivative);
    }

    // d(a_ijk^e) / d(a_lmn) = e * δ_li δ_mj δ_nk * a_ijk^(e-1)  (no sum)
    let kron = identity_kron(graph, arg.space())?;
    let derivative = kron.multiply(&derivative)?;

    // The second half of the Kronecker indices joins the function
    // indices at the back.
    let arg_rank = arg.rank() as u32;
    let groups: Vec<Vec<u32>> = (0..arg_rank)
        .map(|f| vec![arg_rank + f, 2 * arg_rank + f])
        .collect();
    derivative.join_indices(&groups)
}

/// `∂/∂B_ij (A_.. B_..)` for a contraction: contract the identity
/// Kronecker over the argument's indices with the other operand on the
/// other operand's contracted indices; when the argument was the right
/// operand, a trailing permutation moves its residual indices to the
/// back.
fn contract_derivative(
    graph: &Graph,
    fct: &Tensor,
    arg: &Tensor,
    parents: &[NodeId],
) -> Result<Tensor> {
    let params = graph.with_node(fct.node_id(), |n| n.params.clone())?;
    let KindParams::Contract { lfactors, rfactors } = params else {
        return Err(Error::DerivativeUnsupported { kind: "VECTOR_CONTRACTION" });
    };

    let arg_on_right = parents[0] != arg.node_id();
    let (arg_contr, other_contr, other_id) = if arg_on_right {
        (rfactors, lfactors, parents[0])
    } else {
        (lfactors, rfactors, parents[1])
    };
    let other = tensor_for(graph, other_id)?;

    let kron = identity_kron(graph, arg.space())?;

    let arg_rank = arg.rank() as u32;
    let lfactors: Vec<u32> = arg_contr.iter().map(|&f| f + arg_rank).collect();
    let mut result = kron.contract(&other, &lfactors, &other_contr)?;

    if arg_on_right {
        // The argument's uncontracted indices surfaced in the middle;
        // swap them to the back.
        let uncontracted = arg_rank as usize - arg_contr.len();
        let len = result.rank();
        let mut permutation: Vec<u32> = (0..len as u32).collect();
        for u in 0..uncontracted {
            permutation[arg_rank as usize + u] = (len - uncontracted + u) as u32;
            permutation[len - uncontracted + u] = arg_rank + u as u32;
        }
        result = result.permute(&permutation)?;
    }

    Ok(result)
}

/// The derivative of a permutation is a Kronecker whose pair function is
/// the permutation itself — no data operation at all.
fn permute_derivative(graph: &Graph, fct: &Tensor, arg: &Tensor) -> Result<Tensor> {
    let params = graph.with_node(fct.node_id(), |n| n.params.clone())?;
    let KindParams::Permute { indices } = params else {
        return Err(Error::DerivativeUnsupported { kind: "VECTOR_PERMUTATION" });
    };

    let rank = arg.rank();
    let mut pairs = vec![0u32; 2 * rank];
    for factor in 0..rank {
        pairs[factor] = indices[factor] + rank as u32;
        pairs[indices[factor] as usize + rank] = factor as u32;
    }
    arg.space().power(2).element_kron(graph, &pairs, 1.0)
}

/// The derivative of a projection is a sparse indicator: ones where the
/// argument coordinate lands inside the projected window, zero
/// elsewhere, laid out over `arg.space ⊗ fct.space`.
fn project_derivative(graph: &Graph, fct: &Tensor, arg: &Tensor) -> Result<Tensor> {
    if arg.space().ring() != crate::ring::Ring::Float32 {
        return Err(Error::DerivativeUnsupported { kind: "VECTOR_PROJECTION (non-float argument)" });
    }
    let params = graph.with_node(fct.node_id(), |n| n.params.clone())?;
    let KindParams::Project { range } = params else {
        return Err(Error::DerivativeUnsupported { kind: "VECTOR_PROJECTION" });
    };

    let space = VectorSpace::product(&[arg.space(), fct.space()]);
    let strides = space.strides();
    let rank = space.rank();
    let middle = rank / 2;

    let mut init = vec![0.0f32; space.total_dim() as usize];
    for (index, slot) in init.iter_mut().enumerate() {
        let mut coord = vec![0u32; rank];
        coord[0] = index as u32 / strides[0];
        for factor in 1..rank {
            coord[factor] = (index as u32 % strides[factor - 1]) / strides[factor];
        }

        // The projected part of the coordinate starts at zero; add the
        // window offset to recover the pre-projection coordinate.
        for (arg_factor, &(lo, _)) in range.iter().enumerate() {
            coord[arg_factor + middle] += lo;
        }

        if coord[..middle] != coord[middle..] {
            continue;
        }
        let in_range = range
            .iter()
            .enumerate()
            .all(|(factor, &(lo, hi))| lo <= coord[factor] && coord[factor] <= hi);
        if in_range {
            *slot = 1.0;
        }
    }

    space.element(graph, init)
}
