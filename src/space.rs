//! Vector spaces: products of simple `(ring, dim)` factors.
//!
//! A [`VectorSpace`] is the shape-and-ring descriptor of a tensor: an
//! ordered, non-empty sequence of [`SimpleFactor`]s. Total dimension is
//! the product of factor dims, the ring of the space is the superior ring
//! over all factors, and strides are row-major with the innermost factor
//! last.
//!
//! Spaces are pure values. The factory methods at the bottom are the only
//! way tensors enter a graph: [`element`](VectorSpace::element) for dense
//! constants, [`element_kron`](VectorSpace::element_kron) for symbolic
//! Kronecker-delta products, [`scalar`](VectorSpace::scalar) for 1-dim
//! convenience values and [`homomorphism`](VectorSpace::homomorphism) for
//! rank-2 maps over a space.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{KindParams, Node, NodeKind, Payload};
use crate::ring::{Literal, Ring};
use crate::tensor::Tensor;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// One simple factor of a product space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleFactor {
    pub ring: Ring,
    pub dim: u32,
}

/// A product of simple factors.
///
/// Two spaces are equal iff their factor sequences are elementwise equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorSpace {
    factors: Vec<SimpleFactor>,
}

impl VectorSpace {
    /// A rank-1 space of `dim` elements over `ring`.
    #[must_use]
    pub fn new(ring: Ring, dim: u32) -> Self {
        VectorSpace { factors: vec![SimpleFactor { ring, dim }] }
    }

    /// One factor per entry of `dims`, all over the same ring.
    #[must_use]
    pub fn from_dims(ring: Ring, dims: &[u32]) -> Self {
        VectorSpace {
            factors: dims.iter().map(|&dim| SimpleFactor { ring, dim }).collect(),
        }
    }

    /// A space from an explicit factor list.
    #[must_use]
    pub fn from_factors(factors: Vec<SimpleFactor>) -> Self {
        VectorSpace { factors }
    }

    /// The tensor product of the given spaces, in order.
    #[must_use]
    pub fn product(spaces: &[&VectorSpace]) -> Self {
        VectorSpace {
            factors: spaces.iter().flat_map(|s| s.factors.iter().copied()).collect(),
        }
    }

    /// The n-fold tensor power of `self`.
    #[must_use]
    pub fn power(&self, n: usize) -> Self {
        VectorSpace {
            factors: std::iter::repeat_with(|| self.factors.iter().copied())
                .take(n)
                .flatten()
                .collect(),
        }
    }

    /// The ordered factor sequence.
    #[must_use]
    pub fn factors(&self) -> &[SimpleFactor] {
        &self.factors
    }

    /// Number of factors.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.factors.len()
    }

    /// Product of factor dims.
    #[must_use]
    pub fn total_dim(&self) -> u32 {
        self.factors.iter().map(|f| f.dim).product()
    }

    /// Superior ring over all factors.
    #[must_use]
    pub fn ring(&self) -> Ring {
        self.factors
            .iter()
            .fold(Ring::None, |r, f| r.superior(f.ring))
    }

    /// Row-major strides, innermost factor last.
    #[must_use]
    pub fn strides(&self) -> Vec<u32> {
        let mut strides = vec![1u32; self.factors.len()];
        for fac in (0..self.factors.len().saturating_sub(1)).rev() {
            strides[fac] = strides[fac + 1] * self.factors[fac + 1].dim;
        }
        strides
    }

    /// A dense element of this space.
    ///
    /// The initializer length must equal [`total_dim`](Self::total_dim)
    /// and its scalar kind must match the space's ring.
    pub fn element(&self, graph: &Graph, init: impl Into<Literal>) -> Result<Tensor> {
        let init = init.into();
        if init.len() != self.total_dim() as usize {
            return Err(Error::ShapeMismatch {
                expected: self.total_dim() as usize,
                got: init.len(),
            });
        }
        init.check_compatible(self.ring())?;

        let mut node = Node::new(NodeKind::Vector);
        node.payload = Payload::Tensor { space: self.clone(), value: Some(init) };
        let id = graph.insert_node(node)?;
        Ok(Tensor::new(graph.clone(), id, self.clone()))
    }

    /// A symbolic Kronecker-delta product over this space.
    ///
    /// `delta_pairs` is an involution over the rank: position `i` pairs
    /// with `delta_pairs[i]`. The tensor is `scaling` where every paired
    /// index agrees and zero elsewhere; it is never materialized densely.
    pub fn element_kron(
        &self,
        graph: &Graph,
        delta_pairs: &[u32],
        scaling: f32,
    ) -> Result<Tensor> {
        if delta_pairs.len() != self.factors.len() {
            return Err(Error::ShapeMismatch {
                expected: self.factors.len(),
                got: delta_pairs.len(),
            });
        }
        for (i, &p) in delta_pairs.iter().enumerate() {
            if p as usize >= delta_pairs.len() {
                return Err(Error::IndexOutOfRange { index: p, limit: delta_pairs.len() as u32 });
            }
            if delta_pairs[p as usize] as usize != i {
                return Err(Error::RankMismatch {
                    detail: format!("delta pairs are not an involution at position {i}"),
                });
            }
        }

        let mut node = Node::new(NodeKind::VectorKroneckerDeltaProduct);
        node.params = KindParams::Kronecker {
            delta_pairs: delta_pairs.to_vec(),
            scaling: OrderedFloat(scaling),
        };
        node.payload = Payload::Tensor { space: self.clone(), value: None };
        let id = graph.insert_node(node)?;
        Ok(Tensor::new(graph.clone(), id, self.clone()))
    }

    /// A 1-dim element over this space's ring.
    pub fn scalar(&self, graph: &Graph, init: impl Into<Literal>) -> Result<Tensor> {
        let init = init.into();
        init.check_compatible(self.ring())?;
        if init.len() != 1 {
            return Err(Error::ShapeMismatch { expected: 1, got: init.len() });
        }
        let space = VectorSpace::new(self.ring(), 1);

        let mut node = Node::new(NodeKind::Vector);
        node.payload = Payload::Tensor { space: space.clone(), value: Some(init) };
        let id = graph.insert_node(node)?;
        Ok(Tensor::new(graph.clone(), id, space))
    }

    /// A rank-2 tensor over `self ⊗ self` from a full dense initializer
    /// of `total_dim²` elements.
    pub fn homomorphism(&self, graph: &Graph, init: impl Into<Literal>) -> Result<Tensor> {
        let init = init.into();
        let dim = self.total_dim() as usize;
        if init.len() != dim * dim {
            return Err(Error::ShapeMismatch { expected: dim * dim, got: init.len() });
        }
        init.check_compatible(self.ring())?;

        let space = self.power(2);
        let mut node = Node::new(NodeKind::Vector);
        node.payload = Payload::Tensor { space: space.clone(), value: Some(init) };
        let id = graph.insert_node(node)?;
        Ok(Tensor::new(graph.clone(), id, space))
    }

    /// A rank-2 tensor over `self ⊗ self` with a structural hint.
    ///
    /// Only [`Property::Diagonal`] changes the interpretation of the
    /// initializer: a length-`total_dim` diagonal is expanded to the full
    /// matrix. The other hints are accepted and ignored — a dense
    /// fallback is the promise, not an optimized layout.
    pub fn homomorphism_with(
        &self,
        graph: &Graph,
        init: impl Into<Literal>,
        properties: &[Property],
    ) -> Result<Tensor> {
        if properties.is_empty() {
            return Err(Error::EmptyProperty);
        }

        if properties.contains(&Property::Diagonal) {
            let init = init.into();
            let dim = self.total_dim() as usize;
            if init.len() != dim {
                return Err(Error::ShapeMismatch { expected: dim, got: init.len() });
            }
            init.check_compatible(self.ring())?;
            let full = match init {
                Literal::F32(diag) => {
                    let mut full = vec![0.0f32; dim * dim];
                    for (d, v) in diag.into_iter().enumerate() {
                        full[d * dim + d] = v;
                    }
                    Literal::F32(full)
                }
                Literal::I32(diag) => {
                    let mut full = vec![0i32; dim * dim];
                    for (d, v) in diag.into_iter().enumerate() {
                        full[d * dim + d] = v;
                    }
                    Literal::I32(full)
                }
            };
            return self.homomorphism(graph, full);
        }

        // Sparse / symmetry hints: dense fallback.
        self.homomorphism(graph, init)
    }

    /// The standard symplectic form over phase-space coordinates
    /// `(q₁…qₙ, p₁…pₙ)`, as a rank-2 element over `self ⊗ self`:
    ///
    /// ```text
    ///  0  id
    /// -id  0
    /// ```
    ///
    /// Requires an even total dimension. The matrix is antisymmetric
    /// and squares to the negated identity.
    pub fn symplectic_form(&self, graph: &Graph) -> Result<Tensor> {
        let dim = self.total_dim() as usize;
        if dim % 2 != 0 {
            return Err(Error::ShapeMismatch { expected: dim + 1, got: dim });
        }
        if self.ring() != Ring::Float32 {
            return Err(Error::RingMismatch {
                detail: "the symplectic form is a Float32 tensor".into(),
            });
        }
        let half = dim / 2;
        let mut value = vec![0.0f32; dim * dim];
        for row in 0..dim {
            for column in 0..dim {
                if row < half && column == row + half {
                    value[row * dim + column] = 1.0;
                } else if row >= half && column + half == row {
                    value[row * dim + column] = -1.0;
                }
            }
        }
        self.homomorphism(graph, value)
    }

    /// A dense element with structural hints; all hints fall back to the
    /// dense layout.
    pub fn element_with(
        &self,
        graph: &Graph,
        init: impl Into<Literal>,
        properties: &[Property],
    ) -> Result<Tensor> {
        if properties.is_empty() {
            return Err(Error::EmptyProperty);
        }
        self.element(graph, init)
    }
}

/// Structural hints attached to an element or homomorphism initializer.
///
/// Only `Diagonal` changes behavior today; the rest are accepted for API
/// compatibility and fall back to dense storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Property {
    Diagonal,
    Symmetric,
    Antisymmetric,
    Sparse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_dim_is_the_product() {
        let vs = VectorSpace::from_dims(Ring::Float32, &[3, 4, 5]);
        assert_eq!(vs.total_dim(), 60);
        assert_eq!(vs.rank(), 3);
    }

    #[test]
    fn strides_are_row_major() {
        let vs = VectorSpace::from_dims(Ring::Float32, &[2, 3, 4]);
        assert_eq!(vs.strides(), vec![12, 4, 1]);
        let flat = VectorSpace::new(Ring::Float32, 7);
        assert_eq!(flat.strides(), vec![1]);
    }

    #[test]
    fn ring_is_superior_over_factors() {
        let mixed = VectorSpace::from_factors(vec![
            SimpleFactor { ring: Ring::Int32, dim: 2 },
            SimpleFactor { ring: Ring::Float32, dim: 2 },
        ]);
        assert_eq!(mixed.ring(), Ring::Float32);
    }

    #[test]
    fn power_replicates_factors() {
        let vs = VectorSpace::new(Ring::Float32, 3);
        let sq = vs.power(2);
        assert_eq!(sq.rank(), 2);
        assert_eq!(sq.total_dim(), 9);
    }

    #[test]
    fn equality_is_elementwise() {
        let a = VectorSpace::from_dims(Ring::Float32, &[2, 3]);
        let b = VectorSpace::from_dims(Ring::Float32, &[2, 3]);
        let c = VectorSpace::from_dims(Ring::Float32, &[3, 2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
