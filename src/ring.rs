//! Scalar rings and the literals that inhabit them.
//!
//! A [`Ring`] is the scalar kind of a tensor space. The ordering matters:
//! a larger variant is the *superior* ring, and mixed-ring arithmetic
//! settles on the superior of the two operands (an `Int32` plus a
//! `Float32` is a `Float32`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The scalar kind of a tensor space.
///
/// Variant order is meaningful: `Int32 < Float32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ring {
    /// Absent ring; never a valid ring for a live space.
    None,
    Int32,
    Float32,
}

impl Ring {
    /// The stronger of two rings.
    #[must_use]
    pub fn superior(self, other: Ring) -> Ring {
        self.max(other)
    }

    /// Bytes per scalar element.
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Ring::None => 0,
            Ring::Int32 | Ring::Float32 => 4,
        }
    }

    /// The Rust scalar type emitted for buffers of this ring.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Ring::None => "!",
            Ring::Int32 => "i32",
            Ring::Float32 => "f32",
        }
    }
}

/// A dense initializer (or runtime value) in one of the concrete rings.
///
/// Scalars are length-1 buffers; there is no separate scalar
/// representation anywhere in the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl Literal {
    /// The ring this literal inhabits.
    #[must_use]
    pub fn ring(&self) -> Ring {
        match self {
            Literal::F32(_) => Ring::Float32,
            Literal::I32(_) => Ring::Int32,
        }
    }

    /// Number of scalar elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Literal::F32(v) => v.len(),
            Literal::I32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bit-exact comparison. Buffer identity for duplicate detection is
    /// defined over bytes, so `-0.0` and `0.0` are distinct and two NaNs
    /// with equal payloads are equal.
    #[must_use]
    pub fn same_bits(&self, other: &Literal) -> bool {
        match (self, other) {
            (Literal::F32(l), Literal::F32(r)) => {
                l.len() == r.len()
                    && l.iter().zip(r).all(|(a, b)| a.to_bits() == b.to_bits())
            }
            (Literal::I32(l), Literal::I32(r)) => l == r,
            _ => false,
        }
    }

    /// Reject literals whose scalar kind does not match `ring`.
    pub fn check_compatible(&self, ring: Ring) -> Result<()> {
        if self.ring() == ring {
            Ok(())
        } else {
            Err(Error::RingMismatch {
                detail: format!("{:?} literal in a {:?} space", self.ring(), ring),
            })
        }
    }
}

impl From<Vec<f32>> for Literal {
    fn from(v: Vec<f32>) -> Self {
        Literal::F32(v)
    }
}

impl From<&[f32]> for Literal {
    fn from(v: &[f32]) -> Self {
        Literal::F32(v.to_vec())
    }
}

impl From<f32> for Literal {
    fn from(v: f32) -> Self {
        Literal::F32(vec![v])
    }
}

impl From<Vec<i32>> for Literal {
    fn from(v: Vec<i32>) -> Self {
        Literal::I32(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::I32(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superior_ring_is_the_larger_variant() {
        assert_eq!(Ring::Int32.superior(Ring::Float32), Ring::Float32);
        assert_eq!(Ring::Float32.superior(Ring::Int32), Ring::Float32);
        assert_eq!(Ring::None.superior(Ring::Int32), Ring::Int32);
        assert_eq!(Ring::Int32.superior(Ring::Int32), Ring::Int32);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(Ring::Float32.element_size(), 4);
        assert_eq!(Ring::Int32.element_size(), 4);
        assert_eq!(Ring::None.element_size(), 0);
    }

    #[test]
    fn literal_compatibility() {
        let f: Literal = vec![1.0f32, 2.0].into();
        assert!(f.check_compatible(Ring::Float32).is_ok());
        assert!(matches!(
            f.check_compatible(Ring::Int32),
            Err(Error::RingMismatch { .. })
        ));
    }

    #[test]
    fn same_bits_is_exact() {
        let a: Literal = vec![0.0f32].into();
        let b: Literal = vec![-0.0f32].into();
        assert!(!a.same_bits(&b));
        assert!(a.same_bits(&a.clone()));
    }
}
