//! Failure taxonomy for graph construction, differentiation and emission.
//!
//! Every fallible API in this crate returns [`Error`]; the first failure
//! aborts the call and propagates upward, and the graph is left in its
//! pre-call state (operations allocate nothing until every precondition
//! has passed). Failures inside the *emitted* runtime are a different
//! category entirely: those are fatal and handled in
//! [`runtime`](crate::runtime), not here.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A graph-construction or emission failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An initializer or operand has the wrong number of elements or factors.
    ShapeMismatch { expected: usize, got: usize },
    /// A literal's scalar kind does not match the ring of the target space.
    RingMismatch { detail: String },
    /// Two operands live on different graphs.
    CrossGraph,
    /// A factor index exceeds the rank or dimension of its space.
    IndexOutOfRange { index: u32, limit: u32 },
    /// The same factor index was supplied twice where it must be unique.
    DuplicateIndex { index: u32 },
    /// Operand ranks are incompatible for the requested operation.
    RankMismatch { detail: String },
    /// The derivative argument is not in the function's dependency graph.
    NotDependent,
    /// A derivative of a node with respect to itself was requested.
    DerivativeSelf,
    /// The derivative argument is not a tensor-valued node.
    DerivativeNonTensor,
    /// The node kind has no derivative rule.
    DerivativeUnsupported { kind: &'static str },
    /// A node exceeds the fixed per-node edge capacity of the runtime.
    EdgeCapExceeded { node: u32, edges: usize },
    /// The emitter could not produce or write output.
    EmitterIo { detail: String },
    /// Permutation indices are not a permutation of `0..rank`.
    InvalidPermutation,
    /// A property list was supplied but empty.
    EmptyProperty,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {expected} elements, got {got}")
            }
            Error::RingMismatch { detail } => write!(f, "ring mismatch: {detail}"),
            Error::CrossGraph => write!(f, "operands are not on the same graph"),
            Error::IndexOutOfRange { index, limit } => {
                write!(f, "index {index} out of range (limit {limit})")
            }
            Error::DuplicateIndex { index } => write!(f, "duplicate index {index}"),
            Error::RankMismatch { detail } => write!(f, "rank mismatch: {detail}"),
            Error::NotDependent => {
                write!(f, "argument is not a dependency of the function node")
            }
            Error::DerivativeSelf => write!(f, "cannot take a derivative with respect to itself"),
            Error::DerivativeNonTensor => {
                write!(f, "cannot take a derivative with respect to a non-tensor node")
            }
            Error::DerivativeUnsupported { kind } => {
                write!(f, "node kind {kind} has no derivative rule")
            }
            Error::EdgeCapExceeded { node, edges } => {
                write!(f, "node {node} has {edges} edges, exceeding the runtime cap")
            }
            Error::EmitterIo { detail } => write!(f, "emitter failure: {detail}"),
            Error::InvalidPermutation => {
                write!(f, "indices are not a permutation of 0..rank")
            }
            Error::EmptyProperty => write!(f, "property list must not be empty"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::EmitterIo { detail: e.to_string() }
    }
}
