//! # Tensorlace
//!
//! An **ahead-of-time compiler** that turns an algebraic tensor-expression
//! graph into a standalone, multi-threaded Rust program. Express numeric
//! computations — tensor algebra, contractions, permutations, projections,
//! cross-correlations, symbolic derivatives — as a declarative graph and
//! obtain a portable parallel executor without hand-rolling thread
//! coordination or instruction scheduling.
//!
//! ## Key Features
//!
//! - **Declarative tensor API** - spaces, elements, and operations that
//!   grow a computation graph as you chain them
//! - **Symbolic differentiation** - per-operation derivative rules plus a
//!   chain-rule traversal over the dependency subgraph
//! - **Kronecker-delta calculus** - identity-like tensors stay symbolic;
//!   contractions of deltas fold at graph-construction time and the
//!   emitter fuses the rest into index-equality tests
//! - **Structural CSE** - [`Graph::canonicalize`] merges duplicate nodes
//!   and rewrites all references before emission
//! - **Dependency-driven runtime** - the emitted program schedules node
//!   kernels across worker threads with an execution-counter discipline
//!   and a deferred queue that protects not-yet-consumed results
//! - **Control transfer** - `While` nodes re-enter earlier regions of the
//!   graph through control edges, keeping the data projection acyclic
//!
//! ## Quick Start
//!
//! ```no_run
//! use tensorlace::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! // Build a graph
//! let graph = Graph::new("QuickStart");
//! let vs = VectorSpace::new(Ring::Float32, 3);
//!
//! let vec1 = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
//! let vec2 = vs.element(&graph, vec![4.0f32, 5.0, 6.0])?;
//! let sum = vec1.add(&vec2)?;
//! let scaled = sum.multiply_by(42.0f32)?;
//!
//! // Expose the result as a named output
//! let out = Output::new(&graph, "Scaled")?;
//! out.set(&scaled)?;
//!
//! // Deduplicate, then emit a standalone cargo package
//! graph.canonicalize();
//! let report = Emitter::new("generated/quickstart").emit(&graph)?;
//! println!("emitted {} kernels", report.kernels_emitted);
//! # Ok(())
//! # }
//! ```
//!
//! The generated package exposes `register_scaled(callback)` and
//! `run(threads_nrof)`; the callback fires with the result buffer every
//! time the output node executes.
//!
//! ## Core Concepts
//!
//! ### Spaces and tensors
//!
//! A [`VectorSpace`] is an ordered product of `(ring, dim)` factors — the
//! shape-and-ring descriptor of a tensor. A [`Tensor`] is a handle to one
//! node of a [`Graph`]; every operation validates its preconditions,
//! allocates exactly one node, and returns a new handle. Scalars are
//! 1-dim tensors, not a separate type.
//!
//! ### Operations
//!
//! Element and factory methods live on [`VectorSpace`] (`element`,
//! `element_kron`, `scalar`, `homomorphism`); algebra lives on
//! [`Tensor`]: `add`, `subtract`, `multiply`, `divide`, `power`,
//! `contract`, `permute`, `project`, `join_indices`, `index_split_sum`,
//! `cross_correlate`, `max_pool`, `is_smaller` and `derivative`.
//!
//! ### Derivatives
//!
//! [`Tensor::derivative`] walks the dependency subgraph between a
//! function node and an argument node, applies per-kind local rules, and
//! composes them with the chain rule. The result lives in
//! `arg.space ⊗ f.space` with the argument's factors first.
//!
//! ### Interfaces and control
//!
//! [`Output`] and [`Input`] are the named boundary of a graph. A
//! [`While`] node makes the emitted program re-enter a region until a
//! scalar condition flips, which is how iterative computations
//! (integrators, counters) are expressed.
//!
//! ### Emission and execution
//!
//! [`Emitter::emit`] writes a cargo package: per-node kernels over static
//! buffers, a nodes table, the initial job pool, callback registration,
//! and a verbatim copy of [`runtime`] — the engine that schedules kernels
//! at run time. The engine is part of this crate, so the exact code your
//! generated program runs is the code tested here.
//!
//! ## Feature Flags
//!
//! - `metrics` - compilation statistics with JSON export (enabled by default)
//! - `rt-sched` - emitted workers try to adopt `SCHED_FIFO` at maximum
//!   priority and silently fall back on `EPERM`
//!
//! ## Module Overview
//!
//! - [`ring`] - scalar kinds and literals
//! - [`space`] - vector spaces and tensor factories
//! - [`graph`] - the shared mutable graph and the duplicate reducer
//! - [`node`] - node kinds, parameters and payloads
//! - [`tensor`] - the tensor handle and all algebraic operations
//! - [`derivative`] - the chain-rule differentiation engine
//! - [`interface`] - named outputs and inputs
//! - [`control`] - the While control-transfer node
//! - [`emitter`] - code generation
//! - [`runtime`] - the execution engine linked into every generated program
//! - [`metrics`] - compilation statistics (feature: `metrics`)
//! - [`testing`] - assertion helpers and fixtures for tests

pub mod control;
pub mod derivative;
pub mod emitter;
pub mod error;
pub mod graph;
pub mod interface;
pub mod node;
pub mod node_id;
pub mod ring;
pub mod runtime;
pub mod space;
pub mod tensor;
pub mod testing;

#[cfg(feature = "metrics")]
pub mod metrics;

// General re-exports
pub use control::While;
pub use emitter::{EmitReport, Emitter};
pub use error::{Error, Result};
pub use graph::{Graph, ReductionStats};
pub use interface::{Input, Output};
pub use node::{KindParams, Node, NodeKind, Payload};
pub use node_id::NodeId;
pub use ring::{Literal, Ring};
pub use space::{Property, SimpleFactor, VectorSpace};
pub use tensor::{NodeRef, Tensor};
