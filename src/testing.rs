//! Testing utilities for tensorlace graphs.
//!
//! This module provides the helpers the integration suite leans on:
//!
//! - **Assertions**: compare float buffers within an epsilon
//! - **Fixtures**: small standard graphs (the 3×3 matrix, the 1-2-3
//!   vector) used across many tests
//! - **Emission helpers**: emit a graph into a fresh temp directory and
//!   read back the generated sources
//!
//! # Example
//!
//! ```
//! use tensorlace::testing::*;
//! use tensorlace::{Graph, Ring, VectorSpace};
//!
//! let graph = Graph::new("Example");
//! let vs = VectorSpace::new(Ring::Float32, 3);
//! let v = vs.element(&graph, vec![1.0f32, 2.0, 3.0]).unwrap();
//! let doubled = v.multiply_by(2.0f32).unwrap();
//! assert_eq!(doubled.dims(), vec![3]);
//! ```

use crate::emitter::{EmitReport, Emitter};
use crate::error::Result;
use crate::graph::Graph;
use crate::ring::Ring;
use crate::space::VectorSpace;
use crate::tensor::Tensor;

/// Worker count for engine tests: every available core, at least two so
/// the scheduler's cross-thread paths actually run.
#[must_use]
pub fn default_threads() -> usize {
    num_cpus::get().max(2)
}

/// Assert two float slices agree elementwise within `eps`.
///
/// # Panics
///
/// Panics with a detailed message when lengths or any element differ.
pub fn assert_slices_close(actual: &[f32], expected: &[f32], eps: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "buffer length mismatch:\n  expected: {expected:?}\n  actual: {actual:?}"
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= eps,
            "buffer mismatch at index {i}: expected {e}, got {a}\n  full expected: {expected:?}\n  full actual: {actual:?}"
        );
    }
}

/// Relative-tolerance comparison for values spanning many magnitudes.
///
/// # Panics
///
/// Panics when any component differs by more than `rel · |expected|`.
pub fn assert_slices_close_rel(actual: &[f32], expected: &[f32], rel: f32) {
    assert_eq!(actual.len(), expected.len(), "buffer length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let tolerance = rel * e.abs();
        assert!(
            (a - e).abs() <= tolerance,
            "buffer mismatch at index {i}: expected {e}, got {a} (tolerance {tolerance})"
        );
    }
}

/// The 3×3 float matrix `[1..9]` row-major over `VS₃ ⊗ VS₃`.
pub fn matrix_3x3(graph: &Graph) -> Result<Tensor> {
    let vs = VectorSpace::new(Ring::Float32, 3);
    vs.power(2)
        .element(graph, (1..=9).map(|x| x as f32).collect::<Vec<_>>())
}

/// The float vector `(1, 2, 3)`.
pub fn vector_123(graph: &Graph) -> Result<Tensor> {
    VectorSpace::new(Ring::Float32, 3).element(graph, vec![1.0f32, 2.0, 3.0])
}

/// The 3×3 identity matrix as a dense element.
pub fn identity_3x3(graph: &Graph) -> Result<Tensor> {
    let vs = VectorSpace::new(Ring::Float32, 3);
    vs.power(2)
        .element(graph, vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
}

/// Emit `graph` into a fresh temp directory; the directory lives as long
/// as the returned guard.
pub fn emit_to_tempdir(graph: &Graph) -> Result<(tempfile::TempDir, EmitReport)> {
    let dir = tempfile::tempdir().map_err(crate::error::Error::from)?;
    let report = Emitter::new(dir.path()).emit(graph)?;
    Ok((dir, report))
}

/// Read one emitted source file back as a string.
///
/// # Panics
///
/// Panics when the file is missing — emission reported success, so a
/// missing file is a test failure, not an error to handle.
#[must_use]
pub fn emitted_file(report: &EmitReport, file_name: &str) -> String {
    let path = report
        .files
        .iter()
        .find(|p| p.file_name().is_some_and(|f| f == file_name))
        .unwrap_or_else(|| panic!("no emitted file named {file_name}"));
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read emitted file {}: {e}", path.display()))
}
