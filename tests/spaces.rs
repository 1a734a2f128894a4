//! Space factories: initializer validation, ring checks, the diagonal
//! homomorphism and the symplectic form.

use tensorlace::testing::*;
use tensorlace::{Error, Graph, Literal, NodeKind, NodeRef, Property, Ring, VectorSpace};

#[test]
fn element_validates_length_and_ring() -> anyhow::Result<()> {
    let graph = Graph::new("Element");
    let vs = VectorSpace::new(Ring::Float32, 3);

    assert!(vs.element(&graph, vec![1.0f32, 2.0, 3.0]).is_ok());
    assert!(matches!(
        vs.element(&graph, vec![1.0f32, 2.0]),
        Err(Error::ShapeMismatch { expected: 3, got: 2 })
    ));
    assert!(matches!(
        vs.element(&graph, vec![1i32, 2, 3]),
        Err(Error::RingMismatch { .. })
    ));

    let int_vs = VectorSpace::new(Ring::Int32, 2);
    assert!(int_vs.element(&graph, vec![1i32, 2]).is_ok());
    assert!(matches!(
        int_vs.element(&graph, vec![1.0f32, 2.0]),
        Err(Error::RingMismatch { .. })
    ));
    Ok(())
}

#[test]
fn scalar_is_a_one_dim_element() -> anyhow::Result<()> {
    let graph = Graph::new("Scalar");
    let vs = VectorSpace::new(Ring::Float32, 7);
    let s = vs.scalar(&graph, 2.5f32)?;
    assert_eq!(s.dims(), vec![1]);
    assert_eq!(s.space().ring(), Ring::Float32);
    Ok(())
}

#[test]
fn kron_element_requires_an_involution() -> anyhow::Result<()> {
    let graph = Graph::new("Kron");
    let vs = VectorSpace::new(Ring::Float32, 3).power(2);

    let delta = vs.element_kron(&graph, &[1, 0], 1.0)?;
    assert_eq!(
        graph.node(delta.node_id())?.kind,
        NodeKind::VectorKroneckerDeltaProduct
    );

    // Wrong arity
    assert!(matches!(
        vs.element_kron(&graph, &[1, 0, 3], 1.0),
        Err(Error::ShapeMismatch { .. })
    ));
    // Not an involution
    assert!(matches!(
        VectorSpace::new(Ring::Float32, 3)
            .power(4)
            .element_kron(&graph, &[1, 2, 3, 0], 1.0),
        Err(Error::RankMismatch { .. })
    ));
    // Out of range
    assert!(matches!(
        vs.element_kron(&graph, &[2, 0], 1.0),
        Err(Error::IndexOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn homomorphism_expands_a_diagonal_hint() -> anyhow::Result<()> {
    let graph = Graph::new("Diagonal");
    let vs = VectorSpace::new(Ring::Float32, 3);

    let diag = vs.homomorphism_with(&graph, vec![1.0f32, 2.0, 3.0], &[Property::Diagonal])?;
    assert_eq!(diag.dims(), vec![3, 3]);

    let node = graph.node(diag.node_id())?;
    let Some(Literal::F32(full)) = node.payload.value() else {
        panic!("expected a dense Float32 initializer");
    };
    assert_slices_close(
        full,
        &[1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0],
        0.0,
    );
    Ok(())
}

#[test]
fn empty_property_lists_are_rejected() -> anyhow::Result<()> {
    let graph = Graph::new("EmptyProps");
    let vs = VectorSpace::new(Ring::Float32, 2);
    assert!(matches!(
        vs.homomorphism_with(&graph, vec![1.0f32, 2.0], &[]),
        Err(Error::EmptyProperty)
    ));
    assert!(matches!(
        vs.element_with(&graph, vec![1.0f32, 2.0], &[]),
        Err(Error::EmptyProperty)
    ));
    Ok(())
}

#[test]
fn sparse_hints_fall_back_to_dense() -> anyhow::Result<()> {
    let graph = Graph::new("SparseHint");
    let vs = VectorSpace::new(Ring::Float32, 4);
    let v = vs.element_with(&graph, vec![0.0f32, 1.0, 0.0, 0.0], &[Property::Sparse])?;
    let node = graph.node(v.node_id())?;
    assert_eq!(node.kind, NodeKind::Vector);
    assert!(node.payload.value().is_some(), "dense fallback keeps the buffer");
    Ok(())
}

#[test]
fn symplectic_form_squares_to_minus_identity() -> anyhow::Result<()> {
    let graph = Graph::new("Symplectic");
    let phase = VectorSpace::new(Ring::Float32, 6);
    let j = phase.symplectic_form(&graph)?;
    assert_eq!(j.dims(), vec![6, 6]);

    let node = graph.node(j.node_id())?;
    let Some(Literal::F32(matrix)) = node.payload.value() else {
        panic!("the form is a dense constant");
    };

    // J² = -I, and J is antisymmetric (Jᵀ = -J).
    let n = 6usize;
    for row in 0..n {
        for col in 0..n {
            let mut sum = 0.0f32;
            for k in 0..n {
                sum += matrix[row * n + k] * matrix[k * n + col];
            }
            let expected = if row == col { -1.0 } else { 0.0 };
            assert_eq!(sum, expected, "J·J mismatch at ({row}, {col})");
            assert_eq!(
                matrix[row * n + col],
                -matrix[col * n + row],
                "antisymmetry mismatch at ({row}, {col})"
            );
        }
    }
    Ok(())
}

#[test]
fn symplectic_form_needs_an_even_dimension() {
    let graph = Graph::new("SymplecticOdd");
    let odd = VectorSpace::new(Ring::Float32, 5);
    assert!(matches!(
        odd.symplectic_form(&graph),
        Err(Error::ShapeMismatch { .. })
    ));
}
