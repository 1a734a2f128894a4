//! Derivative engine: per-kind local rules, chain-rule composition, and
//! the failure modes.

use tensorlace::testing::*;
use tensorlace::{Error, Graph, KindParams, NodeKind, NodeRef, Ring, VectorSpace};

#[test]
fn addition_derivative_is_a_kronecker_identity() -> anyhow::Result<()> {
    let graph = Graph::new("DAdd");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let sum = a.add(&b)?;

    let d = sum.derivative(&a)?;
    assert_eq!(d.dims(), vec![3, 3]);

    let node = graph.node(d.node_id())?;
    assert_eq!(node.kind, NodeKind::VectorKroneckerDeltaProduct);
    let KindParams::Kronecker { delta_pairs, scaling } = &node.params else {
        panic!("expected Kronecker parameters");
    };
    assert_eq!(delta_pairs, &vec![1, 0]);
    assert_eq!(scaling.0, 1.0);
    Ok(())
}

#[test]
fn scalar_product_derivative_wrt_the_scalar_is_the_other_operand() -> anyhow::Result<()> {
    let graph = Graph::new("DScalar");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let v = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
    let s = vs.scalar(&graph, 42.0f32)?;
    let scaled = s.multiply(&v)?;

    // ∂(s·v)/∂s = v: the existing operand node, no new allocation.
    let d = scaled.derivative(&s)?;
    assert_eq!(d.node_id(), v.node_id());
    Ok(())
}

#[test]
fn product_derivative_keeps_argument_factors_in_front() -> anyhow::Result<()> {
    let graph = Graph::new("DProduct");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let outer = a.multiply(&b)?;

    // Left argument: δ ⊗ b directly.
    let d_left = outer.derivative(&a)?;
    assert_eq!(d_left.dims(), vec![3, 3, 3]);
    assert_eq!(
        graph.node(d_left.node_id())?.kind,
        NodeKind::VectorVectorProduct
    );

    // Right argument: the same shape, behind a reordering permutation.
    let d_right = outer.derivative(&b)?;
    assert_eq!(d_right.dims(), vec![3, 3, 3]);
    assert_eq!(graph.node(d_right.node_id())?.kind, NodeKind::VectorPermutation);
    Ok(())
}

#[test]
fn contraction_derivative_shapes() -> anyhow::Result<()> {
    let graph = Graph::new("DContract");
    let m = matrix_3x3(&graph)?;
    let i = identity_3x3(&graph)?;
    let product = m.contract1(&i, 1, 0)?;

    // ∂(M·I)/∂I: C_ijkl over I.space ⊗ product.space
    let d_right = product.derivative(&i)?;
    assert_eq!(d_right.dims(), vec![3, 3, 3, 3]);
    assert_eq!(graph.node(d_right.node_id())?.kind, NodeKind::VectorPermutation);

    let d_left = product.derivative(&m)?;
    assert_eq!(d_left.dims(), vec![3, 3, 3, 3]);
    // Left argument needs no trailing permutation.
    assert_eq!(
        graph.node(d_left.node_id())?.kind,
        NodeKind::VectorContraction
    );
    Ok(())
}

#[test]
fn power_derivative_is_diagonal_in_the_argument() -> anyhow::Result<()> {
    let graph = Graph::new("DPower");
    let v = vector_123(&graph)?;
    let squared = v.power_by(2.0f32)?;

    let d = squared.derivative(&v)?;
    // Elementwise power: the Kronecker halves join back onto the
    // function's indices.
    assert_eq!(d.dims(), vec![3, 3]);
    assert_eq!(graph.node(d.node_id())?.kind, NodeKind::VectorJoinIndices);
    Ok(())
}

#[test]
fn power_derivative_wrt_exponent_is_unsupported() -> anyhow::Result<()> {
    let graph = Graph::new("DPowerExp");
    let v = vector_123(&graph)?;
    let e = v.space().scalar(&graph, 2.0f32)?;
    let powered = v.power(&e)?;
    assert!(matches!(
        powered.derivative(&e),
        Err(Error::DerivativeUnsupported { .. })
    ));
    Ok(())
}

#[test]
fn permutation_derivative_encodes_the_permutation() -> anyhow::Result<()> {
    let graph = Graph::new("DPermute");
    let m = matrix_3x3(&graph)?;
    let transposed = m.permute(&[1, 0])?;

    let d = transposed.derivative(&m)?;
    assert_eq!(d.dims(), vec![3, 3, 3, 3]);
    let node = graph.node(d.node_id())?;
    assert_eq!(node.kind, NodeKind::VectorKroneckerDeltaProduct);
    let KindParams::Kronecker { delta_pairs, .. } = &node.params else {
        panic!("expected Kronecker parameters");
    };
    // Position i pairs with permuted position on the image side.
    assert_eq!(delta_pairs, &vec![3, 2, 1, 0]);
    Ok(())
}

#[test]
fn projection_derivative_is_an_indicator_tensor() -> anyhow::Result<()> {
    let graph = Graph::new("DProject");
    let v = VectorSpace::new(Ring::Float32, 4)
        .element(&graph, vec![1.0f32, 2.0, 3.0, 4.0])?;
    let window = v.project1((1, 3))?;

    let d = window.derivative(&v)?;
    assert_eq!(d.dims(), vec![4, 2]);

    let node = graph.node(d.node_id())?;
    assert_eq!(node.kind, NodeKind::Vector);
    let value = node.payload.value().expect("indicator is a dense constant");
    let tensorlace::Literal::F32(mask) = value else {
        panic!("indicator must be Float32");
    };
    // mask[a][o] = 1 iff a == o + 1 for o in the window of width 2
    let mut expected = vec![0.0f32; 8];
    expected[2] = 1.0; // a = 1, o = 0
    expected[5] = 1.0; // a = 2, o = 1
    assert_slices_close(mask, &expected, 0.0);
    Ok(())
}

#[test]
fn chain_rule_composes_through_intermediate_nodes() -> anyhow::Result<()> {
    let graph = Graph::new("DChain");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;

    // f = (a + b)², a single dependency path a → g → f
    let g = a.add(&b)?;
    let f = g.power_by(2.0f32)?;

    let d = f.derivative(&a)?;
    // ∂f/∂a lives in a.space ⊗ f.space.
    assert_eq!(d.dims(), vec![3, 3]);
    // The top combination is the chain-rule contraction of ∂g/∂a
    // against ∂f/∂g.
    assert_eq!(graph.node(d.node_id())?.kind, NodeKind::VectorContraction);
    Ok(())
}

#[test]
fn scalar_valued_chain_multiplies_instead_of_contracting() -> anyhow::Result<()> {
    let graph = Graph::new("DScalarChain");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;

    // h = ⟨a+b, a+b⟩ is scalar-valued; w = 2·h keeps it scalar.
    let g = a.add(&b)?;
    let h = g.contract_full(&g)?;
    let w = h.multiply_by(2.0f32)?;

    let d = w.derivative(&a)?;
    assert_eq!(d.dims(), vec![3]);
    Ok(())
}

#[test]
fn derivative_failure_modes() -> anyhow::Result<()> {
    let graph = Graph::new("DErrors");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let unrelated = vector_123(&graph)?;
    let sum = a.add(&b)?;

    assert!(matches!(sum.derivative(&sum), Err(Error::DerivativeSelf)));
    assert!(matches!(sum.derivative(&unrelated), Err(Error::NotDependent)));

    // A kind without a rule: max pooling.
    let grid = VectorSpace::from_dims(Ring::Float32, &[4]).element(&graph, vec![0.0f32; 4])?;
    let pooled = grid.max_pool(&[2])?;
    assert!(matches!(
        pooled.derivative(&grid),
        Err(Error::DerivativeUnsupported { .. })
    ));
    Ok(())
}
