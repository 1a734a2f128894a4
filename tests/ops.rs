//! Operation-level behavior: result spaces, node kinds, and the error
//! taxonomy enforced before any node is allocated.

use tensorlace::testing::*;
use tensorlace::{Error, Graph, NodeKind, NodeRef, Ring, VectorSpace};

#[test]
fn add_matches_shapes_and_allocates_one_node() -> anyhow::Result<()> {
    let graph = Graph::new("Add");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let before = graph.len();

    let sum = a.add(&b)?;
    assert_eq!(graph.len(), before + 1);
    assert_eq!(sum.dims(), vec![3]);

    let node = graph.node(sum.node_id())?;
    assert_eq!(node.kind, NodeKind::VectorAddition);
    assert_eq!(node.parents, vec![a.node_id(), b.node_id()]);
    Ok(())
}

#[test]
fn add_rejects_shape_mismatch_without_allocating() -> anyhow::Result<()> {
    let graph = Graph::new("AddBad");
    let a = vector_123(&graph)?;
    let b = VectorSpace::new(Ring::Float32, 4).element(&graph, vec![0.0f32; 4])?;
    let before = graph.len();

    assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));
    assert_eq!(graph.len(), before, "a failed operation must not allocate");
    Ok(())
}

#[test]
fn cross_graph_operands_are_rejected() -> anyhow::Result<()> {
    let g1 = Graph::new("One");
    let g2 = Graph::new("Two");
    let a = vector_123(&g1)?;
    let b = vector_123(&g2)?;
    assert!(matches!(a.add(&b), Err(Error::CrossGraph)));
    assert!(matches!(a.multiply(&b), Err(Error::CrossGraph)));
    assert!(matches!(a.is_smaller(&b), Err(Error::CrossGraph)));
    assert!(matches!(a.contract1(&b, 0, 0), Err(Error::CrossGraph)));
    Ok(())
}

#[test]
fn multiply_dispatches_on_scalar_operands() -> anyhow::Result<()> {
    let graph = Graph::new("Multiply");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let v = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
    let s = vs.scalar(&graph, 42.0f32)?;

    // scalar × vector keeps the vector's space
    let scaled = s.multiply(&v)?;
    assert_eq!(scaled.dims(), vec![3]);
    assert_eq!(graph.node(scaled.node_id())?.kind, NodeKind::VectorScalarProduct);

    // scalar × scalar is a 1-dim scalar of the superior ring
    let ss = s.multiply(&s)?;
    assert_eq!(ss.dims(), vec![1]);
    assert_eq!(graph.node(ss.node_id())?.kind, NodeKind::VectorScalarProduct);

    // tensor × tensor concatenates factors
    let outer = v.multiply(&v)?;
    assert_eq!(outer.dims(), vec![3, 3]);
    assert_eq!(graph.node(outer.node_id())?.kind, NodeKind::VectorVectorProduct);
    Ok(())
}

#[test]
fn subtract_and_divide_are_sugar() -> anyhow::Result<()> {
    let graph = Graph::new("Sugar");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;

    let difference = a.subtract(&b)?;
    let node = graph.node(difference.node_id())?;
    assert_eq!(node.kind, NodeKind::VectorAddition);
    // The second summand is (-1) · b.
    let negated = graph.node(node.parents[1])?;
    assert_eq!(negated.kind, NodeKind::VectorScalarProduct);

    let s = VectorSpace::new(Ring::Float32, 1).element(&graph, vec![2.0f32])?;
    let quotient = a.divide(&s)?;
    let node = graph.node(quotient.node_id())?;
    assert_eq!(node.kind, NodeKind::VectorScalarProduct);
    // The divisor went through b^(-1).
    let inverse = graph.node(node.parents[1])?;
    assert_eq!(inverse.kind, NodeKind::VectorPower);
    Ok(())
}

#[test]
fn power_requires_a_scalar_exponent() -> anyhow::Result<()> {
    let graph = Graph::new("Power");
    let a = vector_123(&graph)?;
    let e = vector_123(&graph)?;
    assert!(matches!(a.power(&e), Err(Error::RankMismatch { .. })));

    let squared = a.power_by(2.0f32)?;
    assert_eq!(squared.dims(), vec![3]);
    assert_eq!(graph.node(squared.node_id())?.kind, NodeKind::VectorPower);
    Ok(())
}

#[test]
fn contraction_power_needs_half_the_indices() -> anyhow::Result<()> {
    let graph = Graph::new("PowerContracted");
    let m = matrix_3x3(&graph)?;
    let n = VectorSpace::new(Ring::Float32, 1).scalar(&graph, 3.0f32)?;

    let repeated = m.power_contracted(&n, &[1], &[0])?;
    assert_eq!(repeated.dims(), vec![3, 3]);

    // rank 2 with two contracted pairs would need rank 4
    assert!(matches!(
        m.power_contracted(&n, &[0, 1], &[0, 1]),
        Err(Error::RankMismatch { .. })
    ));

    let v = vector_123(&graph)?;
    assert!(matches!(v.power_contracted(&n, &[0], &[0]), Err(Error::RankMismatch { .. })));
    Ok(())
}

#[test]
fn is_smaller_lives_in_int32() -> anyhow::Result<()> {
    let graph = Graph::new("IsSmaller");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let cmp = a.is_smaller(&b)?;
    assert_eq!(cmp.space().ring(), Ring::Int32);
    assert_eq!(cmp.space().total_dim(), 1);
    Ok(())
}

#[test]
fn permute_validates_the_permutation() -> anyhow::Result<()> {
    let graph = Graph::new("Permute");
    let m = matrix_3x3(&graph)?;

    let transposed = m.permute(&[1, 0])?;
    assert_eq!(transposed.dims(), vec![3, 3]);

    assert!(matches!(m.permute(&[0, 0]), Err(Error::InvalidPermutation)));
    assert!(matches!(m.permute(&[0, 2]), Err(Error::InvalidPermutation)));
    assert!(matches!(m.permute(&[0]), Err(Error::InvalidPermutation)));
    Ok(())
}

#[test]
fn project_shrinks_factor_dims() -> anyhow::Result<()> {
    let graph = Graph::new("Project");
    let m = matrix_3x3(&graph)?;

    let window = m.project(&[(0, 2), (1, 3)])?;
    assert_eq!(window.dims(), vec![2, 2]);

    assert!(matches!(m.project(&[(0, 2)]), Err(Error::RankMismatch { .. })));
    assert!(matches!(m.project(&[(0, 4), (0, 3)]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(m.project(&[(2, 2), (0, 3)]), Err(Error::IndexOutOfRange { .. })));
    Ok(())
}

#[test]
fn join_indices_merges_equal_dims() -> anyhow::Result<()> {
    let graph = Graph::new("Join");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let cube = vs.power(3).element(&graph, vec![0.0f32; 27])?;

    // B_ik = A_iik
    let joined = cube.join_indices(&[vec![0, 1]])?;
    assert_eq!(joined.dims(), vec![3, 3]);

    assert!(matches!(
        cube.join_indices(&[vec![0, 1], vec![1, 2]]),
        Err(Error::DuplicateIndex { .. })
    ));
    assert!(matches!(cube.join_indices(&[vec![0, 3]]), Err(Error::IndexOutOfRange { .. })));

    let uneven = VectorSpace::from_dims(Ring::Float32, &[3, 4]).element(&graph, vec![0.0f32; 12])?;
    assert!(matches!(uneven.join_indices(&[vec![0, 1]]), Err(Error::ShapeMismatch { .. })));
    Ok(())
}

#[test]
fn index_split_sum_replaces_the_split_factor() -> anyhow::Result<()> {
    let graph = Graph::new("SplitSum");
    let v = VectorSpace::new(Ring::Float32, 9)
        .element(&graph, (1..=9).map(|x| x as f32).collect::<Vec<_>>())?;

    let split = v.index_split_sum(&[3])?;
    assert_eq!(split.dims(), vec![3]);

    let untouched = v.index_split_sum(&[0])?;
    assert_eq!(untouched.dims(), vec![9]);

    assert!(matches!(v.index_split_sum(&[4]), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(v.index_split_sum(&[10]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(v.index_split_sum(&[3, 3]), Err(Error::RankMismatch { .. })));
    Ok(())
}

#[test]
fn cross_correlate_uses_valid_windows() -> anyhow::Result<()> {
    let graph = Graph::new("CrossCorrelate");
    let input = VectorSpace::from_dims(Ring::Float32, &[10, 10])
        .element(&graph, vec![0.0f32; 100])?;
    let kernel = matrix_3x3(&graph)?;

    let cc = input.cross_correlate(&kernel)?;
    assert_eq!(cc.dims(), vec![8, 8]);

    let vector = vector_123(&graph)?;
    assert!(matches!(input.cross_correlate(&vector), Err(Error::RankMismatch { .. })));

    let large = VectorSpace::from_dims(Ring::Float32, &[11, 11]).element(&graph, vec![0.0f32; 121])?;
    assert!(matches!(input.cross_correlate(&large), Err(Error::ShapeMismatch { .. })));
    Ok(())
}

#[test]
fn max_pool_divides_each_factor() -> anyhow::Result<()> {
    let graph = Graph::new("MaxPool");
    let input = VectorSpace::from_dims(Ring::Float32, &[8, 8]).element(&graph, vec![0.0f32; 64])?;

    let pooled = input.max_pool(&[2, 2])?;
    assert_eq!(pooled.dims(), vec![4, 4]);

    assert!(matches!(input.max_pool(&[3, 2]), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(input.max_pool(&[0, 2]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(input.max_pool(&[2]), Err(Error::RankMismatch { .. })));
    Ok(())
}

#[test]
fn store_in_records_both_directions() -> anyhow::Result<()> {
    let graph = Graph::new("Storage");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let state = vs.element(&graph, vec![1.0f32, 1.0, 1.0])?;
    let step = vs.element(&graph, vec![0.5f32, 0.5, 0.5])?;
    let next = state.add(&step)?;

    next.store_in(&state)?;
    let next_node = graph.node(next.node_id())?;
    assert_eq!(next_node.stored_in, Some(state.node_id()));
    let state_node = graph.node(state.node_id())?;
    assert!(state_node.used_as_storage_by.contains(&next.node_id()));
    Ok(())
}
