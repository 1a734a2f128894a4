//! Duplicate reduction: structural CSE over the graph.

use tensorlace::testing::*;
use tensorlace::{Graph, NodeRef, Output, Ring, VectorSpace};

#[test]
fn identical_constants_merge_into_the_smallest_id() -> anyhow::Result<()> {
    let graph = Graph::new("Constants");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let sum = a.add(&b)?;
    assert_eq!(graph.len(), 3);

    let stats = graph.canonicalize();
    assert_eq!(stats.nodes_removed, 1);
    assert_eq!(graph.len(), 2);

    // Every reference to the merged-away constant was rewritten.
    let sum_node = graph.node(sum.node_id())?;
    assert_eq!(sum_node.parents, vec![a.node_id(), a.node_id()]);
    let survivor = graph.node(a.node_id())?;
    assert!(survivor.children.contains(&sum.node_id()));
    assert!(graph.node(b.node_id()).is_err(), "the loser must be gone");
    Ok(())
}

#[test]
fn different_values_survive() -> anyhow::Result<()> {
    let graph = Graph::new("Distinct");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let _a = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
    let _b = vs.element(&graph, vec![1.0f32, 2.0, 4.0])?;

    let stats = graph.canonicalize();
    assert_eq!(stats.nodes_removed, 0);
    assert_eq!(graph.len(), 2);
    Ok(())
}

#[test]
fn reduction_cascades_through_rounds() -> anyhow::Result<()> {
    let graph = Graph::new("Cascade");
    let a1 = vector_123(&graph)?;
    let a2 = vector_123(&graph)?;
    let b = vector_123(&graph)?;

    // The two sums only become duplicates once a1 and a2 (and b) merge.
    let s1 = a1.add(&b)?;
    let s2 = a2.add(&b)?;
    let _total = s1.add(&s2)?;
    assert_eq!(graph.len(), 6);

    let stats = graph.canonicalize();
    // a2 and b fold into a1, then s2 folds into s1.
    assert_eq!(stats.nodes_removed, 3);
    assert!(stats.rounds >= 2);
    assert_eq!(graph.len(), 3);
    Ok(())
}

#[test]
fn operand_order_prevents_merging() -> anyhow::Result<()> {
    let graph = Graph::new("Order");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let a = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
    let b = vs.element(&graph, vec![4.0f32, 5.0, 6.0])?;

    let _ab = a.multiply(&b)?;
    let _ba = b.multiply(&a)?;

    let stats = graph.canonicalize();
    assert_eq!(stats.nodes_removed, 0, "operand order matters");
    Ok(())
}

#[test]
fn differently_named_sinks_are_kept_apart() -> anyhow::Result<()> {
    let graph = Graph::new("Sinks");
    let v = vector_123(&graph)?;
    let first = Output::new(&graph, "First")?;
    first.set(&v)?;
    let second = Output::new(&graph, "Second")?;
    second.set(&v)?;

    let stats = graph.canonicalize();
    assert_eq!(stats.nodes_removed, 0);
    assert!(graph.node(first.node_id()).is_ok());
    assert!(graph.node(second.node_id()).is_ok());
    Ok(())
}

#[test]
fn storage_relations_are_rewritten() -> anyhow::Result<()> {
    let graph = Graph::new("Storage");
    let vs = VectorSpace::new(Ring::Float32, 3);
    let state = vs.element(&graph, vec![1.0f32, 1.0, 1.0])?;
    let inc1 = vs.element(&graph, vec![0.5f32, 0.5, 0.5])?;
    let inc2 = vs.element(&graph, vec![0.5f32, 0.5, 0.5])?;
    let next = state.add(&inc1)?;
    next.store_in(&state)?;

    // inc2 duplicates inc1; merging must keep the storage relation
    // pointing at live ids.
    let _unused = inc2;
    graph.canonicalize();

    let next_node = graph.node(next.node_id())?;
    assert_eq!(next_node.stored_in, Some(state.node_id()));
    let state_node = graph.node(state.node_id())?;
    assert!(state_node.used_as_storage_by.contains(&next.node_id()));
    Ok(())
}

#[test]
fn derivative_deltas_deduplicate() -> anyhow::Result<()> {
    let graph = Graph::new("Deltas");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let c = vector_123(&graph)?;
    let sum_ab = a.add(&b)?;
    let sum_ac = a.add(&c)?;

    // Both derivatives materialize the same parentless identity delta.
    let _d1 = sum_ab.derivative(&a)?;
    let _d2 = sum_ac.derivative(&a)?;

    let before = graph.len();
    let stats = graph.canonicalize();
    // b and c merged into a, the two deltas merged, and the two sums
    // merged once their parents did.
    assert!(stats.nodes_removed >= 3);
    assert!(graph.len() < before);
    Ok(())
}
