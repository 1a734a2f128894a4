//! Graph plumbing: identifiers, ancestry, interface wiring and the
//! While node's preconditions.

use std::collections::BTreeSet;
use tensorlace::testing::*;
use tensorlace::{Graph, Input, NodeRef, Output, Ring, VectorSpace, While};

#[test]
fn node_ids_are_dense_and_monotonic() -> anyhow::Result<()> {
    let graph = Graph::new("Ids");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let sum = a.add(&b)?;

    assert_eq!(a.node_id().raw(), 1);
    assert_eq!(b.node_id().raw(), 2);
    assert_eq!(sum.node_id().raw(), 3);
    Ok(())
}

#[test]
fn parents_are_ordered_and_children_are_a_set() -> anyhow::Result<()> {
    let graph = Graph::new("Edges");
    let a = vector_123(&graph)?;
    let squared = a.multiply(&a)?;

    let node = graph.node(squared.node_id())?;
    assert_eq!(node.parents, vec![a.node_id(), a.node_id()]);
    let parent = graph.node(a.node_id())?;
    assert_eq!(parent.children.len(), 1);
    Ok(())
}

#[test]
fn root_ancestors_walk_to_the_constants() -> anyhow::Result<()> {
    let graph = Graph::new("Roots");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let c = vector_123(&graph)?;
    let sum = a.add(&b)?;
    let total = sum.add(&c)?;

    let mut roots = BTreeSet::new();
    graph.root_ancestors(&mut roots, total.node_id())?;
    let expected: BTreeSet<_> = [a.node_id(), b.node_id(), c.node_id()].into();
    assert_eq!(roots, expected);
    Ok(())
}

#[test]
fn child_references_can_be_dropped() -> anyhow::Result<()> {
    let graph = Graph::new("DropChild");
    let a = vector_123(&graph)?;
    let b = vector_123(&graph)?;
    let sum = a.add(&b)?;

    graph.delete_child_references(sum.node_id());
    assert!(!graph.node(a.node_id())?.children.contains(&sum.node_id()));
    assert!(!graph.node(b.node_id())?.children.contains(&sum.node_id()));
    // The node itself stays; only the back references are gone.
    assert!(graph.node(sum.node_id()).is_ok());
    Ok(())
}

#[test]
fn graphs_serialize_for_inspection() -> anyhow::Result<()> {
    let graph = Graph::new("Dump");
    let a = vector_123(&graph)?;
    let _sum = a.add(&a)?;

    let json = graph.to_json()?;
    assert!(json.contains("VectorAddition"));
    assert!(json.contains("parents"));
    Ok(())
}

#[test]
fn outputs_bind_tensors_on_the_same_graph() -> anyhow::Result<()> {
    let g1 = Graph::new("Here");
    let g2 = Graph::new("There");
    let local = vector_123(&g1)?;
    let foreign = vector_123(&g2)?;

    let out = Output::new(&g1, "Result")?;
    assert!(out.set(&foreign).is_err());
    out.set(&local)?;

    let node = g1.node(out.node_id())?;
    assert_eq!(node.parents, vec![local.node_id()]);
    Ok(())
}

#[test]
fn inputs_check_their_ring() -> anyhow::Result<()> {
    let graph = Graph::new("Inputs");
    let source = Input::new(&graph, "Feed", Ring::Float32);
    let vs = VectorSpace::new(Ring::Float32, 4);
    let fed = source.get(&vs, 1.5)?;
    assert_eq!(fed.dims(), vec![4]);

    let int_vs = VectorSpace::new(Ring::Int32, 4);
    assert!(source.get(&int_vs, 0.0).is_err());
    Ok(())
}

#[test]
fn while_requires_a_scalar_condition() -> anyhow::Result<()> {
    let graph = Graph::new("WhileChecks");
    let v = vector_123(&graph)?;
    let ones = VectorSpace::new(Ring::Float32, 3).element(&graph, vec![1.0f32; 3])?;
    let condition = v.is_smaller(&ones)?;

    let mut bad = While::new(&graph);
    assert!(bad.set(&v, &[], None, None).is_err(), "vector condition must fail");

    let mut good = While::new(&graph);
    good.set(&condition, &[], None, None)?;
    let id = good.id().expect("set assigns the node");
    let node = graph.node(id)?;
    assert_eq!(node.parents, vec![condition.node_id()]);
    assert_eq!(node.branch_true, None);
    assert_eq!(node.branch_false, None);
    Ok(())
}

#[test]
fn while_records_branch_targets() -> anyhow::Result<()> {
    let graph = Graph::new("WhileBranches");
    let v = vector_123(&graph)?;
    let ones = VectorSpace::new(Ring::Float32, 3).element(&graph, vec![1.0f32; 3])?;
    let next = v.add(&ones)?;
    let condition = next.is_smaller(&ones)?;
    let out = Output::new(&graph, "State")?;
    out.set(&next)?;

    let mut looper = While::new(&graph);
    let parents: Vec<&dyn NodeRef> = vec![&out];
    looper.set(&condition, &parents, Some(&out as &dyn NodeRef), None)?;

    let node = graph.node(looper.id().unwrap())?;
    assert_eq!(node.branch_true, Some(out.node_id()));
    assert_eq!(node.branch_false, None);
    // Condition first, then the declared parents, each once.
    assert_eq!(node.parents, vec![condition.node_id(), out.node_id()]);
    Ok(())
}
