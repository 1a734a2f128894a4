//! Named sinks and sources at the graph boundary.
//!
//! An [`Output`] is a named sink: the emitted program exposes a
//! `register_<name>` function taking a callback, and the output node's
//! kernel invokes that callback with the bound tensor's buffer once per
//! activation. An [`Input`] is a named source: each
//! [`get`](Input::get) call materializes an `INPUT` node whose kernel
//! asks a registered filler for fresh data, falling back to a declared
//! default value.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeKind, Payload};
use crate::node_id::NodeId;
use crate::ring::Ring;
use crate::space::VectorSpace;
use crate::tensor::{NodeRef, Tensor};
use ordered_float::OrderedFloat;

/// A named sink node.
pub struct Output {
    graph: Graph,
    node: NodeId,
    name: String,
}

impl NodeRef for Output {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Output {
    /// Create the sink node. The name becomes part of the emitted
    /// registration API, so keep it identifier-shaped.
    pub fn new(graph: &Graph, name: &str) -> Result<Output> {
        let mut node = Node::new(NodeKind::Output);
        node.payload = Payload::Output { name: name.to_string() };
        let id = graph.insert_node(node)?;
        Ok(Output { graph: graph.clone(), node: id, name: name.to_string() })
    }

    /// Bind a tensor to this sink. The tensor becomes a parent of the
    /// output node; its kernel reports the tensor's buffer on every
    /// activation.
    pub fn set(&self, tensor: &Tensor) -> Result<()> {
        if !self.graph.same_graph(tensor.graph()) {
            return Err(Error::CrossGraph);
        }
        self.graph.add_parent(tensor.node_id(), self.node)
    }

    /// The sink's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named source of tensors.
///
/// One `Input` may hand out several tensors (one `INPUT` node per
/// [`get`](Input::get) call); they share the name but each carries its
/// own space and default value, and those form the descriptor the
/// duplicate reducer compares.
pub struct Input {
    graph: Graph,
    name: String,
    ring: Ring,
}

impl Input {
    pub fn new(graph: &Graph, name: &str, ring: Ring) -> Input {
        Input { graph: graph.clone(), name: name.to_string(), ring }
    }

    /// A tensor fed by this input, pre-filled with `default` until a
    /// filler callback is registered in the emitted program.
    pub fn get(&self, space: &VectorSpace, default: f32) -> Result<Tensor> {
        if space.ring() != self.ring {
            return Err(Error::RingMismatch {
                detail: format!("input {} is {:?}, space is {:?}", self.name, self.ring, space.ring()),
            });
        }
        let mut node = Node::new(NodeKind::Input);
        node.payload = Payload::Input {
            name: self.name.clone(),
            space: space.clone(),
            default: OrderedFloat(default),
        };
        let id = self.graph.insert_node(node)?;
        Ok(Tensor::new(self.graph.clone(), id, space.clone()))
    }

    /// The source's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
