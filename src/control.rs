//! Control transfer: conditional re-entry into a region of the graph.
//!
//! A [`While`] node reads a scalar condition and, at run time, re-enters
//! the region of its taken branch by pushing the region's runnable roots
//! back into the job pool. The branch edges are control edges, stored
//! apart from the data `parents`, so the data-dependency projection of
//! the graph stays acyclic; the emitted nodes table gives While entries
//! no children at all and the kernel performs the pushes through the
//! engine's public interface.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeKind};
use crate::node_id::NodeId;
use crate::tensor::{NodeRef, Tensor};

/// A While control-transfer handle.
pub struct While {
    graph: Graph,
    node: Option<NodeId>,
}

impl While {
    #[must_use]
    pub fn new(graph: &Graph) -> While {
        While { graph: graph.clone(), node: None }
    }

    /// Wire the node.
    ///
    /// `condition` must be a scalar (total dimension 1) on the same
    /// graph. `parents` are the nodes that must have executed before the
    /// condition is checked (the condition itself is always included and
    /// not added twice). `branch_true` is pushed when the condition reads
    /// nonzero, `branch_false` when it reads zero; pass `None` for "done".
    pub fn set(
        &mut self,
        condition: &Tensor,
        parents: &[&dyn NodeRef],
        branch_true: Option<&dyn NodeRef>,
        branch_false: Option<&dyn NodeRef>,
    ) -> Result<()> {
        if !condition.graph().same_graph(&self.graph) {
            return Err(Error::CrossGraph);
        }
        if condition.space().total_dim() != 1 {
            return Err(Error::ShapeMismatch {
                expected: 1,
                got: condition.space().total_dim() as usize,
            });
        }
        for p in parents {
            if !p.graph().same_graph(&self.graph) {
                return Err(Error::CrossGraph);
            }
        }
        if let Some(t) = branch_true {
            if !t.graph().same_graph(&self.graph) {
                return Err(Error::CrossGraph);
            }
        }
        if let Some(f) = branch_false {
            if !f.graph().same_graph(&self.graph) {
                return Err(Error::CrossGraph);
            }
        }

        let mut node = Node::new(NodeKind::ControlTransferWhile);
        node.branch_true = branch_true.map(NodeRef::node_id);
        node.branch_false = branch_false.map(NodeRef::node_id);
        let id = self.graph.insert_node(node)?;
        self.node = Some(id);

        self.graph.add_parent(condition.node_id(), id)?;
        for p in parents {
            if p.node_id() != condition.node_id() {
                self.graph.add_parent(p.node_id(), id)?;
            }
        }
        Ok(())
    }

    /// The node id, once [`set`](Self::set) has run.
    #[must_use]
    pub fn id(&self) -> Option<NodeId> {
        self.node
    }
}
