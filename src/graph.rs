//! In-memory representation of a tensor-expression graph.
//!
//! The [`Graph`] acts as the central registry for all nodes
//! ([`Node`](crate::node::Node)) and their directed connections. It is
//! lightweight, cloneable, and thread-safe via internal `Arc<Mutex<_>>`
//! wrapping, allowing concurrent construction and inspection from
//! different builder contexts.
//!
//! # Overview
//! - Every tensor operation inserts a new [`Node`] with its operands as
//!   ordered parents; the graph registers the node as a child of each.
//! - The emitter takes a *snapshot* of the graph before generating code.
//! - [`Graph::canonicalize`] is the duplicate reducer: a structural
//!   common-subexpression elimination pass that merges nodes with equal
//!   parents, kind, parameters and payload, rewriting every reference to
//!   the merged-away ids. After canonicalization the graph is considered
//!   frozen and ready for emission.

use crate::error::{Error, Result};
use crate::node::{Node, NodeKind};
use crate::node_id::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Thread-safe graph structure holding all nodes.
///
/// The `Graph` itself is cheaply cloneable; all clones share the same
/// underlying [`GraphInner`]. Two handles refer to the same graph iff
/// they share that allocation — every binary tensor operation checks
/// this and fails with [`Error::CrossGraph`] otherwise.
pub struct Graph {
    /// Shared reference to the internal graph data.
    pub(crate) inner: Arc<Mutex<GraphInner>>,
}

/// Inner mutable graph state for a [`Graph`].
pub(crate) struct GraphInner {
    pub name: String,
    pub next_id: u32,
    pub nodes: BTreeMap<NodeId, Node>,
}

impl Graph {
    /// A fresh, empty graph. The name becomes the emitted package name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Graph {
            inner: Arc::new(Mutex::new(GraphInner {
                name: name.to_string(),
                next_id: 1,
                nodes: BTreeMap::new(),
            })),
        }
    }

    /// The graph's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    /// True if `self` and `other` are handles to the same graph.
    #[must_use]
    pub fn same_graph(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a new node, assign it the next id, and register it as a
    /// child of every listed parent.
    ///
    /// Fails if any referenced parent does not exist; nothing is inserted
    /// in that case.
    pub(crate) fn insert_node(&self, mut node: Node) -> Result<NodeId> {
        let mut g = self.inner.lock().unwrap();
        for p in &node.parents {
            if !g.nodes.contains_key(p) {
                return Err(Error::IndexOutOfRange { index: p.raw(), limit: g.next_id });
            }
        }
        let id = NodeId::new(g.next_id);
        g.next_id += 1;
        node.id = id;
        let parents = node.parents.clone();
        g.nodes.insert(id, node);
        for p in parents {
            g.nodes.get_mut(&p).unwrap().children.insert(id);
        }
        Ok(id)
    }

    /// Connect an existing parent to an existing child: appends to the
    /// child's ordered parent sequence and inserts into the parent's
    /// child set.
    pub(crate) fn add_parent(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        if !g.nodes.contains_key(&parent) {
            return Err(Error::IndexOutOfRange { index: parent.raw(), limit: g.next_id });
        }
        let Some(c) = g.nodes.get_mut(&child) else {
            return Err(Error::IndexOutOfRange { index: child.raw(), limit: g.next_id });
        };
        c.parents.push(parent);
        g.nodes.get_mut(&parent).unwrap().children.insert(child);
        Ok(())
    }

    /// A clone of the node with the given id.
    pub fn node(&self, id: NodeId) -> Result<Node> {
        let g = self.inner.lock().unwrap();
        g.nodes
            .get(&id)
            .cloned()
            .ok_or(Error::IndexOutOfRange { index: id.raw(), limit: g.next_id })
    }

    /// Run a closure against the node without cloning it.
    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        let g = self.inner.lock().unwrap();
        g.nodes
            .get(&id)
            .map(f)
            .ok_or(Error::IndexOutOfRange { index: id.raw(), limit: g.next_id })
    }

    /// Mutate a node in place.
    pub(crate) fn with_node_mut<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut Node) -> R,
    ) -> Result<R> {
        let mut g = self.inner.lock().unwrap();
        let limit = g.next_id;
        g.nodes
            .get_mut(&id)
            .map(f)
            .ok_or(Error::IndexOutOfRange { index: id.raw(), limit })
    }

    /// Return a **snapshot** of the current graph (all nodes by id).
    ///
    /// This is a deep clone, used by the emitter to analyze the graph
    /// without holding the lock.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<NodeId, Node> {
        self.inner.lock().unwrap().nodes.clone()
    }

    /// Remove `child` from every node's child set.
    pub fn delete_child_references(&self, child: NodeId) {
        let mut g = self.inner.lock().unwrap();
        for node in g.nodes.values_mut() {
            node.children.remove(&child);
        }
    }

    /// Collect the parentless ancestors of `child` into `roots`.
    pub fn root_ancestors(&self, roots: &mut BTreeSet<NodeId>, child: NodeId) -> Result<()> {
        let g = self.inner.lock().unwrap();
        let mut stack = vec![child];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = g
                .nodes
                .get(&id)
                .ok_or(Error::IndexOutOfRange { index: id.raw(), limit: g.next_id })?;
            if node.parents.is_empty() {
                roots.insert(id);
            } else {
                stack.extend(node.parents.iter().copied());
            }
        }
        Ok(())
    }

    /// Serialize the graph to pretty JSON, for debugging and tooling.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let g = self.inner.lock().unwrap();
        serde_json::to_string_pretty(&g.nodes)
    }

    /// Structural common-subexpression elimination.
    ///
    /// Repeatedly partitions nodes by a partial structural hash, merges
    /// exact duplicates into the numerically smallest id, and rewrites
    /// every occurrence of the merged ids throughout the graph. The pass
    /// repeats until a round removes nothing; a safety cap equal to the
    /// initial node count bounds the loop.
    pub fn canonicalize(&self) -> ReductionStats {
        let mut stats = ReductionStats::default();
        let mut cap = self.len();
        loop {
            let mut removed = 0usize;

            // Bucket by partial hash.
            let mut buckets: HashMap<u64, Vec<NodeId>> = HashMap::new();
            {
                let g = self.inner.lock().unwrap();
                for (id, node) in &g.nodes {
                    buckets.entry(node.partial_hash()).or_default().push(*id);
                }
            }

            for (_, candidates) in buckets {
                if candidates.len() < 2 {
                    continue;
                }
                debug!(candidates = candidates.len(), "possible duplicate nodes");

                // Within a bucket, group nodes that pass the full test.
                let mut remaining = candidates;
                let mut groups: Vec<Vec<NodeId>> = Vec::new();
                while let Some(head) = remaining.first().copied() {
                    let head_node = match self.node(head) {
                        Ok(n) => n,
                        Err(_) => {
                            remaining.remove(0);
                            continue; // merged away by an earlier group
                        }
                    };
                    let mut group = vec![head];
                    remaining.retain(|&other| {
                        if other == head {
                            return false;
                        }
                        match self.node(other) {
                            Ok(o) if Node::are_duplicate(&head_node, &o) => {
                                group.push(other);
                                false
                            }
                            Ok(_) => true,
                            Err(_) => false,
                        }
                    });
                    groups.push(group);
                }

                for group in groups {
                    if group.len() < 2 {
                        continue;
                    }
                    removed += group.len() - 1;
                    self.reduce_to_one(&group);
                }
            }

            stats.nodes_removed += removed;
            stats.rounds += 1;
            if removed == 0 {
                break;
            }
            if cap == 0 {
                debug!("duplicate reduction hit its safety cap");
                break;
            }
            cap -= 1;
        }
        debug!(
            rounds = stats.rounds,
            removed = stats.nodes_removed,
            "duplicate reduction finished"
        );
        stats
    }

    /// Collapse a group of duplicate nodes into the numerically smallest
    /// id: union the children onto the survivor, delete the others, and
    /// rewrite every reference (parents, children, branch targets and
    /// both storage directions).
    pub(crate) fn reduce_to_one(&self, group: &[NodeId]) {
        if group.len() < 2 {
            return;
        }
        let mut sorted = group.to_vec();
        sorted.sort_unstable();
        let survivor = sorted[0];
        let losers = &sorted[1..];
        debug!(?losers, %survivor, "replacing duplicate nodes");

        let mut g = self.inner.lock().unwrap();

        // Carry children over to the survivor, drop the losers.
        for loser in losers {
            let children = g.nodes.remove(loser).map(|n| n.children).unwrap_or_default();
            g.nodes.get_mut(&survivor).unwrap().children.extend(children);
        }

        // Rewrite every occurrence of a loser id.
        for node in g.nodes.values_mut() {
            for loser in losers {
                for parent in &mut node.parents {
                    if parent == loser {
                        *parent = survivor;
                    }
                }
                if node.children.remove(loser) {
                    node.children.insert(survivor);
                }
                if node.branch_true == Some(*loser) {
                    node.branch_true = Some(survivor);
                }
                if node.branch_false == Some(*loser) {
                    node.branch_false = Some(survivor);
                }
                if node.stored_in == Some(*loser) {
                    node.stored_in = Some(survivor);
                }
                if node.used_as_storage_by.remove(loser) {
                    node.used_as_storage_by.insert(survivor);
                }
            }
        }
    }

    /// Ids of all nodes of the given kind, ascending.
    #[must_use]
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let g = self.inner.lock().unwrap();
        g.nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Clone for Graph {
    fn clone(&self) -> Self {
        Graph { inner: Arc::clone(&self.inner) }
    }
}

/// What a [`Graph::canonicalize`] pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReductionStats {
    /// Full passes over the graph, including the final empty one.
    pub rounds: usize,
    /// Nodes merged away in total.
    pub nodes_removed: usize,
}
