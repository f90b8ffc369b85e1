//! The core graph engine for Ripple.
//!
//! Nodes live in a petgraph `StableGraph` arena addressed by `NodeIndex`.
//! Two structures share that arena: the ownership tree (parent/children
//! links stored on the nodes) and the counted dependency multigraph (one
//! `Dependency` record per source, target and kind, stored in petgraph's
//! adjacency lists so both endpoints always see the same record).
//!
//! Every mutation refuses to run once the graph is locked.

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

use super::types::*;

/// Internal-consistency failures of a [`CodeGraph`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// The graph is locked and can no longer change.
    #[error("graph is locked")]
    Locked,

    /// The index does not name a live node of this graph.
    #[error("node {0:?} does not belong to this graph")]
    UnknownNode(NodeIndex),

    /// The operation would make a node its own ancestor.
    #[error("moving node {node} onto {target} would create a cycle")]
    Cycle { node: NodeId, target: NodeId },

    /// A node already has an owning parent.
    #[error("node {0} already has a parent")]
    AlreadyOwned(NodeId),

    /// The root cannot be moved, detached or removed.
    #[error("the root node cannot be {0}")]
    RootMutation(&'static str),

    /// `verify` found a broken invariant.
    #[error("inconsistent graph: {0}")]
    Inconsistent(String),
}

type GraphResult<T> = std::result::Result<T, GraphError>;

/// The code graph of one version: a single-rooted ownership tree plus a
/// counted dependency multigraph over the same nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeGraph {
    graph: StableDiGraph<NodeData, Dependency>,
    root: NodeIndex,
    locked: bool,
}

impl CodeGraph {
    /// Create a graph holding only its root node.
    pub fn new(root_id: NodeId) -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(NodeData::new(root_id, NodeKind::Root, "", "", ""));
        Self {
            graph,
            root,
            locked: false,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Freeze the graph. All later mutations fail with [`GraphError::Locked`].
    pub fn lock(&mut self) {
        if !self.locked {
            debug!(
                nodes = self.graph.node_count(),
                edges = self.graph.edge_count(),
                "locking graph"
            );
            self.locked = true;
        }
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&NodeData> {
        self.graph.node_weight(idx)
    }

    /// Like [`CodeGraph::node`], but a missing node is an error.
    pub fn get(&self, idx: NodeIndex) -> GraphResult<&NodeData> {
        self.graph
            .node_weight(idx)
            .ok_or(GraphError::UnknownNode(idx))
    }

    /// Mutable access to a node's attributes. Tree links stay crate-private.
    pub fn node_mut(&mut self, idx: NodeIndex) -> GraphResult<&mut NodeData> {
        self.ensure_unlocked()?;
        self.graph
            .node_weight_mut(idx)
            .ok_or(GraphError::UnknownNode(idx))
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct dependency records (not the sum of counts).
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    // ─── Tree Operations ────────────────────────────────────────

    /// Add a node, optionally owned by `parent`. Returns its index.
    pub fn add_node(&mut self, data: NodeData, parent: Option<NodeIndex>) -> GraphResult<NodeIndex> {
        self.ensure_unlocked()?;
        if let Some(parent) = parent {
            self.get(parent)?;
        }
        let mut data = data;
        data.parent = None;
        data.children.clear();
        let idx = self.graph.add_node(data);
        if let Some(parent) = parent {
            self.attach(parent, idx)?;
        }
        Ok(idx)
    }

    /// Make `child` the last child of `parent`.
    pub fn attach(&mut self, parent: NodeIndex, child: NodeIndex) -> GraphResult<()> {
        self.ensure_unlocked()?;
        self.get(parent)?;
        let child_data = self.get(child)?;
        if child == self.root {
            return Err(GraphError::RootMutation("attached"));
        }
        if child_data.parent.is_some() {
            return Err(GraphError::AlreadyOwned(child_data.id));
        }
        if self.is_in_subtree(parent, child) {
            return Err(GraphError::Cycle {
                node: child_data.id,
                target: self.graph[parent].id,
            });
        }
        self.graph[child].parent = Some(parent);
        self.graph[parent].children.push(child);
        Ok(())
    }

    /// Remove `child` from its parent's children. A no-op for detached nodes.
    pub fn detach(&mut self, child: NodeIndex) -> GraphResult<()> {
        self.ensure_unlocked()?;
        self.get(child)?;
        if child == self.root {
            return Err(GraphError::RootMutation("detached"));
        }
        if let Some(parent) = self.graph[child].parent.take() {
            self.graph[parent].children.retain(|c| *c != child);
        }
        Ok(())
    }

    /// True if `node` is `ancestor` or lies below it in the ownership tree.
    pub fn is_in_subtree(&self, node: NodeIndex, ancestor: NodeIndex) -> bool {
        let mut current = Some(node);
        while let Some(idx) = current {
            if idx == ancestor {
                return true;
            }
            current = self.graph.node_weight(idx).and_then(|n| n.parent);
        }
        false
    }

    /// `node` and all of its descendants, pre-order.
    pub fn subtree(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(idx) = stack.pop() {
            if let Some(data) = self.graph.node_weight(idx) {
                out.push(idx);
                stack.extend(data.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every node positioned in the ownership tree, pre-order from the root.
    pub fn walk_tree(&self) -> Vec<NodeIndex> {
        self.subtree(self.root)
    }

    /// Delete `node` and everything it owns, with their dependency edges.
    /// Type, base and parameter slots that pointed into the subtree are cleared.
    pub fn remove_subtree(&mut self, node: NodeIndex) -> GraphResult<usize> {
        self.ensure_unlocked()?;
        self.get(node)?;
        if node == self.root {
            return Err(GraphError::RootMutation("removed"));
        }
        self.detach(node)?;
        let doomed = self.subtree(node);
        let doomed_set: HashSet<NodeIndex> = doomed.iter().copied().collect();
        for idx in &doomed {
            self.graph.remove_node(*idx);
        }
        let survivors: Vec<NodeIndex> = self.graph.node_indices().collect();
        for idx in survivors {
            let data = &mut self.graph[idx];
            for gone in &doomed_set {
                data.forget(*gone);
            }
        }
        Ok(doomed.len())
    }

    /// Point every type, base and parameter slot that names `old` at `new`.
    /// Returns how many nodes changed.
    pub fn redirect_references(&mut self, old: NodeIndex, new: NodeIndex) -> GraphResult<usize> {
        self.ensure_unlocked()?;
        self.get(old)?;
        self.get(new)?;
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut changed = 0;
        for idx in indices {
            if self.graph[idx].redirect(old, new) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Move `node`'s children and all of its dependency edges onto `target`.
    ///
    /// Fails if `target` lies inside `node`'s subtree or is not a node of
    /// this graph. `node` itself is left childless and edgeless.
    pub fn transfer(&mut self, node: NodeIndex, target: NodeIndex) -> GraphResult<()> {
        self.ensure_unlocked()?;
        let node_id = self.get(node)?.id;
        let target_id = self.get(target)?.id;
        if self.is_in_subtree(target, node) {
            return Err(GraphError::Cycle {
                node: node_id,
                target: target_id,
            });
        }

        let children = std::mem::take(&mut self.graph[node].children);
        for child in &children {
            self.graph[*child].parent = Some(target);
        }
        self.graph[target].children.extend(children);

        let outgoing: Vec<(NodeIndex, Dependency)> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        let incoming: Vec<(NodeIndex, Dependency)> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| e.source() != node)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        self.clear_dependencies(node)?;

        let swap = |idx: NodeIndex| if idx == node { target } else { idx };
        for (to, dep) in outgoing {
            self.apply_edge_delta(target, swap(to), dep.kind, i64::from(dep.count))?;
        }
        for (from, dep) in incoming {
            self.apply_edge_delta(from, target, dep.kind, i64::from(dep.count))?;
        }
        debug!(from = %node_id, to = %target_id, "transferred node contents");
        Ok(())
    }

    // ─── Dependency Operations ──────────────────────────────────

    /// Record one more `kind` dependency from `from` to `to`.
    pub fn add_dependency(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: DependencyKind,
    ) -> GraphResult<u32> {
        self.apply_edge_delta(from, to, kind, 1)
    }

    /// Record `count` more `kind` dependencies from `from` to `to`.
    pub fn add_dependency_count(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: DependencyKind,
        count: u32,
    ) -> GraphResult<u32> {
        self.apply_edge_delta(from, to, kind, i64::from(count))
    }

    /// Remove one occurrence. Returns false if there was nothing to remove.
    pub fn remove_dependency(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: DependencyKind,
    ) -> GraphResult<bool> {
        let before = self.dependency_count(from, to, kind);
        self.apply_edge_delta(from, to, kind, -1)?;
        Ok(before > 0)
    }

    /// Remove the whole `kind` record between `from` and `to`.
    pub fn remove_all_dependency(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: DependencyKind,
    ) -> GraphResult<bool> {
        let before = self.dependency_count(from, to, kind);
        self.apply_edge_delta(from, to, kind, -i64::from(before))?;
        Ok(before > 0)
    }

    /// Remove every dependency record touching `node`, in either direction.
    pub fn clear_dependencies(&mut self, node: NodeIndex) -> GraphResult<()> {
        self.ensure_unlocked()?;
        self.get(node)?;
        let edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming))
            .map(|e| e.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
        Ok(())
    }

    pub fn dependency_count(&self, from: NodeIndex, to: NodeIndex, kind: DependencyKind) -> u32 {
        self.find_edge(from, to, kind)
            .and_then(|e| self.graph.edge_weight(e))
            .map(|d| d.count)
            .unwrap_or(0)
    }

    /// Outgoing dependency records of `node`: what it depends on.
    pub fn dependencies(&self, node: NodeIndex) -> Vec<(NodeIndex, Dependency)> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect()
    }

    /// Incoming dependency records of `node`: what depends on it.
    pub fn dependents(&self, node: NodeIndex) -> Vec<(NodeIndex, Dependency)> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect()
    }

    /// The single path through which dependency records change.
    ///
    /// Adds `delta` to the (from, to, kind) count, creating the record when
    /// it rises above zero and deleting it when it reaches zero.
    fn apply_edge_delta(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: DependencyKind,
        delta: i64,
    ) -> GraphResult<u32> {
        self.ensure_unlocked()?;
        self.get(from)?;
        self.get(to)?;
        match self.find_edge(from, to, kind) {
            Some(edge) => {
                let current = i64::from(self.graph[edge].count);
                let next = (current + delta).max(0);
                if next == 0 {
                    self.graph.remove_edge(edge);
                    Ok(0)
                } else {
                    let next = u32::try_from(next).unwrap_or(u32::MAX);
                    self.graph[edge].count = next;
                    Ok(next)
                }
            }
            None if delta > 0 => {
                let count = u32::try_from(delta).unwrap_or(u32::MAX);
                self.graph.add_edge(from, to, Dependency { kind, count });
                Ok(count)
            }
            None => Ok(0),
        }
    }

    fn find_edge(&self, from: NodeIndex, to: NodeIndex, kind: DependencyKind) -> Option<EdgeIndex> {
        if !self.graph.contains_node(from) {
            return None;
        }
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.target() == to && e.weight().kind == kind)
            .map(|e| e.id())
    }

    // ─── Weights ────────────────────────────────────────────────

    /// Sum over outgoing records of `weight(kind) * count`.
    pub fn direct_weight(&self, node: NodeIndex, table: &WeightTable) -> f64 {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| table.weight(e.weight().kind) * f64::from(e.weight().count))
            .sum()
    }

    /// Store every node's direct weight on the node.
    pub fn compute_weights(&mut self, table: &WeightTable) -> GraphResult<()> {
        self.ensure_unlocked()?;
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for idx in indices {
            let weight = self.direct_weight(idx, table);
            self.graph[idx].weight = weight;
        }
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────

    /// Nodes with the given unique name, in creation order.
    pub fn find_by_unique_name(&self, unique_name: &str) -> Vec<NodeIndex> {
        let mut found: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| self.graph[*idx].unique_name == unique_name)
            .collect();
        found.sort_by_key(|idx| self.graph[*idx].id);
        found
    }

    /// Nodes of `kind`, in creation order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeIndex> {
        let mut found: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| self.graph[*idx].kind == kind)
            .collect();
        found.sort_by_key(|idx| self.graph[*idx].id);
        found
    }

    /// Non-root nodes without a position in the ownership tree, in creation order.
    pub fn detached_nodes(&self) -> Vec<NodeIndex> {
        let mut found: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| *idx != self.root && self.graph[*idx].parent.is_none())
            .collect();
        found.sort_by_key(|idx| self.graph[*idx].id);
        found
    }

    /// Get graph statistics.
    pub fn stats(&self) -> GraphStats {
        let mut per_kind = BTreeMap::new();
        for idx in self.graph.node_indices() {
            *per_kind.entry(self.graph[idx].kind).or_insert(0) += 1;
        }
        GraphStats {
            total_nodes: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            total_dependencies: self
                .graph
                .edge_indices()
                .map(|e| self.graph[e].count as usize)
                .sum(),
            per_kind,
            locked: self.locked,
        }
    }

    // ─── Invariants ─────────────────────────────────────────────

    /// Check the tree, reference and dependency invariants.
    pub fn verify(&self) -> GraphResult<()> {
        let fail = |msg: String| Err(GraphError::Inconsistent(msg));
        if self.graph[self.root].parent.is_some() {
            return fail("root has a parent".into());
        }
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            match node.parent {
                Some(parent) => {
                    let Some(parent_data) = self.graph.node_weight(parent) else {
                        return fail(format!("node {} has a dangling parent", node.id));
                    };
                    if parent_data.children.iter().filter(|c| **c == idx).count() != 1 {
                        return fail(format!("node {} is not listed once by its parent", node.id));
                    }
                }
                None if idx != self.root && !node.kind.is_detached() => {
                    return fail(format!("{} node {} has no parent", node.kind, node.id));
                }
                None => {}
            }
            for child in &node.children {
                if self.graph.node_weight(*child).and_then(|c| c.parent) != Some(idx) {
                    return fail(format!("child of {} does not point back", node.id));
                }
            }
            let referenced = node
                .type_ref
                .iter()
                .chain(node.bases())
                .chain(node.params());
            for target in referenced {
                if !self.graph.contains_node(*target) {
                    return fail(format!("node {} references a foreign node", node.id));
                }
            }
            if self.locked && node.kind == NodeKind::Unknown {
                return fail(format!("unresolved placeholder '{}' in locked graph", node.name));
            }

            let mut seen = HashSet::new();
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let dep = edge.weight();
                if dep.count == 0 {
                    return fail(format!("zero-count {} edge from {}", dep.kind, node.id));
                }
                if !seen.insert((edge.target(), dep.kind)) {
                    return fail(format!("duplicate {} edge from {}", dep.kind, node.id));
                }
                let mirrored = self
                    .graph
                    .edges_directed(edge.target(), Direction::Incoming)
                    .any(|back| back.id() == edge.id() && back.weight().count == dep.count);
                if !mirrored {
                    return fail(format!("{} edge from {} is not mirrored", dep.kind, node.id));
                }
            }
        }
        Ok(())
    }

    fn ensure_unlocked(&self) -> GraphResult<()> {
        if self.locked {
            Err(GraphError::Locked)
        } else {
            Ok(())
        }
    }
}

/// Statistics about the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    /// Distinct dependency records.
    pub total_edges: usize,
    /// Sum of dependency counts.
    pub total_dependencies: usize,
    pub per_kind: BTreeMap<NodeKind, usize>,
    pub locked: bool,
}
