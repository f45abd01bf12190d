//! The mutable attributed-graph store.
//!
//! An [`AttributedGraph`] is a directed graph with stable string node
//! identifiers, at most one edge per ordered node pair (self-loops allowed),
//! and a set-valued attribute table on every node and edge. All mutators work
//! in place; copying a graph is an explicit deep clone.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use thiserror::Error;

use crate::attrs::{Attributes, attrs_difference, attrs_intersect, attrs_union};
use crate::core::NodeId;

/// Errors from [`AttributedGraph`] mutations. Always local and recoverable
/// by the caller.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// Tried to add a node with an identifier already in use.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    /// Referenced a node absent from the graph.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// Tried to add an edge that already exists.
    #[error("edge {0} -> {1} already exists")]
    DuplicateEdge(NodeId, NodeId),
    /// Referenced an edge absent from the graph.
    #[error("edge {0} -> {1} not found")]
    EdgeNotFound(NodeId, NodeId),
    /// The requested merge target collides with a node outside the merge set.
    #[error("cannot merge into {0}: a different node with that id exists")]
    InvalidMergeName(NodeId),
    /// A merge needs at least two nodes.
    #[error("merge requires at least two nodes, got {0}")]
    EmptyMerge(usize),
}

/// How to combine the attributes of merged nodes or collapsed parallel edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Key-wise union of the attribute tables.
    #[default]
    Union,
    /// Key-wise intersection of the attribute tables.
    Intersect,
}

impl MergePolicy {
    fn combine(self, a: &Attributes, b: &Attributes) -> Attributes {
        match self {
            MergePolicy::Union => attrs_union(a, b),
            MergePolicy::Intersect => attrs_intersect(a, b),
        }
    }
}

/// A directed graph with set-valued attributes on nodes and edges.
#[derive(Clone, Debug, Default)]
pub struct AttributedGraph {
    nodes: IndexMap<NodeId, Attributes>,
    /// Out-adjacency with edge attributes. Every key is a node of `nodes`.
    succs: IndexMap<NodeId, IndexMap<NodeId, Attributes>>,
    /// In-adjacency index, kept in sync with `succs`.
    preds: IndexMap<NodeId, IndexSet<NodeId>>,
}

impl PartialEq for AttributedGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.succs == other.succs
    }
}

impl Eq for AttributedGraph {}

impl AttributedGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from node and edge lists.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = (NodeId, Attributes)>,
        edges: impl IntoIterator<Item = (NodeId, NodeId, Attributes)>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for (id, attrs) in nodes {
            graph.add_node(id, attrs)?;
        }
        for (s, t, attrs) in edges {
            graph.add_edge(s, t, attrs)?;
        }
        Ok(graph)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.succs.values().map(IndexMap::len).sum()
    }

    /// Iterate over the node identifiers, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    /// Iterate over the edges as `(source, target, attributes)`.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &Attributes)> + '_ {
        self.succs
            .iter()
            .flat_map(|(s, out)| out.iter().map(move |(t, attrs)| (s, t, attrs)))
    }

    /// Whether `id` is a node of the graph.
    #[must_use]
    pub fn has_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether the edge `source -> target` exists.
    #[must_use]
    pub fn has_edge(&self, source: &NodeId, target: &NodeId) -> bool {
        self.succs
            .get(source)
            .is_some_and(|out| out.contains_key(target))
    }

    /// The attribute table of a node.
    pub fn node_attrs(&self, id: &NodeId) -> Result<&Attributes, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    /// The attribute table of an edge.
    pub fn edge_attrs(&self, source: &NodeId, target: &NodeId) -> Result<&Attributes, GraphError> {
        self.succs
            .get(source)
            .and_then(|out| out.get(target))
            .ok_or_else(|| GraphError::EdgeNotFound(source.clone(), target.clone()))
    }

    /// The out-neighbours of a node.
    pub fn successors(&self, id: &NodeId) -> Result<impl Iterator<Item = &NodeId> + '_, GraphError> {
        self.succs
            .get(id)
            .map(IndexMap::keys)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    /// The in-neighbours of a node.
    pub fn predecessors(
        &self,
        id: &NodeId,
    ) -> Result<impl Iterator<Item = &NodeId> + '_, GraphError> {
        self.preds
            .get(id)
            .map(IndexSet::iter)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    /// Add a node with the given attributes.
    pub fn add_node(&mut self, id: NodeId, attrs: Attributes) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.succs.insert(id.clone(), IndexMap::new());
        self.preds.insert(id.clone(), IndexSet::new());
        self.nodes.insert(id, attrs);
        Ok(())
    }

    /// Remove a node together with all its incident edges.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::NodeNotFound(id.clone()));
        }
        let out: Vec<NodeId> = self.succs[id].keys().cloned().collect();
        for t in out {
            self.preds[&t].shift_remove(id);
        }
        let incoming: Vec<NodeId> = self.preds[id].iter().cloned().collect();
        for s in incoming {
            self.succs[&s].shift_remove(id);
        }
        self.succs.shift_remove(id);
        self.preds.shift_remove(id);
        self.nodes.shift_remove(id);
        Ok(())
    }

    /// Add the edge `source -> target` with the given attributes.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        attrs: Attributes,
    ) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&source) {
            return Err(GraphError::NodeNotFound(source));
        }
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::NodeNotFound(target));
        }
        if self.has_edge(&source, &target) {
            return Err(GraphError::DuplicateEdge(source, target));
        }
        self.preds[&target].insert(source.clone());
        self.succs[&source].insert(target, attrs);
        Ok(())
    }

    /// Remove the edge `source -> target`.
    pub fn remove_edge(&mut self, source: &NodeId, target: &NodeId) -> Result<(), GraphError> {
        let removed = self
            .succs
            .get_mut(source)
            .and_then(|out| out.shift_remove(target));
        if removed.is_none() {
            return Err(GraphError::EdgeNotFound(source.clone(), target.clone()));
        }
        self.preds[target].shift_remove(source);
        Ok(())
    }

    /// The shortest identifier of the form `"{base}{i}"` (for `i = 1, 2, …`)
    /// not yet used by a node.
    #[must_use]
    pub fn fresh_node_id(&self, base: &NodeId) -> NodeId {
        (1u64..)
            .map(|i| NodeId::new(format!("{base}{i}")))
            .find(|candidate| !self.nodes.contains_key(candidate))
            .expect("an unused identifier exists")
    }

    /// Duplicate a node: the clone carries the same attributes and copies of
    /// all incident edges (a self-loop becomes a self-loop on the clone). With
    /// no `new_id` given, a fresh identifier is generated from the original.
    ///
    /// Returns the clone's identifier.
    pub fn clone_node(
        &mut self,
        id: &NodeId,
        new_id: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        let attrs = self.node_attrs(id)?.clone();
        let clone_id = match new_id {
            Some(n) => {
                if self.nodes.contains_key(&n) {
                    return Err(GraphError::DuplicateNode(n));
                }
                n
            }
            None => self.fresh_node_id(id),
        };
        self.add_node(clone_id.clone(), attrs)?;
        let out: Vec<(NodeId, Attributes)> = self.succs[id]
            .iter()
            .map(|(t, a)| (t.clone(), a.clone()))
            .collect();
        for (t, a) in out {
            let t = if &t == id { clone_id.clone() } else { t };
            self.add_edge(clone_id.clone(), t, a)?;
        }
        let incoming: Vec<NodeId> = self.preds[id]
            .iter()
            .filter(|s| *s != id)
            .cloned()
            .collect();
        for s in incoming {
            let a = self.edge_attrs(&s, id)?.clone();
            self.add_edge(s, clone_id.clone(), a)?;
        }
        Ok(clone_id)
    }

    /// Fold several nodes into one.
    ///
    /// Attribute tables combine per `node_policy`; every incident edge is
    /// re-pointed at the merged node, parallel edges collapsing per
    /// `edge_policy` and edges between merged nodes becoming a single
    /// self-loop. With no `new_id` given, the merged node is named by joining
    /// the merged identifiers with `_` (made fresh if taken). An explicit
    /// `new_id` colliding with a node *outside* the merge set is rejected.
    ///
    /// Returns the merged node's identifier.
    pub fn merge_nodes(
        &mut self,
        ids: &[NodeId],
        new_id: Option<NodeId>,
        node_policy: MergePolicy,
        edge_policy: MergePolicy,
    ) -> Result<NodeId, GraphError> {
        let merge_set: IndexSet<&NodeId> = ids.iter().collect();
        if merge_set.len() < 2 {
            return Err(GraphError::EmptyMerge(merge_set.len()));
        }
        for id in &merge_set {
            if !self.nodes.contains_key(*id) {
                return Err(GraphError::NodeNotFound((*id).clone()));
            }
        }
        let merged_id = match new_id {
            Some(n) => {
                if self.nodes.contains_key(&n) && !merge_set.contains(&n) {
                    return Err(GraphError::InvalidMergeName(n));
                }
                n
            }
            None => {
                let joined = NodeId::new(merge_set.iter().join("_"));
                if self.nodes.contains_key(&joined) && !merge_set.contains(&joined) {
                    self.fresh_node_id(&joined)
                } else {
                    joined
                }
            }
        };

        let merged_attrs = merge_set
            .iter()
            .map(|id| self.nodes[*id].clone())
            .reduce(|a, b| node_policy.combine(&a, &b))
            .expect("merge set is non-empty");

        // Re-pointed incident edges, with parallel edges collapsed.
        let redirect = |n: &NodeId| -> NodeId {
            if merge_set.contains(n) {
                merged_id.clone()
            } else {
                n.clone()
            }
        };
        let mut moved: IndexMap<(NodeId, NodeId), Attributes> = IndexMap::new();
        for (s, t, attrs) in self.edges() {
            if !merge_set.contains(s) && !merge_set.contains(t) {
                continue;
            }
            let key = (redirect(s), redirect(t));
            match moved.get_mut(&key) {
                Some(existing) => *existing = edge_policy.combine(existing, attrs),
                None => {
                    moved.insert(key, attrs.clone());
                }
            }
        }

        for id in merge_set {
            self.remove_node(&id.clone())?;
        }
        self.add_node(merged_id.clone(), merged_attrs)?;
        for ((s, t), attrs) in moved {
            self.add_edge(s, t, attrs)?;
        }
        Ok(merged_id)
    }

    /// Rename a node, keeping its attributes and edges.
    pub fn relabel_node(&mut self, old: &NodeId, new: NodeId) -> Result<(), GraphError> {
        if old == &new {
            return Ok(());
        }
        if !self.nodes.contains_key(old) {
            return Err(GraphError::NodeNotFound(old.clone()));
        }
        if self.nodes.contains_key(&new) {
            return Err(GraphError::DuplicateNode(new));
        }
        let attrs = self.nodes.shift_remove(old).expect("checked above");
        let out = self.succs.shift_remove(old).expect("in sync with nodes");
        let incoming = self.preds.shift_remove(old).expect("in sync with nodes");
        self.nodes.insert(new.clone(), attrs);
        self.succs.insert(new.clone(), IndexMap::new());
        self.preds.insert(new.clone(), IndexSet::new());
        for (t, a) in out {
            let t = if &t == old { new.clone() } else { t };
            self.preds[&t].insert(new.clone());
            self.succs[&new].insert(t, a);
        }
        for s in incoming {
            if &s == old {
                continue;
            }
            let a = self.succs[&s].shift_remove(old).expect("preds in sync");
            self.succs[&s].insert(new.clone(), a);
            self.preds[&new].insert(s);
        }
        Ok(())
    }

    /// The subgraph induced by a node subset. Nodes absent from the graph are
    /// ignored.
    #[must_use]
    pub fn subgraph<'a>(&self, keep: impl IntoIterator<Item = &'a NodeId>) -> AttributedGraph {
        let keep: IndexSet<&NodeId> = keep.into_iter().filter(|n| self.has_node(n)).collect();
        let mut sub = AttributedGraph::new();
        for id in &keep {
            sub.add_node((*id).clone(), self.nodes[*id].clone())
                .expect("fresh graph has no duplicates");
        }
        for (s, t, attrs) in self.edges() {
            if keep.contains(s) && keep.contains(t) {
                sub.add_edge(s.clone(), t.clone(), attrs.clone())
                    .expect("endpoints were just added");
            }
        }
        sub
    }

    /// Union the given attributes into a node's table.
    pub fn add_node_attrs(&mut self, id: &NodeId, attrs: &Attributes) -> Result<(), GraphError> {
        let existing = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        *existing = attrs_union(existing, attrs);
        Ok(())
    }

    /// Subtract the given attributes from a node's table.
    pub fn remove_node_attrs(
        &mut self,
        id: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), GraphError> {
        let existing = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        *existing = attrs_difference(existing, attrs);
        Ok(())
    }

    /// Replace a node's attribute table.
    pub fn set_node_attrs(&mut self, id: &NodeId, attrs: Attributes) -> Result<(), GraphError> {
        let existing = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        *existing = attrs;
        Ok(())
    }

    /// Union the given attributes into an edge's table.
    pub fn add_edge_attrs(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), GraphError> {
        let existing = self
            .succs
            .get_mut(source)
            .and_then(|out| out.get_mut(target))
            .ok_or_else(|| GraphError::EdgeNotFound(source.clone(), target.clone()))?;
        *existing = attrs_union(existing, attrs);
        Ok(())
    }

    /// Subtract the given attributes from an edge's table.
    pub fn remove_edge_attrs(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), GraphError> {
        let existing = self
            .succs
            .get_mut(source)
            .and_then(|out| out.get_mut(target))
            .ok_or_else(|| GraphError::EdgeNotFound(source.clone(), target.clone()))?;
        *existing = attrs_difference(existing, attrs);
        Ok(())
    }

    /// Replace an edge's attribute table.
    pub fn set_edge_attrs(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        attrs: Attributes,
    ) -> Result<(), GraphError> {
        let existing = self
            .succs
            .get_mut(source)
            .and_then(|out| out.get_mut(target))
            .ok_or_else(|| GraphError::EdgeNotFound(source.clone(), target.clone()))?;
        *existing = attrs;
        Ok(())
    }
}
