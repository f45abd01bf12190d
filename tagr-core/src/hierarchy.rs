//! Hierarchies of typed graphs.
//!
//! A [`Hierarchy`] is a directed acyclic multilevel structure: its nodes
//! carry attributed graphs or rewriting rules, its edges carry typing
//! homomorphisms (graph sources) or rule typings (rule sources). The global
//! invariant is *path commutativity*: composing the typings along any two
//! paths between the same pair of nodes yields the same map. Every addition
//! is checked against cycles and commutativity before any mutation, so a
//! rejected addition leaves the hierarchy untouched.

pub mod rewrite;

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use thiserror::Error;

use crate::attrs::Attributes;
use crate::core::{GraphId, NodeId};
use crate::graph::AttributedGraph;
use crate::homomorphism::{InvalidHomomorphism, NodeMap, check_homomorphism, compose};
use crate::rule::Rule;

pub use rewrite::{PTyping, RewriteReport, RhsTyping};

/// Errors from hierarchy construction and queries. All raised before any
/// mutation of the hierarchy.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum HierarchyError {
    /// A hierarchy node with this identifier already exists.
    #[error("hierarchy node {0} already exists")]
    DuplicateNode(GraphId),
    /// No hierarchy node with this identifier.
    #[error("hierarchy node {0} not found")]
    NodeNotFound(GraphId),
    /// The operation needs a graph node but found a rule.
    #[error("hierarchy node {0} is not a graph")]
    NotAGraph(GraphId),
    /// The operation needs a rule node but found a graph.
    #[error("hierarchy node {0} is not a rule")]
    NotARule(GraphId),
    /// A typing between these two nodes already exists.
    #[error("typing {0} -> {1} already exists")]
    DuplicateTyping(GraphId, GraphId),
    /// No typing between these two nodes.
    #[error("typing {0} -> {1} not found")]
    TypingNotFound(GraphId, GraphId),
    /// The addition would create a directed cycle.
    #[error("typing {0} -> {1} would create a cycle")]
    CycleCreation(GraphId, GraphId),
    /// The addition would make two typing paths disagree.
    #[error("typing {from} -> {to} breaks commutativity between {path_source} and {path_target}")]
    NonCommutingPaths {
        /// Source of the offending new edge.
        from: GraphId,
        /// Target of the offending new edge.
        to: GraphId,
        /// Pair of nodes whose path compositions disagree.
        path_source: GraphId,
        /// Pair of nodes whose path compositions disagree.
        path_target: GraphId,
    },
    /// A typing mapping is not a valid homomorphism.
    #[error(transparent)]
    Homomorphism(#[from] InvalidHomomorphism),
    /// A relation between these two graphs already exists.
    #[error("relation {0} <-> {1} already exists")]
    DuplicateRelation(GraphId, GraphId),
    /// No relation between these two graphs.
    #[error("relation {0} <-> {1} not found")]
    RelationNotFound(GraphId, GraphId),
    /// A referenced node is absent from the named graph.
    #[error("graph {graph} has no node {node}")]
    UnknownGraphNode {
        /// The graph missing the node.
        graph: GraphId,
        /// The missing node.
        node: NodeId,
    },
    /// No typing path between the two nodes.
    #[error("no typing path from {0} to {1}")]
    NoPath(GraphId, GraphId),
    /// A path composition was requested over an empty path.
    #[error("cannot compose typings along an empty path")]
    EmptyPath,
}

/// Payload of a hierarchy node: a graph or a rule, with free-form attributes.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyNode {
    /// An attributed graph.
    Graph {
        /// The graph.
        graph: AttributedGraph,
        /// Node-level attributes.
        attrs: Attributes,
    },
    /// A rewriting rule.
    Rule {
        /// The rule.
        rule: Rule,
        /// Node-level attributes.
        attrs: Attributes,
    },
}

impl HierarchyNode {
    /// The graph payload, if this is a graph node.
    #[must_use]
    pub fn as_graph(&self) -> Option<&AttributedGraph> {
        match self {
            HierarchyNode::Graph { graph, .. } => Some(graph),
            HierarchyNode::Rule { .. } => None,
        }
    }

    /// The rule payload, if this is a rule node.
    #[must_use]
    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            HierarchyNode::Rule { rule, .. } => Some(rule),
            HierarchyNode::Graph { .. } => None,
        }
    }
}

/// Payload of a hierarchy edge: a typing homomorphism or a rule typing.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyEdge {
    /// A typing of a graph node by another graph node.
    Typing {
        /// The node mapping, source graph to target graph.
        mapping: NodeMap,
        /// Whether the mapping covers every source node.
        total: bool,
        /// Edge-level attributes.
        attrs: Attributes,
    },
    /// A typing of a rule node by a graph node: one mapping per side of the
    /// span.
    RuleTyping {
        /// Typing of the rule's lhs.
        lhs_mapping: NodeMap,
        /// Typing of the rule's rhs.
        rhs_mapping: NodeMap,
        /// Whether the lhs mapping is total.
        lhs_total: bool,
        /// Whether the rhs mapping is total.
        rhs_total: bool,
        /// Edge-level attributes.
        attrs: Attributes,
    },
}

/// A symmetric many-to-many correspondence between the nodes of two graphs.
/// Not a homomorphism: no edge-preservation requirement.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Relation {
    /// Correspondence, keyed by left-graph node.
    pub rel: IndexMap<NodeId, IndexSet<NodeId>>,
    /// Relation-level attributes.
    pub attrs: Attributes,
}

/// A DAG of graphs and rules connected by typings, with the path
/// commutativity invariant.
#[derive(Clone, Debug, Default)]
pub struct Hierarchy {
    /// Skeleton used for cycle checks and traversal orders.
    skeleton: StableDiGraph<GraphId, ()>,
    indices: IndexMap<GraphId, NodeIndex>,
    nodes: IndexMap<GraphId, HierarchyNode>,
    edges: IndexMap<(GraphId, GraphId), HierarchyEdge>,
    /// Relations, keyed by the pair in insertion orientation.
    relations: IndexMap<(GraphId, GraphId), Relation>,
}

impl PartialEq for Hierarchy {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.edges == other.edges
            && self.relations == other.relations
    }
}

impl Hierarchy {
    /// An empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the hierarchy node identifiers, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &GraphId> + '_ {
        self.nodes.keys()
    }

    /// Iterate over the graph nodes.
    pub fn graphs(&self) -> impl Iterator<Item = (&GraphId, &AttributedGraph)> + '_ {
        self.nodes
            .iter()
            .filter_map(|(id, n)| n.as_graph().map(|g| (id, g)))
    }

    /// Iterate over the rule nodes.
    pub fn rules(&self) -> impl Iterator<Item = (&GraphId, &Rule)> + '_ {
        self.nodes
            .iter()
            .filter_map(|(id, n)| n.as_rule().map(|r| (id, r)))
    }

    /// Iterate over all typing edges as `(from, to, edge)`.
    pub fn typings(&self) -> impl Iterator<Item = (&GraphId, &GraphId, &HierarchyEdge)> + '_ {
        self.edges.iter().map(|((f, t), e)| (f, t, e))
    }

    /// Iterate over the relations as `(left, right, relation)`.
    pub fn relations(&self) -> impl Iterator<Item = (&GraphId, &GraphId, &Relation)> + '_ {
        self.relations.iter().map(|((l, r), rel)| (l, r, rel))
    }

    /// The payload of a hierarchy node.
    pub fn node(&self, id: &GraphId) -> Result<&HierarchyNode, HierarchyError> {
        self.nodes
            .get(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.clone()))
    }

    /// The graph at a hierarchy node.
    pub fn graph(&self, id: &GraphId) -> Result<&AttributedGraph, HierarchyError> {
        self.node(id)?
            .as_graph()
            .ok_or_else(|| HierarchyError::NotAGraph(id.clone()))
    }

    /// The rule at a hierarchy node.
    pub fn rule(&self, id: &GraphId) -> Result<&Rule, HierarchyError> {
        self.node(id)?
            .as_rule()
            .ok_or_else(|| HierarchyError::NotARule(id.clone()))
    }

    /// The typing edge between two nodes.
    pub fn typing(&self, from: &GraphId, to: &GraphId) -> Result<&HierarchyEdge, HierarchyError> {
        self.edges
            .get(&(from.clone(), to.clone()))
            .ok_or_else(|| HierarchyError::TypingNotFound(from.clone(), to.clone()))
    }

    /// The relation between two graphs, oriented from `left` to `right`.
    pub fn relation(
        &self,
        left: &GraphId,
        right: &GraphId,
    ) -> Result<Relation, HierarchyError> {
        if let Some(rel) = self.relations.get(&(left.clone(), right.clone())) {
            return Ok(rel.clone());
        }
        match self.relations.get(&(right.clone(), left.clone())) {
            Some(rel) => Ok(Relation {
                rel: invert_relation(&rel.rel),
                attrs: rel.attrs.clone(),
            }),
            None => Err(HierarchyError::RelationNotFound(left.clone(), right.clone())),
        }
    }

    /// Direct successors (the types) of a node.
    pub fn successors(&self, id: &GraphId) -> Result<Vec<GraphId>, HierarchyError> {
        let ix = self.index(id)?;
        Ok(self
            .skeleton
            .neighbors_directed(ix, Direction::Outgoing)
            .map(|n| self.skeleton[n].clone())
            .collect())
    }

    /// Direct predecessors (the instances, including rule nodes) of a node.
    pub fn predecessors(&self, id: &GraphId) -> Result<Vec<GraphId>, HierarchyError> {
        let ix = self.index(id)?;
        Ok(self
            .skeleton
            .neighbors_directed(ix, Direction::Incoming)
            .map(|n| self.skeleton[n].clone())
            .collect())
    }

    fn index(&self, id: &GraphId) -> Result<NodeIndex, HierarchyError> {
        self.indices
            .get(id)
            .copied()
            .ok_or_else(|| HierarchyError::NodeNotFound(id.clone()))
    }

    /// Add a graph node.
    pub fn add_graph(
        &mut self,
        id: GraphId,
        graph: AttributedGraph,
        attrs: Attributes,
    ) -> Result<(), HierarchyError> {
        if self.nodes.contains_key(&id) {
            return Err(HierarchyError::DuplicateNode(id));
        }
        let ix = self.skeleton.add_node(id.clone());
        self.indices.insert(id.clone(), ix);
        self.nodes.insert(id, HierarchyNode::Graph { graph, attrs });
        Ok(())
    }

    /// Add a rule node.
    pub fn add_rule(
        &mut self,
        id: GraphId,
        rule: Rule,
        attrs: Attributes,
    ) -> Result<(), HierarchyError> {
        if self.nodes.contains_key(&id) {
            return Err(HierarchyError::DuplicateNode(id));
        }
        let ix = self.skeleton.add_node(id.clone());
        self.indices.insert(id.clone(), ix);
        self.nodes.insert(id, HierarchyNode::Rule { rule, attrs });
        Ok(())
    }

    /// Add a typing edge from one graph node to another.
    ///
    /// Checks, in order and before any mutation: both nodes exist and are
    /// graphs, no duplicate edge, the mapping is a valid homomorphism, no
    /// cycle, and no pair of paths becomes non-commuting.
    pub fn add_typing(
        &mut self,
        from: GraphId,
        to: GraphId,
        mapping: NodeMap,
        total: bool,
        attrs: Attributes,
    ) -> Result<(), HierarchyError> {
        let source = self.graph(&from)?;
        let target = self.graph(&to)?;
        if self.edges.contains_key(&(from.clone(), to.clone())) {
            return Err(HierarchyError::DuplicateTyping(from, to));
        }
        check_homomorphism(source, target, &mapping, total)?;
        let (from_ix, to_ix) = (self.index(&from)?, self.index(&to)?);
        if from_ix == to_ix || has_path_connecting(&self.skeleton, to_ix, from_ix, None) {
            return Err(HierarchyError::CycleCreation(from, to));
        }
        self.check_commutativity_with(&from, &to, &mapping)?;

        self.skeleton.add_edge(from_ix, to_ix, ());
        self.edges.insert(
            (from, to),
            HierarchyEdge::Typing {
                mapping,
                total,
                attrs,
            },
        );
        Ok(())
    }

    /// Add a rule typing: the source must be a rule node, the target a graph
    /// node. Both span sides are typed; commutativity is checked on each.
    pub fn add_rule_typing(
        &mut self,
        from: GraphId,
        to: GraphId,
        lhs_mapping: NodeMap,
        rhs_mapping: NodeMap,
        attrs: Attributes,
    ) -> Result<(), HierarchyError> {
        let rule = self.rule(&from)?;
        let target = self.graph(&to)?;
        if self.edges.contains_key(&(from.clone(), to.clone())) {
            return Err(HierarchyError::DuplicateTyping(from, to));
        }
        check_homomorphism(rule.lhs(), target, &lhs_mapping, false)?;
        check_homomorphism(rule.rhs(), target, &rhs_mapping, false)?;
        // The two legs must agree on the preserved part.
        let via_lhs = compose(rule.p_lhs(), &lhs_mapping);
        let via_rhs = compose(rule.p_rhs(), &rhs_mapping);
        for (p_node, image) in &via_lhs {
            if via_rhs.get(p_node).is_some_and(|other| other != image) {
                return Err(HierarchyError::Homomorphism(
                    InvalidHomomorphism::NonCommuting(p_node.clone()),
                ));
            }
        }
        let lhs_total = lhs_mapping.len() == rule.lhs().node_count();
        let rhs_total = rhs_mapping.len() == rule.rhs().node_count();
        let (from_ix, to_ix) = (self.index(&from)?, self.index(&to)?);
        // Rule nodes have no incoming edges, so no cycle can arise; keep the
        // check anyway for uniform diagnostics.
        if has_path_connecting(&self.skeleton, to_ix, from_ix, None) {
            return Err(HierarchyError::CycleCreation(from, to));
        }
        self.check_rule_commutativity_with(&from, &to, &lhs_mapping, &rhs_mapping)?;

        self.skeleton.add_edge(from_ix, to_ix, ());
        self.edges.insert(
            (from, to),
            HierarchyEdge::RuleTyping {
                lhs_mapping,
                rhs_mapping,
                lhs_total,
                rhs_total,
                attrs,
            },
        );
        Ok(())
    }

    /// Add a relation between two graph nodes.
    pub fn add_relation(
        &mut self,
        left: GraphId,
        right: GraphId,
        rel: IndexMap<NodeId, IndexSet<NodeId>>,
        attrs: Attributes,
    ) -> Result<(), HierarchyError> {
        let left_graph = self.graph(&left)?;
        let right_graph = self.graph(&right)?;
        if self.relations.contains_key(&(left.clone(), right.clone()))
            || self.relations.contains_key(&(right.clone(), left.clone()))
        {
            return Err(HierarchyError::DuplicateRelation(left, right));
        }
        for (l_node, r_nodes) in &rel {
            if !left_graph.has_node(l_node) {
                return Err(HierarchyError::UnknownGraphNode {
                    graph: left,
                    node: l_node.clone(),
                });
            }
            for r_node in r_nodes {
                if !right_graph.has_node(r_node) {
                    return Err(HierarchyError::UnknownGraphNode {
                        graph: right,
                        node: r_node.clone(),
                    });
                }
            }
        }
        self.relations.insert((left, right), Relation { rel, attrs });
        Ok(())
    }

    /// Remove a relation.
    pub fn remove_relation(
        &mut self,
        left: &GraphId,
        right: &GraphId,
    ) -> Result<(), HierarchyError> {
        let removed = self
            .relations
            .shift_remove(&(left.clone(), right.clone()))
            .or_else(|| self.relations.shift_remove(&(right.clone(), left.clone())));
        match removed {
            Some(_) => Ok(()),
            None => Err(HierarchyError::RelationNotFound(left.clone(), right.clone())),
        }
    }

    /// Remove a typing edge.
    pub fn remove_typing(&mut self, from: &GraphId, to: &GraphId) -> Result<(), HierarchyError> {
        if self
            .edges
            .shift_remove(&(from.clone(), to.clone()))
            .is_none()
        {
            return Err(HierarchyError::TypingNotFound(from.clone(), to.clone()));
        }
        let (from_ix, to_ix) = (self.index(from)?, self.index(to)?);
        if let Some(edge) = self.skeleton.find_edge(from_ix, to_ix) {
            self.skeleton.remove_edge(edge);
        }
        Ok(())
    }

    /// Remove a hierarchy node. With `reconnect`, typings through the removed
    /// node are first composed into direct edges between its neighbours.
    pub fn remove_node(&mut self, id: &GraphId, reconnect: bool) -> Result<(), HierarchyError> {
        let ix = self.index(id)?;
        if reconnect {
            let preds = self.predecessors(id)?;
            let succs = self.successors(id)?;
            for pred in &preds {
                for succ in &succs {
                    if self.edges.contains_key(&(pred.clone(), succ.clone())) {
                        continue;
                    }
                    let up = self.typing(id, succ)?.clone();
                    let HierarchyEdge::Typing {
                        mapping: up_map,
                        total: up_total,
                        ..
                    } = up
                    else {
                        continue;
                    };
                    match self.typing(pred, id)?.clone() {
                        HierarchyEdge::Typing { mapping, total, .. } => {
                            self.add_typing(
                                pred.clone(),
                                succ.clone(),
                                compose(&mapping, &up_map),
                                total && up_total,
                                Attributes::new(),
                            )?;
                        }
                        HierarchyEdge::RuleTyping {
                            lhs_mapping,
                            rhs_mapping,
                            ..
                        } => {
                            self.add_rule_typing(
                                pred.clone(),
                                succ.clone(),
                                compose(&lhs_mapping, &up_map),
                                compose(&rhs_mapping, &up_map),
                                Attributes::new(),
                            )?;
                        }
                    }
                }
            }
        }
        self.edges
            .retain(|(f, t), _| f != id && t != id);
        self.relations.retain(|(l, r), _| l != id && r != id);
        self.skeleton.remove_node(ix);
        self.indices.shift_remove(id);
        self.nodes.shift_remove(id);
        Ok(())
    }

    /// Compose the typings along an explicit path of node identifiers.
    pub fn compose_path_typing(&self, path: &[GraphId]) -> Result<NodeMap, HierarchyError> {
        let Some((first, rest)) = path.split_first() else {
            return Err(HierarchyError::EmptyPath);
        };
        let Some(second) = rest.first() else {
            return Ok(crate::homomorphism::identity(self.graph(first)?));
        };
        let last = rest.last().unwrap_or(second);
        let step = |a: &GraphId, b: &GraphId| {
            self.typing(a, b)
                .map_err(|_| HierarchyError::NoPath(first.clone(), last.clone()))
        };
        let mut mapping = match step(first, second)? {
            HierarchyEdge::Typing { mapping, .. } => mapping.clone(),
            HierarchyEdge::RuleTyping { lhs_mapping, .. } => lhs_mapping.clone(),
        };
        for (a, b) in rest.iter().tuple_windows() {
            match step(a, b)? {
                HierarchyEdge::Typing { mapping: next, .. } => {
                    mapping = compose(&mapping, next);
                }
                HierarchyEdge::RuleTyping { .. } => {
                    return Err(HierarchyError::NotAGraph(a.clone()));
                }
            }
        }
        Ok(mapping)
    }

    /// All graph nodes with a typing path *to* `id` (its instances), each
    /// with the composed typing into `id`. Rule nodes are not included.
    pub fn ancestors(&self, id: &GraphId) -> Result<IndexMap<GraphId, NodeMap>, HierarchyError> {
        self.index(id)?;
        let mut result: IndexMap<GraphId, NodeMap> = IndexMap::new();
        // Reverse BFS: handle direct instances first, composing as we go.
        let mut frontier: Vec<(GraphId, NodeMap)> = vec![];
        for pred in self.predecessors(id)? {
            if let HierarchyEdge::Typing { mapping, .. } = self.typing(&pred, id)? {
                frontier.push((pred, mapping.clone()));
            }
        }
        while let Some((node, mapping)) = frontier.pop() {
            if result.contains_key(&node) {
                continue;
            }
            for pred in self.predecessors(&node)? {
                if let HierarchyEdge::Typing { mapping: step, .. } = self.typing(&pred, &node)? {
                    frontier.push((pred, compose(step, &mapping)));
                }
            }
            result.insert(node, mapping);
        }
        Ok(result)
    }

    /// All graph nodes reachable *from* `id` (its types), each with the
    /// composed typing from `id`.
    pub fn descendants(&self, id: &GraphId) -> Result<IndexMap<GraphId, NodeMap>, HierarchyError> {
        self.index(id)?;
        let mut result: IndexMap<GraphId, NodeMap> = IndexMap::new();
        let mut frontier: Vec<(GraphId, NodeMap)> = vec![];
        for succ in self.successors(id)? {
            if let HierarchyEdge::Typing { mapping, .. } = self.typing(id, &succ)? {
                frontier.push((succ, mapping.clone()));
            }
        }
        while let Some((node, mapping)) = frontier.pop() {
            if result.contains_key(&node) {
                continue;
            }
            for succ in self.successors(&node)? {
                if let HierarchyEdge::Typing { mapping: step, .. } = self.typing(&node, &succ)? {
                    frontier.push((succ, compose(&mapping, step)));
                }
            }
            result.insert(node, mapping);
        }
        Ok(result)
    }

    /// The types of a graph node's node in every direct type graph.
    pub fn node_type(
        &self,
        graph: &GraphId,
        node: &NodeId,
    ) -> Result<IndexMap<GraphId, NodeId>, HierarchyError> {
        let g = self.graph(graph)?;
        if !g.has_node(node) {
            return Err(HierarchyError::UnknownGraphNode {
                graph: graph.clone(),
                node: node.clone(),
            });
        }
        let mut types = IndexMap::new();
        for succ in self.successors(graph)? {
            if let HierarchyEdge::Typing { mapping, .. } = self.typing(graph, &succ)? {
                if let Some(t) = mapping.get(node) {
                    types.insert(succ, t.clone());
                }
            }
        }
        Ok(types)
    }

    /// Verify the full hierarchy invariant: every typing is a valid
    /// homomorphism and all path compositions commute.
    pub fn check_consistency(&self) -> Result<(), HierarchyError> {
        for ((from, to), edge) in &self.edges {
            match edge {
                HierarchyEdge::Typing {
                    mapping, total, ..
                } => {
                    check_homomorphism(self.graph(from)?, self.graph(to)?, mapping, *total)?;
                }
                HierarchyEdge::RuleTyping {
                    lhs_mapping,
                    rhs_mapping,
                    lhs_total,
                    rhs_total,
                    ..
                } => {
                    let rule = self.rule(from)?;
                    let target = self.graph(to)?;
                    check_homomorphism(rule.lhs(), target, lhs_mapping, *lhs_total)?;
                    check_homomorphism(rule.rhs(), target, rhs_mapping, *rhs_total)?;
                }
            }
        }
        for source in self.nodes.keys() {
            for target in self.nodes.keys() {
                self.check_paths_commute(source, target)?;
            }
        }
        Ok(())
    }

    /// All composed typings along distinct paths from `source` to `target`.
    /// For rule sources, the lhs leg is composed.
    fn path_compositions(
        &self,
        source: &GraphId,
        target: &GraphId,
    ) -> Result<Vec<NodeMap>, HierarchyError> {
        let mut result = Vec::new();
        for succ in self.successors(source)? {
            let first = match self.typing(source, &succ)? {
                HierarchyEdge::Typing { mapping, .. } => mapping.clone(),
                HierarchyEdge::RuleTyping { lhs_mapping, .. } => lhs_mapping.clone(),
            };
            if &succ == target {
                result.push(first);
                continue;
            }
            for rest in self.path_compositions(&succ, target)? {
                result.push(compose(&first, &rest));
            }
        }
        Ok(result)
    }

    fn check_paths_commute(
        &self,
        source: &GraphId,
        target: &GraphId,
    ) -> Result<(), HierarchyError> {
        let compositions = self.path_compositions(source, target)?;
        for (first, second) in compositions.iter().tuple_combinations() {
            if !maps_agree(first, second) {
                return Err(HierarchyError::NonCommutingPaths {
                    from: source.clone(),
                    to: target.clone(),
                    path_source: source.clone(),
                    path_target: target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check which pairs of paths an extra `from -> to` typing would create,
    /// and whether they all commute, without mutating the hierarchy.
    fn check_commutativity_with(
        &self,
        from: &GraphId,
        to: &GraphId,
        mapping: &NodeMap,
    ) -> Result<(), HierarchyError> {
        // The new edge creates paths s -> … -> from -> to -> … -> t. Check
        // all (s, t) pairs it connects against the existing compositions.
        let mut sources: Vec<(GraphId, NodeMap)> = self
            .ancestors(from)?
            .into_iter()
            .map(|(s, m)| (s, compose(&m, mapping)))
            .collect();
        sources.push((from.clone(), mapping.clone()));
        // Rule nodes typed into any of those sources gain the same new
        // paths, one per span leg.
        let mut rule_sources: Vec<(GraphId, NodeMap)> = Vec::new();
        for (s, to_via_new) in &sources {
            for pred in self.predecessors(s)? {
                if let HierarchyEdge::RuleTyping {
                    lhs_mapping,
                    rhs_mapping,
                    ..
                } = self.typing(&pred, s)?
                {
                    rule_sources.push((pred.clone(), compose(lhs_mapping, to_via_new)));
                    rule_sources.push((pred, compose(rhs_mapping, to_via_new)));
                }
            }
        }
        sources.extend(rule_sources);
        let mut targets: Vec<(GraphId, NodeMap)> = self
            .descendants(to)?
            .into_iter()
            .collect();
        targets.push((to.clone(), {
            crate::homomorphism::identity(self.graph(to)?)
        }));

        for (s, to_via_new) in &sources {
            for (t, after) in &targets {
                let via_new = compose(to_via_new, after);
                for existing in self.path_compositions(s, t)? {
                    if !maps_agree(&existing, &via_new) {
                        return Err(HierarchyError::NonCommutingPaths {
                            from: from.clone(),
                            to: to.clone(),
                            path_source: s.clone(),
                            path_target: t.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_rule_commutativity_with(
        &self,
        from: &GraphId,
        to: &GraphId,
        lhs_mapping: &NodeMap,
        rhs_mapping: &NodeMap,
    ) -> Result<(), HierarchyError> {
        for mapping in [lhs_mapping, rhs_mapping] {
            let mut targets: Vec<(GraphId, NodeMap)> =
                self.descendants(to)?.into_iter().collect();
            targets.push((to.clone(), crate::homomorphism::identity(self.graph(to)?)));
            for (t, after) in &targets {
                let via_new = compose(mapping, after);
                for existing in self.path_compositions(from, t)? {
                    if !maps_agree(&existing, &via_new) {
                        return Err(HierarchyError::NonCommutingPaths {
                            from: from.clone(),
                            to: to.clone(),
                            path_source: from.clone(),
                            path_target: t.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // -- internal mutators used by the rewrite engine --

    pub(crate) fn set_graph(&mut self, id: &GraphId, graph: AttributedGraph) {
        if let Some(HierarchyNode::Graph { graph: slot, .. }) = self.nodes.get_mut(id) {
            *slot = graph;
        }
    }

    pub(crate) fn set_typing_mapping(
        &mut self,
        from: &GraphId,
        to: &GraphId,
        mapping: NodeMap,
        total: bool,
    ) {
        if let Some(HierarchyEdge::Typing {
            mapping: slot,
            total: total_slot,
            ..
        }) = self.edges.get_mut(&(from.clone(), to.clone()))
        {
            *slot = mapping;
            *total_slot = total;
        }
    }

    pub(crate) fn set_rule_typing_mappings(
        &mut self,
        from: &GraphId,
        to: &GraphId,
        lhs_mapping: NodeMap,
        rhs_mapping: NodeMap,
        lhs_total: bool,
        rhs_total: bool,
    ) {
        if let Some(HierarchyEdge::RuleTyping {
            lhs_mapping: lhs_slot,
            rhs_mapping: rhs_slot,
            lhs_total: lhs_total_slot,
            rhs_total: rhs_total_slot,
            ..
        }) = self.edges.get_mut(&(from.clone(), to.clone()))
        {
            *lhs_slot = lhs_mapping;
            *rhs_slot = rhs_mapping;
            *lhs_total_slot = lhs_total;
            *rhs_total_slot = rhs_total;
        }
    }

    pub(crate) fn set_relation_pairs(
        &mut self,
        left: &GraphId,
        right: &GraphId,
        rel: IndexMap<NodeId, IndexSet<NodeId>>,
    ) {
        if let Some(relation) = self.relations.get_mut(&(left.clone(), right.clone())) {
            relation.rel = rel;
        }
    }
}

/// Whether two (possibly partial) node maps agree wherever both are defined.
fn maps_agree(first: &NodeMap, second: &NodeMap) -> bool {
    first
        .iter()
        .all(|(k, v)| second.get(k).is_none_or(|w| w == v))
}

fn invert_relation(
    rel: &IndexMap<NodeId, IndexSet<NodeId>>,
) -> IndexMap<NodeId, IndexSet<NodeId>> {
    let mut inverted: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    for (l, rs) in rel {
        for r in rs {
            inverted.entry(r.clone()).or_default().insert(l.clone());
        }
    }
    inverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use cool_asserts::assert_matches;
    use rstest::{fixture, rstest};

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> AttributedGraph {
        AttributedGraph::from_parts(
            nodes.iter().map(|n| ((*n).into(), Attributes::new())),
            edges
                .iter()
                .map(|(s, t)| ((*s).into(), (*t).into(), Attributes::new())),
        )
        .unwrap()
    }

    fn map(pairs: &[(&str, &str)]) -> NodeMap {
        pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect()
    }

    /// A three-level chain: instances -> classes -> metaclasses.
    #[fixture]
    pub(crate) fn chain() -> Hierarchy {
        let mut h = Hierarchy::new();
        h.add_graph(
            "instances".into(),
            graph(&["alice", "bob", "post"], &[("alice", "post"), ("bob", "post")]),
            Attributes::new(),
        )
        .unwrap();
        h.add_graph(
            "classes".into(),
            graph(&["person", "content"], &[("person", "content")]),
            Attributes::new(),
        )
        .unwrap();
        h.add_graph(
            "meta".into(),
            graph(&["entity"], &[("entity", "entity")]),
            Attributes::new(),
        )
        .unwrap();
        h.add_typing(
            "instances".into(),
            "classes".into(),
            map(&[("alice", "person"), ("bob", "person"), ("post", "content")]),
            true,
            Attributes::new(),
        )
        .unwrap();
        h.add_typing(
            "classes".into(),
            "meta".into(),
            map(&[("person", "entity"), ("content", "entity")]),
            true,
            Attributes::new(),
        )
        .unwrap();
        h
    }

    #[rstest]
    fn chain_queries(chain: Hierarchy) {
        assert_eq!(chain.node_ids().count(), 3);
        let anc = chain.ancestors(&"meta".into()).unwrap();
        assert_eq!(anc.len(), 2);
        assert_eq!(
            anc[&GraphId::from("instances")],
            map(&[("alice", "entity"), ("bob", "entity"), ("post", "entity")])
        );
        let desc = chain.descendants(&"instances".into()).unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(
            chain
                .node_type(&"instances".into(), &"alice".into())
                .unwrap()[&GraphId::from("classes")],
            NodeId::from("person")
        );
        chain.check_consistency().unwrap();
    }

    #[rstest]
    fn cycle_rejected(mut chain: Hierarchy) {
        let edges_before: Vec<_> = chain
            .typings()
            .map(|(f, t, _)| (f.clone(), t.clone()))
            .collect();
        // An empty partial mapping is a valid homomorphism, so the edge is
        // rejected purely for closing a cycle.
        assert_matches!(
            chain.add_typing(
                "meta".into(),
                "instances".into(),
                map(&[]),
                false,
                Attributes::new(),
            ),
            Err(HierarchyError::CycleCreation(..))
        );
        let edges_after: Vec<_> = chain
            .typings()
            .map(|(f, t, _)| (f.clone(), t.clone()))
            .collect();
        assert_eq!(edges_before, edges_after);
    }

    #[rstest]
    fn non_commuting_edge_rejected(mut chain: Hierarchy) {
        // A direct instances -> meta typing must agree with the composite
        // through classes. "entity" is the only meta node, so disagreement
        // needs a second one.
        let mut h = chain.clone();
        h.add_typing(
            "instances".into(),
            "meta".into(),
            map(&[("alice", "entity"), ("bob", "entity"), ("post", "entity")]),
            true,
            Attributes::new(),
        )
        .unwrap();
        h.check_consistency().unwrap();

        // Make meta bigger, then try a disagreeing direct typing.
        let mut bigger = graph(&["entity", "other"], &[("entity", "entity")]);
        bigger
            .add_edge("other".into(), "other".into(), Attributes::new())
            .unwrap();
        chain.set_graph(&"meta".into(), bigger);
        assert_matches!(
            chain.add_typing(
                "instances".into(),
                "meta".into(),
                map(&[("alice", "other"), ("bob", "other"), ("post", "other")]),
                true,
                Attributes::new(),
            ),
            Err(HierarchyError::NonCommutingPaths { .. })
        );
    }

    #[rstest]
    fn duplicate_typing_rejected(mut chain: Hierarchy) {
        assert_matches!(
            chain.add_typing(
                "instances".into(),
                "classes".into(),
                map(&[]),
                false,
                Attributes::new(),
            ),
            Err(HierarchyError::DuplicateTyping(..))
        );
    }

    #[rstest]
    fn rule_typing(mut chain: Hierarchy) {
        let pattern = graph(&["x"], &[]);
        let rule = Rule::identity(pattern);
        chain
            .add_rule("add_person".into(), rule, Attributes::new())
            .unwrap();
        chain
            .add_rule_typing(
                "add_person".into(),
                "classes".into(),
                map(&[("x", "person")]),
                map(&[("x", "person")]),
                Attributes::new(),
            )
            .unwrap();
        chain.check_consistency().unwrap();
        assert_matches!(
            chain.graph(&"add_person".into()),
            Err(HierarchyError::NotAGraph(_))
        );
        assert!(chain.rule(&"add_person".into()).is_ok());
    }

    #[rstest]
    fn graph_typing_must_commute_with_rule_typings() {
        let mut h = Hierarchy::new();
        h.add_graph("drafts".into(), graph(&["d1", "d2"], &[]), Attributes::new())
            .unwrap();
        h.add_graph("pages".into(), graph(&["p1", "p2"], &[]), Attributes::new())
            .unwrap();
        h.add_rule(
            "touch".into(),
            Rule::identity(graph(&["x"], &[])),
            Attributes::new(),
        )
        .unwrap();
        h.add_rule_typing(
            "touch".into(),
            "drafts".into(),
            map(&[("x", "d1")]),
            map(&[("x", "d1")]),
            Attributes::new(),
        )
        .unwrap();
        h.add_rule_typing(
            "touch".into(),
            "pages".into(),
            map(&[("x", "p1")]),
            map(&[("x", "p1")]),
            Attributes::new(),
        )
        .unwrap();

        // Routing d1 to p2 contradicts the rule, which pins x to d1 and p1.
        assert_matches!(
            h.add_typing(
                "drafts".into(),
                "pages".into(),
                map(&[("d1", "p2"), ("d2", "p1")]),
                true,
                Attributes::new(),
            ),
            Err(HierarchyError::NonCommutingPaths { .. })
        );

        h.add_typing(
            "drafts".into(),
            "pages".into(),
            map(&[("d1", "p1"), ("d2", "p2")]),
            true,
            Attributes::new(),
        )
        .unwrap();
        h.check_consistency().unwrap();
    }

    #[rstest]
    fn relations_are_symmetric(mut chain: Hierarchy) {
        let rel: IndexMap<NodeId, IndexSet<NodeId>> = [(
            NodeId::from("alice"),
            IndexSet::from([NodeId::from("person")]),
        )]
        .into_iter()
        .collect();
        chain
            .add_relation("instances".into(), "classes".into(), rel, Attributes::new())
            .unwrap();
        let forward = chain
            .relation(&"instances".into(), &"classes".into())
            .unwrap();
        assert!(forward.rel[&NodeId::from("alice")].contains(&NodeId::from("person")));
        let backward = chain
            .relation(&"classes".into(), &"instances".into())
            .unwrap();
        assert!(backward.rel[&NodeId::from("person")].contains(&NodeId::from("alice")));
        assert_matches!(
            chain.add_relation(
                "classes".into(),
                "instances".into(),
                IndexMap::new(),
                Attributes::new()
            ),
            Err(HierarchyError::DuplicateRelation(..))
        );
    }

    #[rstest]
    fn remove_node_with_reconnect(mut chain: Hierarchy) {
        chain.remove_node(&"classes".into(), true).unwrap();
        // instances got retyped directly into meta by composition.
        let HierarchyEdge::Typing { mapping, .. } =
            chain.typing(&"instances".into(), &"meta".into()).unwrap()
        else {
            panic!("expected a graph typing");
        };
        assert_eq!(mapping[&NodeId::from("alice")], NodeId::from("entity"));
        chain.check_consistency().unwrap();
    }

    #[rstest]
    fn invalid_typing_mapping_rejected(mut chain: Hierarchy) {
        // "post" -> "person" breaks the alice -> post edge image.
        assert_matches!(
            chain.add_typing(
                "instances".into(),
                "meta".into(),
                map(&[("alice", "missing")]),
                false,
                Attributes::new(),
            ),
            Err(HierarchyError::Homomorphism(
                InvalidHomomorphism::UnknownTarget { .. }
            ))
        );
    }

    #[rstest]
    fn compose_along_path(chain: Hierarchy) {
        let composed = chain
            .compose_path_typing(&["instances".into(), "classes".into(), "meta".into()])
            .unwrap();
        assert!(composed.values().all(|v| v == &NodeId::from("entity")));
    }
}
