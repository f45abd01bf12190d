//! Rewriting rules as spans `lhs <- p -> rhs` and their sesqui-pushout
//! application.
//!
//! The left-hand side is the match pattern, `p` the preserved interface, and
//! the right-hand side the replacement. Both legs of the span are total.
//! Nodes of `lhs` without a `p`-preimage are removed, nodes of `rhs` without
//! one are added, several preimages of an `lhs` node clone it, and several
//! preimages of an `rhs` node merge them. Application is pullback complement
//! (delete + clone) followed by pushout (add + merge).

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use thiserror::Error;

use crate::attrs::Attributes;
use crate::category::{pullback_complement, pushout};
use crate::core::{GraphId, NodeId};
use crate::graph::{AttributedGraph, GraphError, MergePolicy};
use crate::homomorphism::{
    InvalidHomomorphism, NodeMap, check_homomorphism, check_monic, identity, image, preimages,
};

/// Errors from building or mutating a [`Rule`].
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum RuleError {
    /// An underlying graph mutation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// One of the span legs is not a valid total homomorphism.
    #[error(transparent)]
    Homomorphism(#[from] InvalidHomomorphism),
    /// The referenced node is not part of the rule pattern.
    #[error("node {0} is not a node of the rule's pattern")]
    NotInPattern(NodeId),
    /// The referenced edge is not part of the rule pattern.
    #[error("edge {0} -> {1} is not an edge of the rule's pattern")]
    EdgeNotInPattern(NodeId, NodeId),
}

/// Errors from applying a rewrite, to a single graph or across a hierarchy.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum RewritingError {
    /// The instance is not a monic total homomorphism from the lhs.
    #[error("invalid rule instance: {0}")]
    Instance(InvalidHomomorphism),
    /// A homomorphism-validity failure inside the rewriting constructions.
    #[error(transparent)]
    Homomorphism(#[from] InvalidHomomorphism),
    /// A graph operation failed while assembling the result.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A `p_typing` entry references an unknown graph or node, or keeps a set
    /// of clone copies not contained in the canonical clone class.
    #[error("p-typing of node {node} in graph {graph} is not composable")]
    NonComposablePTyping {
        /// The instance graph the typing is for.
        graph: GraphId,
        /// The offending node.
        node: NodeId,
    },
    /// An `rhs_typing` entry conflicts with the existing typings.
    #[error("rhs typing of node {node} toward graph {graph} is not composable")]
    NonComposableRhsTyping {
        /// The descendant graph the typing points into.
        graph: GraphId,
        /// The rhs node.
        node: NodeId,
    },
    /// A strict rewrite left a node untyped in some descendant.
    #[error("strict rewrite: added node {node} has no typing in graph {graph}")]
    StrictnessViolation {
        /// The descendant missing a typing.
        graph: GraphId,
        /// The untyped rhs node.
        node: NodeId,
    },
    /// A strict rewrite would have changed another graph of the hierarchy.
    #[error("strict rewrite would modify graph {0}")]
    StrictSideEffect(GraphId),
    /// A rule typing could not be carried over the updated target graph.
    #[error("cannot lift the typing of rule {rule} over the rewritten graph {graph}")]
    RuleLifting {
        /// The rule node whose typing broke.
        rule: GraphId,
        /// The rewritten graph it was typed by.
        graph: GraphId,
    },
    /// A hierarchy-level failure while preparing a rewrite.
    #[error(transparent)]
    Hierarchy(#[from] crate::hierarchy::HierarchyError),
}

/// A rewriting rule: the span `lhs <- p -> rhs` with total legs.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    lhs: AttributedGraph,
    p: AttributedGraph,
    rhs: AttributedGraph,
    p_lhs: NodeMap,
    p_rhs: NodeMap,
}

impl Rule {
    /// Build a rule from its parts, validating both legs as total
    /// homomorphisms. The legs need not be monic: several `p`-preimages of
    /// an lhs node make a clone, several of an rhs node make a merge.
    pub fn new(
        lhs: AttributedGraph,
        p: AttributedGraph,
        rhs: AttributedGraph,
        p_lhs: NodeMap,
        p_rhs: NodeMap,
    ) -> Result<Self, RuleError> {
        check_homomorphism(&p, &lhs, &p_lhs, true)?;
        check_homomorphism(&p, &rhs, &p_rhs, true)?;
        Ok(Self {
            lhs,
            p,
            rhs,
            p_lhs,
            p_rhs,
        })
    }

    /// The identity rule on a pattern: `lhs = p = rhs` with identity legs.
    /// Applying it (with any monic total instance) leaves the host unchanged
    /// up to relabeling.
    #[must_use]
    pub fn identity(pattern: AttributedGraph) -> Self {
        let id_map = identity(&pattern);
        Self {
            lhs: pattern.clone(),
            p: pattern.clone(),
            rhs: pattern,
            p_lhs: id_map.clone(),
            p_rhs: id_map,
        }
    }

    /// The match pattern.
    #[must_use]
    pub fn lhs(&self) -> &AttributedGraph {
        &self.lhs
    }

    /// The preserved interface.
    #[must_use]
    pub fn p(&self) -> &AttributedGraph {
        &self.p
    }

    /// The replacement.
    #[must_use]
    pub fn rhs(&self) -> &AttributedGraph {
        &self.rhs
    }

    /// The left leg `p -> lhs`.
    #[must_use]
    pub fn p_lhs(&self) -> &NodeMap {
        &self.p_lhs
    }

    /// The right leg `p -> rhs`.
    #[must_use]
    pub fn p_rhs(&self) -> &NodeMap {
        &self.p_rhs
    }

    /// Lhs nodes the rule removes (no `p`-preimage).
    #[must_use]
    pub fn removed_nodes(&self) -> IndexSet<NodeId> {
        let im = image(&self.p_lhs);
        self.lhs
            .nodes()
            .filter(|n| !im.contains(*n))
            .cloned()
            .collect()
    }

    /// Rhs nodes the rule adds (no `p`-preimage).
    #[must_use]
    pub fn added_nodes(&self) -> IndexSet<NodeId> {
        let im = image(&self.p_rhs);
        self.rhs
            .nodes()
            .filter(|n| !im.contains(*n))
            .cloned()
            .collect()
    }

    /// Lhs nodes the rule clones, with their `p`-preimages (the clone class).
    #[must_use]
    pub fn cloned_nodes(&self) -> IndexMap<NodeId, Vec<NodeId>> {
        self.lhs
            .nodes()
            .filter_map(|n| {
                let pre = preimages(&self.p_lhs, n);
                (pre.len() > 1)
                    .then(|| (n.clone(), pre.into_iter().cloned().collect()))
            })
            .collect()
    }

    /// Rhs nodes the rule merges into, with the merged `p`-preimages.
    #[must_use]
    pub fn merged_nodes(&self) -> IndexMap<NodeId, Vec<NodeId>> {
        self.rhs
            .nodes()
            .filter_map(|n| {
                let pre = preimages(&self.p_rhs, n);
                (pre.len() > 1)
                    .then(|| (n.clone(), pre.into_iter().cloned().collect()))
            })
            .collect()
    }

    /// Whether the rule deletes or clones anything.
    #[must_use]
    pub fn is_restrictive(&self) -> bool {
        !self.removed_nodes().is_empty()
            || !self.cloned_nodes().is_empty()
            || self.p.edge_count() < self.lhs.edge_count()
            || self
                .p_lhs
                .iter()
                .any(|(pn, ln)| self.p.node_attrs(pn) != self.lhs.node_attrs(ln))
    }

    /// Whether the rule adds or merges anything.
    #[must_use]
    pub fn is_expansive(&self) -> bool {
        !self.added_nodes().is_empty()
            || !self.merged_nodes().is_empty()
            || self.rhs.edge_count() > self.p.edge_count()
            || self
                .p_rhs
                .iter()
                .any(|(pn, rn)| self.p.node_attrs(pn) != self.rhs.node_attrs(rn))
    }

    /// Whether applying the rule is a no-op.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        !self.is_restrictive() && !self.is_expansive()
    }

    // -- incremental mutators, keeping the span legs consistent --

    /// Make the rule remove an lhs node: drops all its `p`-preimages (and
    /// their now-unreferenced rhs images).
    pub fn inject_remove_node(&mut self, lhs_node: &NodeId) -> Result<(), RuleError> {
        if !self.lhs.has_node(lhs_node) {
            return Err(RuleError::NotInPattern(lhs_node.clone()));
        }
        let pre: Vec<NodeId> = preimages(&self.p_lhs, lhs_node)
            .into_iter()
            .cloned()
            .collect();
        for p_node in pre {
            let rhs_image = self.p_rhs.get(&p_node).cloned();
            self.p.remove_node(&p_node)?;
            self.p_lhs.shift_remove(&p_node);
            self.p_rhs.shift_remove(&p_node);
            if let Some(r) = rhs_image {
                if preimages(&self.p_rhs, &r).is_empty() {
                    self.rhs.remove_node(&r)?;
                }
            }
        }
        Ok(())
    }

    /// Make the rule remove an lhs edge: drops the corresponding `p` and
    /// `rhs` edges.
    pub fn inject_remove_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
    ) -> Result<(), RuleError> {
        if !self.lhs.has_edge(source, target) {
            return Err(RuleError::EdgeNotInPattern(source.clone(), target.clone()));
        }
        let pairs: Vec<(NodeId, NodeId)> = preimages(&self.p_lhs, source)
            .into_iter()
            .cartesian_product(preimages(&self.p_lhs, target))
            .filter(|(s, t)| self.p.has_edge(s, t))
            .map(|(s, t)| (s.clone(), t.clone()))
            .collect();
        for (s, t) in pairs {
            self.p.remove_edge(&s, &t)?;
            let (rs, rt) = (&self.p_rhs[&s], &self.p_rhs[&t]);
            if self.rhs.has_edge(rs, rt) {
                let (rs, rt) = (rs.clone(), rt.clone());
                self.rhs.remove_edge(&rs, &rt)?;
            }
        }
        Ok(())
    }

    /// Make the rule clone an lhs node once more.
    ///
    /// Returns the identifiers of the new `p` node and its `rhs` image.
    pub fn inject_clone_node(&mut self, lhs_node: &NodeId) -> Result<(NodeId, NodeId), RuleError> {
        if !self.lhs.has_node(lhs_node) {
            return Err(RuleError::NotInPattern(lhs_node.clone()));
        }
        match preimages(&self.p_lhs, lhs_node).first().cloned().cloned() {
            Some(existing) => {
                let p_clone = self.p.clone_node(&existing, None)?;
                let rhs_image = self.p_rhs[&existing].clone();
                let rhs_clone = self.rhs.clone_node(&rhs_image, None)?;
                self.p_lhs.insert(p_clone.clone(), lhs_node.clone());
                self.p_rhs.insert(p_clone.clone(), rhs_clone.clone());
                Ok((p_clone, rhs_clone))
            }
            // A node scheduled for removal gets a fresh preserved copy.
            None => {
                let attrs = self.lhs.node_attrs(lhs_node)?.clone();
                let p_id = if self.p.has_node(lhs_node) {
                    self.p.fresh_node_id(lhs_node)
                } else {
                    lhs_node.clone()
                };
                self.p.add_node(p_id.clone(), attrs.clone())?;
                let rhs_id = if self.rhs.has_node(&p_id) {
                    self.rhs.fresh_node_id(&p_id)
                } else {
                    p_id.clone()
                };
                self.rhs.add_node(rhs_id.clone(), attrs)?;
                self.p_lhs.insert(p_id.clone(), lhs_node.clone());
                self.p_rhs.insert(p_id.clone(), rhs_id.clone());
                Ok((p_id, rhs_id))
            }
        }
    }

    /// Make the rule add a fresh node with the given attributes.
    pub fn inject_add_node(&mut self, id: NodeId, attrs: Attributes) -> Result<(), RuleError> {
        self.rhs.add_node(id, attrs)?;
        Ok(())
    }

    /// Make the rule add an edge between two rhs nodes.
    pub fn inject_add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        attrs: Attributes,
    ) -> Result<(), RuleError> {
        self.rhs.add_edge(source, target, attrs)?;
        Ok(())
    }

    /// Make the rule merge the given lhs nodes.
    ///
    /// Returns the identifier of the merged rhs node.
    pub fn inject_merge_nodes(&mut self, lhs_nodes: &[NodeId]) -> Result<NodeId, RuleError> {
        let mut rhs_targets: IndexSet<NodeId> = IndexSet::new();
        for n in lhs_nodes {
            if !self.lhs.has_node(n) {
                return Err(RuleError::NotInPattern(n.clone()));
            }
            for p_node in preimages(&self.p_lhs, n) {
                rhs_targets.insert(self.p_rhs[p_node].clone());
            }
        }
        let targets: Vec<NodeId> = rhs_targets.into_iter().collect();
        let merged = self.rhs.merge_nodes(
            &targets,
            None,
            MergePolicy::Union,
            MergePolicy::Union,
        )?;
        for v in self.p_rhs.values_mut() {
            if targets.contains(v) {
                *v = merged.clone();
            }
        }
        Ok(merged)
    }

    /// Make the rule add attributes to the images of an lhs node.
    pub fn inject_add_node_attrs(
        &mut self,
        lhs_node: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), RuleError> {
        if !self.lhs.has_node(lhs_node) {
            return Err(RuleError::NotInPattern(lhs_node.clone()));
        }
        for p_node in preimages(&self.p_lhs, lhs_node)
            .into_iter()
            .cloned()
            .collect_vec()
        {
            let rhs_node = self.p_rhs[&p_node].clone();
            self.rhs.add_node_attrs(&rhs_node, attrs)?;
        }
        Ok(())
    }

    /// Make the rule remove attributes from an lhs node.
    pub fn inject_remove_node_attrs(
        &mut self,
        lhs_node: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), RuleError> {
        if !self.lhs.has_node(lhs_node) {
            return Err(RuleError::NotInPattern(lhs_node.clone()));
        }
        for p_node in preimages(&self.p_lhs, lhs_node)
            .into_iter()
            .cloned()
            .collect_vec()
        {
            let rhs_node = self.p_rhs[&p_node].clone();
            self.p.remove_node_attrs(&p_node, attrs)?;
            self.rhs.remove_node_attrs(&rhs_node, attrs)?;
        }
        Ok(())
    }

    /// Make the rule add attributes to the images of an lhs edge.
    pub fn inject_add_edge_attrs(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), RuleError> {
        if !self.lhs.has_edge(source, target) {
            return Err(RuleError::EdgeNotInPattern(source.clone(), target.clone()));
        }
        let pairs: Vec<(NodeId, NodeId)> = preimages(&self.p_lhs, source)
            .into_iter()
            .cartesian_product(preimages(&self.p_lhs, target))
            .filter(|(s, t)| self.p.has_edge(s, t))
            .map(|(s, t)| (self.p_rhs[s].clone(), self.p_rhs[t].clone()))
            .collect();
        for (rs, rt) in pairs {
            self.rhs.add_edge_attrs(&rs, &rt, attrs)?;
        }
        Ok(())
    }

    /// Make the rule remove attributes from an lhs edge.
    pub fn inject_remove_edge_attrs(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        attrs: &Attributes,
    ) -> Result<(), RuleError> {
        if !self.lhs.has_edge(source, target) {
            return Err(RuleError::EdgeNotInPattern(source.clone(), target.clone()));
        }
        let pairs: Vec<(NodeId, NodeId)> = preimages(&self.p_lhs, source)
            .into_iter()
            .cartesian_product(preimages(&self.p_lhs, target))
            .filter(|(s, t)| self.p.has_edge(s, t))
            .map(|(s, t)| ((*s).clone(), (*t).clone()))
            .collect();
        for (s, t) in pairs {
            self.p.remove_edge_attrs(&s, &t, attrs)?;
            let (rs, rt) = (self.p_rhs[&s].clone(), self.p_rhs[&t].clone());
            self.rhs.remove_edge_attrs(&rs, &rt, attrs)?;
        }
        Ok(())
    }

    /// Apply the rule to `host` at the given monic total `instance` of the
    /// lhs, mutating `host` in place.
    ///
    /// Returns the instance of the rhs inside the rewritten host, which
    /// callers use to address newly created or merged nodes.
    pub fn apply(
        &self,
        host: &mut AttributedGraph,
        instance: &NodeMap,
    ) -> Result<NodeMap, RewritingError> {
        check_homomorphism(&self.lhs, host, instance, true).map_err(RewritingError::Instance)?;
        check_monic(instance).map_err(RewritingError::Instance)?;

        let (mid, p_mid, _mid_host) =
            pullback_complement(&self.p, &self.lhs, host, &self.p_lhs, instance)?;
        let (rewritten, _mid_out, rhs_out) =
            pushout(&self.p, &mid, &self.rhs, &p_mid, &self.p_rhs)?;
        *host = rewritten;
        Ok(rhs_out)
    }

    /// The restriction of `self` to its restrictive half: `lhs <- p -> p`.
    /// Applying it performs the rule's deletions and clonings only.
    #[must_use]
    pub fn restrictive_part(&self) -> Rule {
        Rule {
            lhs: self.lhs.clone(),
            p: self.p.clone(),
            rhs: self.p.clone(),
            p_lhs: self.p_lhs.clone(),
            p_rhs: identity(&self.p),
        }
    }

    /// The restriction of `self` to its expansive half: `p <- p -> rhs`.
    #[must_use]
    pub fn expansive_part(&self) -> Rule {
        Rule {
            lhs: self.p.clone(),
            p: self.p.clone(),
            rhs: self.rhs.clone(),
            p_lhs: identity(&self.p),
            p_rhs: self.p_rhs.clone(),
        }
    }
}
