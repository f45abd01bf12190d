//! Typed attributed graph rewriting.
//!
//! A *typed attributed graph* is a directed graph whose nodes and edges
//! carry attribute tables (keys mapped to sets of values) and which may be
//! *typed* by another graph through a homomorphism. Graphs and their typings
//! assemble into a [`Hierarchy`]: a DAG in which every path of typings
//! commutes.
//!
//! Rewriting is sesqui-pushout: a [`Rule`] is a span `lhs <- p -> rhs` whose
//! application deletes and clones first (pullback complement), then adds and
//! merges (pushout). Applying a rule inside a hierarchy propagates the
//! change to every related graph so that the commutativity invariant is
//! restored, and either commits atomically or leaves the hierarchy
//! untouched.
//!
//! # Example
//!
//! ```
//! use tagr::{AttributedGraph, Attributes, GraphId, Hierarchy, NodeMap, Rule};
//!
//! let mut hierarchy = Hierarchy::new();
//! let actions = AttributedGraph::from_parts(
//!     [("eats".into(), Attributes::new()), ("food".into(), Attributes::new())],
//!     [("eats".into(), "food".into(), Attributes::new())],
//! )?;
//! let world = AttributedGraph::from_parts(
//!     [("cat".into(), Attributes::new()), ("mouse".into(), Attributes::new())],
//!     [("cat".into(), "mouse".into(), Attributes::new())],
//! )?;
//! hierarchy.add_graph("actions".into(), actions, Attributes::new())?;
//! hierarchy.add_graph("world".into(), world, Attributes::new())?;
//! let typing: NodeMap = [("cat".into(), "eats".into()), ("mouse".into(), "food".into())]
//!     .into_iter()
//!     .collect();
//! hierarchy.add_typing("world".into(), "actions".into(), typing, true, Attributes::new())?;
//!
//! // Remove the "food" node from the action model; the mouse goes with it.
//! let pattern = AttributedGraph::from_parts([("f".into(), Attributes::new())], [])?;
//! let mut rule = Rule::identity(pattern);
//! rule.inject_remove_node(&"f".into())?;
//! let instance: NodeMap = [("f".into(), "food".into())].into_iter().collect();
//! let report = hierarchy.rewrite(&"actions".into(), &rule, &instance, None, None, false)?;
//!
//! assert!(report.updated_graphs.contains(&GraphId::from("world")));
//! assert!(!hierarchy.graph(&"world".into())?.has_node(&"mouse".into()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use tagr_core::{attrs, category, core, graph, hierarchy, homomorphism, matching, rule, serialize};

pub use tagr_core::{
    AttrSet, AttrValue, AttributedGraph, Attributes, GraphId, Hierarchy, HierarchyError, NodeId,
    NodeMap, RewriteReport, RewritingError, Rule, RuleError,
};
