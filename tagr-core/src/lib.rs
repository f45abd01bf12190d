//! Typed attributed graphs and sesqui-pushout rewriting.
//!
//! This crate contains the core definitions: attributed graphs over
//! set-valued attributes, homomorphisms between them, the categorical
//! constructions (pullback, pushout, pullback complement) that implement
//! rewriting, rules as spans, subgraph matching, and hierarchies of graphs
//! related by typings with rewriting that propagates through them.
//! See the [top-level crate documentation](https://docs.rs/tagr/latest/tagr/)
//! for more information.

pub mod attrs;
pub mod category;
pub mod core;
pub mod graph;
pub mod hierarchy;
pub mod homomorphism;
pub mod matching;
pub mod rule;
pub mod serialize;

pub use crate::attrs::{AttrSet, AttrValue, Attributes};
pub use crate::core::{GraphId, NodeId};
pub use crate::graph::AttributedGraph;
pub use crate::hierarchy::{Hierarchy, HierarchyError, RewriteReport};
pub use crate::homomorphism::NodeMap;
pub use crate::rule::{RewritingError, Rule, RuleError};
