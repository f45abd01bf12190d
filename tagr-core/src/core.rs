//! Definitions for the identifier types used across the crate.
//!
//! These types are re-exported in the root of the crate.

use derive_more::{Display, From};
use smol_str::SmolStr;

/// A stable identifier for a node of an [`AttributedGraph`].
///
/// Node identifiers are chosen by the mutator, not positional indices:
/// cloning and merging generate fresh, collision-free identifiers derived
/// from the originals.
///
/// [`AttributedGraph`]: crate::graph::AttributedGraph
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    From,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(SmolStr);

impl NodeId {
    /// Create a node identifier from anything string-like.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({:?})", self.0.as_str())
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

/// Identifier of a node of a [`Hierarchy`] (a graph or a rule).
///
/// [`Hierarchy`]: crate::hierarchy::Hierarchy
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    From,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct GraphId(SmolStr);

impl GraphId {
    /// Create a hierarchy node identifier from anything string-like.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphId({:?})", self.0.as_str())
    }
}

impl From<&str> for GraphId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for GraphId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

/// Key of a node or edge attribute.
pub type AttrKey = SmolStr;
