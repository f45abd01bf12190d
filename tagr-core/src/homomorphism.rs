//! Homomorphisms between attributed graphs.
//!
//! A homomorphism is a map from a source graph's nodes to a target graph's
//! nodes. It may be partial; totality is checked against the source node set
//! whenever it matters rather than stored. A *valid* homomorphism preserves
//! edges and keeps node and edge attributes within (subset of) those of the
//! images. [`check_homomorphism`] succeeding is the proof of validity callers
//! rely on.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use thiserror::Error;

use crate::attrs::attrs_included;
use crate::core::NodeId;
use crate::graph::AttributedGraph;

/// A node mapping between two graphs.
pub type NodeMap = IndexMap<NodeId, NodeId>;

/// Violations of homomorphism validity. Always fatal to the operation that
/// raised them.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidHomomorphism {
    /// The map was required to be total but misses a source node.
    #[error("mapping is not total: source node {0} has no image")]
    NotTotal(NodeId),
    /// A mapped key is not a node of the source graph.
    #[error("mapped node {0} is not a node of the source graph")]
    UnknownSource(NodeId),
    /// A mapped value is not a node of the target graph.
    #[error("image {image} of node {node} is not a node of the target graph")]
    UnknownTarget {
        /// Source node.
        node: NodeId,
        /// Its missing image.
        image: NodeId,
    },
    /// A source edge has no corresponding target edge.
    #[error("edge {from} -> {to} has no image edge {image_from} -> {image_to}")]
    BrokenEdge {
        /// Source edge endpoints.
        from: NodeId,
        /// Source edge endpoints.
        to: NodeId,
        /// Image endpoints missing an edge.
        image_from: NodeId,
        /// Image endpoints missing an edge.
        image_to: NodeId,
    },
    /// A node's attributes are not a subset of its image's.
    #[error("attributes of node {node} are not a subset of those of {image}")]
    NodeAttributeMismatch {
        /// Source node.
        node: NodeId,
        /// Its image.
        image: NodeId,
    },
    /// An edge's attributes are not a subset of its image's.
    #[error("attributes of edge {from} -> {to} exceed those of its image")]
    EdgeAttributeMismatch {
        /// Source edge endpoints.
        from: NodeId,
        /// Source edge endpoints.
        to: NodeId,
    },
    /// No mediating map exists: a universal-property square fails to commute
    /// at the given node.
    #[error("no mediating map: square does not commute at node {0}")]
    NonCommuting(NodeId),
    /// The map was required to be monic but identifies two nodes.
    #[error("mapping is not monic: {first} and {second} share image {image}")]
    NotMonic {
        /// First identified node.
        first: NodeId,
        /// Second identified node.
        second: NodeId,
        /// The shared image.
        image: NodeId,
    },
}

/// Check that `mapping` is a valid (partial) homomorphism from `source` to
/// `target`; with `total`, additionally require every source node to be
/// mapped.
///
/// Success returns nothing: not raising *is* the proof of validity.
pub fn check_homomorphism(
    source: &AttributedGraph,
    target: &AttributedGraph,
    mapping: &NodeMap,
    total: bool,
) -> Result<(), InvalidHomomorphism> {
    if total {
        for node in source.nodes() {
            if !mapping.contains_key(node) {
                return Err(InvalidHomomorphism::NotTotal(node.clone()));
            }
        }
    }
    for (node, image) in mapping {
        if !source.has_node(node) {
            return Err(InvalidHomomorphism::UnknownSource(node.clone()));
        }
        if !target.has_node(image) {
            return Err(InvalidHomomorphism::UnknownTarget {
                node: node.clone(),
                image: image.clone(),
            });
        }
        let node_attrs = source.node_attrs(node).expect("node checked above");
        let image_attrs = target.node_attrs(image).expect("image checked above");
        if !attrs_included(node_attrs, image_attrs) {
            return Err(InvalidHomomorphism::NodeAttributeMismatch {
                node: node.clone(),
                image: image.clone(),
            });
        }
    }
    for (s, t, edge_attrs) in source.edges() {
        let (Some(is), Some(it)) = (mapping.get(s), mapping.get(t)) else {
            continue;
        };
        if !target.has_edge(is, it) {
            return Err(InvalidHomomorphism::BrokenEdge {
                from: s.clone(),
                to: t.clone(),
                image_from: is.clone(),
                image_to: it.clone(),
            });
        }
        let image_attrs = target.edge_attrs(is, it).expect("edge checked above");
        if !attrs_included(edge_attrs, image_attrs) {
            return Err(InvalidHomomorphism::EdgeAttributeMismatch {
                from: s.clone(),
                to: t.clone(),
            });
        }
    }
    Ok(())
}

/// Whether `mapping` is injective on its domain.
#[must_use]
pub fn is_monic(mapping: &NodeMap) -> bool {
    mapping.values().all_unique()
}

/// As [`is_monic`], reporting the first identified pair on failure.
pub fn check_monic(mapping: &NodeMap) -> Result<(), InvalidHomomorphism> {
    let mut seen: IndexMap<&NodeId, &NodeId> = IndexMap::new();
    for (node, image) in mapping {
        if let Some(first) = seen.insert(image, node) {
            return Err(InvalidHomomorphism::NotMonic {
                first: first.clone(),
                second: node.clone(),
                image: image.clone(),
            });
        }
    }
    Ok(())
}

/// Compose two node maps, `node ↦ g[f[node]]`. Keys of `f` whose image falls
/// outside `g`'s domain are dropped (partial composition).
#[must_use]
pub fn compose(f: &NodeMap, g: &NodeMap) -> NodeMap {
    f.iter()
        .filter_map(|(k, v)| g.get(v).map(|w| (k.clone(), w.clone())))
        .collect()
}

/// The identity map on a graph's nodes.
#[must_use]
pub fn identity(graph: &AttributedGraph) -> NodeMap {
    graph.nodes().map(|n| (n.clone(), n.clone())).collect()
}

/// The set of values taken by a map.
#[must_use]
pub fn image(mapping: &NodeMap) -> IndexSet<NodeId> {
    mapping.values().cloned().collect()
}

/// All keys mapped to `node`.
#[must_use]
pub fn preimages<'a>(mapping: &'a NodeMap, node: &NodeId) -> Vec<&'a NodeId> {
    mapping
        .iter()
        .filter(|(_, v)| *v == node)
        .map(|(k, _)| k)
        .collect()
}
