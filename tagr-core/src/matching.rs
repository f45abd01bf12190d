//! Subgraph-isomorphism search of a pattern inside a host graph.
//!
//! [`find_matching`] returns every injective node map from the pattern into
//! the host (optionally restricted to a node subset) that preserves edges,
//! keeps pattern attributes within the images' attributes, and respects a
//! pair of external typings when supplied. The search is exact backtracking
//! with candidate pruning by degree, attributes and typing; subgraph
//! isomorphism is NP-hard, so worst-case cost is exponential in the pattern
//! size by design.

use fxhash::FxHashSet;
use indexmap::IndexSet;
use itertools::Itertools;

use crate::attrs::attrs_included;
use crate::core::NodeId;
use crate::graph::AttributedGraph;
use crate::homomorphism::NodeMap;

/// Find all matches of `pattern` in `host`.
///
/// - `node_subset` restricts the search to the induced subgraph of the host
///   on those nodes.
/// - `host_typing` and `pattern_typing` constrain matches: a pattern node may
///   only map to a host node with the same type, whenever both typings define
///   one.
#[must_use]
pub fn find_matching(
    host: &AttributedGraph,
    pattern: &AttributedGraph,
    node_subset: Option<&IndexSet<NodeId>>,
    host_typing: Option<&NodeMap>,
    pattern_typing: Option<&NodeMap>,
) -> Vec<NodeMap> {
    let restricted;
    let host = match node_subset {
        Some(subset) => {
            restricted = host.subgraph(subset.iter());
            &restricted
        }
        None => host,
    };
    if pattern.node_count() > host.node_count() {
        return Vec::new();
    }

    // Candidate host nodes per pattern node, pruned up front.
    let pattern_nodes: Vec<&NodeId> = pattern.nodes().collect();
    let candidates: Vec<Vec<&NodeId>> = pattern_nodes
        .iter()
        .map(|p| {
            host.nodes()
                .filter(|h| compatible(host, pattern, h, p, host_typing, pattern_typing))
                .collect()
        })
        .collect();
    if candidates.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    // Most-constrained-first assignment order.
    let order: Vec<usize> = (0..pattern_nodes.len())
        .sorted_by_key(|&i| candidates[i].len())
        .collect();

    let mut matches = Vec::new();
    let mut assigned: Vec<Option<&NodeId>> = vec![None; pattern_nodes.len()];
    let mut used: FxHashSet<&NodeId> = FxHashSet::default();
    backtrack(
        host,
        pattern,
        &pattern_nodes,
        &candidates,
        &order,
        0,
        &mut assigned,
        &mut used,
        &mut matches,
    );
    matches
}

fn compatible(
    host: &AttributedGraph,
    pattern: &AttributedGraph,
    h: &NodeId,
    p: &NodeId,
    host_typing: Option<&NodeMap>,
    pattern_typing: Option<&NodeMap>,
) -> bool {
    let p_attrs = pattern.node_attrs(p).expect("pattern node");
    let h_attrs = host.node_attrs(h).expect("host node");
    if !attrs_included(p_attrs, h_attrs) {
        return false;
    }
    if host.successors(h).expect("host node").count()
        < pattern.successors(p).expect("pattern node").count()
        || host.predecessors(h).expect("host node").count()
            < pattern.predecessors(p).expect("pattern node").count()
    {
        return false;
    }
    if let (Some(ht), Some(pt)) = (host_typing, pattern_typing) {
        if let (Some(h_type), Some(p_type)) = (ht.get(h), pt.get(p)) {
            if h_type != p_type {
                return false;
            }
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn backtrack<'h>(
    host: &'h AttributedGraph,
    pattern: &AttributedGraph,
    pattern_nodes: &[&NodeId],
    candidates: &[Vec<&'h NodeId>],
    order: &[usize],
    depth: usize,
    assigned: &mut Vec<Option<&'h NodeId>>,
    used: &mut FxHashSet<&'h NodeId>,
    matches: &mut Vec<NodeMap>,
) {
    if depth == order.len() {
        matches.push(
            pattern_nodes
                .iter()
                .zip(assigned.iter())
                .map(|(p, h)| ((*p).clone(), h.expect("complete assignment").clone()))
                .collect(),
        );
        return;
    }
    let slot = order[depth];
    'cands: for &h in &candidates[slot] {
        if used.contains(h) {
            continue;
        }
        // Check every pattern edge between this node and the assigned ones.
        for (other, assignment) in assigned.iter().enumerate() {
            let Some(g) = assignment else { continue };
            for (ps, pt, hs, ht) in [
                (pattern_nodes[slot], pattern_nodes[other], h, *g),
                (pattern_nodes[other], pattern_nodes[slot], *g, h),
            ] {
                if let Ok(p_edge) = pattern.edge_attrs(ps, pt) {
                    match host.edge_attrs(hs, ht) {
                        Ok(h_edge) if attrs_included(p_edge, h_edge) => {}
                        _ => continue 'cands,
                    }
                }
            }
        }
        // Self-loop constraint.
        if let Ok(p_loop) = pattern.edge_attrs(pattern_nodes[slot], pattern_nodes[slot]) {
            match host.edge_attrs(h, h) {
                Ok(h_loop) if attrs_included(p_loop, h_loop) => {}
                _ => continue 'cands,
            }
        }
        assigned[slot] = Some(h);
        used.insert(h);
        backtrack(
            host,
            pattern,
            pattern_nodes,
            candidates,
            order,
            depth + 1,
            assigned,
            used,
            matches,
        );
        used.remove(h);
        assigned[slot] = None;
    }
}
