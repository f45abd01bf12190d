//! Rewriting inside a hierarchy.
//!
//! [`Hierarchy::rewrite`] applies a rule to one graph and then restores the
//! hierarchy invariant by propagating the change: restrictions (node and edge
//! deletions, clones, attribute removals) travel *backward* to the instances
//! of the rewritten graph, expansions (additions, merges, attribute
//! additions) travel *forward* to its types. The whole operation runs on a
//! working copy and is committed only after the updated hierarchy passes its
//! consistency check, so a failed rewrite leaves the hierarchy untouched.

use indexmap::{IndexMap, IndexSet};

use crate::category::{
    get_unique_map_from_pushout, get_unique_map_to_pullback, pullback, pullback_complement,
    pushout,
};
use crate::core::{GraphId, NodeId};
use crate::graph::AttributedGraph;
use crate::homomorphism::{NodeMap, check_homomorphism, check_monic, compose, preimages};
use crate::rule::{RewritingError, Rule};

use super::{Hierarchy, HierarchyEdge, Relation};

/// Controlled backward propagation: for each instance graph, the set of
/// preserved-graph copies each of its nodes should keep through a clone.
pub type PTyping = IndexMap<GraphId, IndexMap<NodeId, IndexSet<NodeId>>>;

/// Controlled forward propagation: for each type graph, the node each added
/// rhs node should be typed by.
pub type RhsTyping = IndexMap<GraphId, NodeMap>;

/// Outcome of a successful hierarchy rewrite.
#[derive(Clone, Debug, PartialEq)]
pub struct RewriteReport {
    /// Where the rule's rhs landed in the rewritten graph.
    pub rhs_instance: NodeMap,
    /// Every graph whose content changed, the rewrite target included.
    pub updated_graphs: IndexSet<GraphId>,
}

/// An instance graph after backward propagation.
struct Restricted {
    graph: AttributedGraph,
    /// New node to the node it descends from, total.
    to_old: NodeMap,
    /// New node to its counterpart in the restricted target; absent for
    /// nodes with no type there.
    to_mid: NodeMap,
}

/// A type graph after forward propagation.
struct Expanded {
    graph: AttributedGraph,
    /// Old node to its (possibly merged) successor, total.
    from_old: NodeMap,
    /// Typing of the rewritten target into the new graph; partial when
    /// added nodes stay untyped.
    from_t2: NodeMap,
    /// Image of the rewritten target's preserved part in the new graph,
    /// keyed by rewritten-target node.
    img_to_new: NodeMap,
}

impl Hierarchy {
    /// Apply `rule` at `instance` in the graph node `target` and propagate.
    ///
    /// `p_typing` restricts backward propagation: per instance graph, which
    /// copies of a cloned node each instance node follows (the default is all
    /// of them). `rhs_typing` directs forward propagation: per type graph,
    /// the type of each added node (the default leaves it untyped). With
    /// `strict`, the rewrite fails instead of modifying any graph other than
    /// the target.
    ///
    /// On error the hierarchy is left exactly as it was.
    pub fn rewrite(
        &mut self,
        target: &GraphId,
        rule: &Rule,
        instance: &NodeMap,
        p_typing: Option<&PTyping>,
        rhs_typing: Option<&RhsTyping>,
        strict: bool,
    ) -> Result<RewriteReport, RewritingError> {
        let mut scratch = self.clone();
        let report =
            scratch.rewrite_in_place(target, rule, instance, p_typing, rhs_typing, strict)?;
        *self = scratch;
        Ok(report)
    }

    fn rewrite_in_place(
        &mut self,
        target: &GraphId,
        rule: &Rule,
        instance: &NodeMap,
        p_typing: Option<&PTyping>,
        rhs_typing: Option<&RhsTyping>,
        strict: bool,
    ) -> Result<RewriteReport, RewritingError> {
        let target_graph = self.graph(target)?.clone();
        check_homomorphism(rule.lhs(), &target_graph, instance, true)
            .map_err(RewritingError::Instance)?;
        check_monic(instance).map_err(RewritingError::Instance)?;

        let ancestors = self.ancestors(target)?;
        let descendants = self.descendants(target)?;

        if let Some(pt) = p_typing {
            self.validate_p_typing(pt, &ancestors, rule, instance)?;
        }
        if let Some(rt) = rhs_typing {
            self.validate_rhs_typing(rt, &descendants, rule)?;
        }
        if strict {
            for gid in descendants.keys() {
                for added in rule.added_nodes() {
                    let typed = rhs_typing
                        .and_then(|rt| rt.get(gid))
                        .is_some_and(|entries| entries.contains_key(&added));
                    if !typed {
                        return Err(RewritingError::StrictnessViolation {
                            graph: gid.clone(),
                            node: added,
                        });
                    }
                }
            }
        }

        // Restrictive phase: carve the preserved part out of the target.
        let (mid, p_mid, mid_to_t) =
            pullback_complement(rule.p(), rule.lhs(), &target_graph, rule.p_lhs(), instance)?;

        // Backward propagation to every instance of the target.
        let mut restricted: IndexMap<GraphId, Restricted> = IndexMap::new();
        for (gid, typing) in &ancestors {
            let old = self.graph(gid)?;
            let r = restrict_instance(
                old,
                typing,
                &mid,
                &target_graph,
                &mid_to_t,
                &p_mid,
                p_typing.and_then(|pt| pt.get(gid)),
            )?;
            if strict && r.graph != *old {
                return Err(RewritingError::StrictSideEffect(gid.clone()));
            }
            restricted.insert(gid.clone(), r);
        }

        // Expansive phase: glue the rhs onto the preserved part.
        let (t2, mid_to_t2, rhs_to_t2) =
            pushout(rule.p(), &mid, rule.rhs(), &p_mid, rule.p_rhs())?;

        // Forward propagation to every type of the target.
        let mut expanded: IndexMap<GraphId, Expanded> = IndexMap::new();
        for (gid, typing) in &descendants {
            let old = self.graph(gid)?;
            let e = expand_type(
                old,
                typing,
                &mid,
                &mid_to_t,
                &t2,
                &mid_to_t2,
                &rhs_to_t2,
                rhs_typing.and_then(|rt| rt.get(gid)),
                gid,
            )?;
            if strict && e.graph != *old {
                return Err(RewritingError::StrictSideEffect(gid.clone()));
            }
            expanded.insert(gid.clone(), e);
        }

        // Commit, still on the working copy: graphs first, then the typing
        // mappings, then the relations.
        let mut updated: IndexSet<GraphId> = IndexSet::from([target.clone()]);
        self.set_graph(target, t2.clone());
        for (gid, r) in &restricted {
            if self.graph(gid)? != &r.graph {
                updated.insert(gid.clone());
            }
            self.set_graph(gid, r.graph.clone());
        }
        for (gid, e) in &expanded {
            if self.graph(gid)? != &e.graph {
                updated.insert(gid.clone());
            }
            self.set_graph(gid, e.graph.clone());
        }

        enum Kind<'a> {
            Target,
            Instance(&'a Restricted),
            Type(&'a Expanded),
            Other,
        }
        let kind = |gid: &GraphId| {
            if gid == target {
                Kind::Target
            } else if let Some(r) = restricted.get(gid) {
                Kind::Instance(r)
            } else if let Some(e) = expanded.get(gid) {
                Kind::Type(e)
            } else {
                Kind::Other
            }
        };

        let old_edges: Vec<(GraphId, GraphId, HierarchyEdge)> = self
            .typings()
            .map(|(f, t, e)| (f.clone(), t.clone(), e.clone()))
            .collect();
        for (u, v, edge) in old_edges {
            match edge {
                HierarchyEdge::Typing { mapping, .. } => {
                    let lifted = match (kind(&u), kind(&v)) {
                        (Kind::Instance(a), Kind::Target) => Some(compose(&a.to_mid, &mid_to_t2)),
                        (Kind::Instance(a), Kind::Instance(b)) => {
                            Some(lift_between_instances(a, b, &mapping)?)
                        }
                        (Kind::Instance(a), Kind::Type(d)) => {
                            Some(compose(&a.to_mid, &compose(&mid_to_t2, &d.from_t2)))
                        }
                        (Kind::Instance(a), Kind::Other) => Some(compose(&a.to_old, &mapping)),
                        (Kind::Target, Kind::Type(d)) => Some(d.from_t2.clone()),
                        (Kind::Type(d1), Kind::Type(d2)) => {
                            Some(lift_between_types(d1, d2, &mapping)?)
                        }
                        (Kind::Other, Kind::Type(d)) => Some(compose(&mapping, &d.from_old)),
                        // The remaining combinations cannot occur in a DAG.
                        _ => None,
                    };
                    if let Some(m) = lifted {
                        let total = m.len() == self.graph(&u)?.node_count();
                        self.set_typing_mapping(&u, &v, m, total);
                    }
                }
                HierarchyEdge::RuleTyping {
                    lhs_mapping,
                    rhs_mapping,
                    ..
                } => {
                    let lift_leg = |leg: &NodeMap| -> Result<Option<NodeMap>, RewritingError> {
                        match kind(&v) {
                            Kind::Target => lift_over_rewrite(leg, &mid_to_t, &mid_to_t2)
                                .map(Some)
                                .map_err(|()| RewritingError::RuleLifting {
                                    rule: u.clone(),
                                    graph: v.clone(),
                                }),
                            Kind::Instance(a) => lift_over_restriction(leg, a).map(Some).map_err(
                                |()| RewritingError::RuleLifting {
                                    rule: u.clone(),
                                    graph: v.clone(),
                                },
                            ),
                            Kind::Type(d) => Ok(Some(compose(leg, &d.from_old))),
                            Kind::Other => Ok(None),
                        }
                    };
                    if let (Some(lhs), Some(rhs)) =
                        (lift_leg(&lhs_mapping)?, lift_leg(&rhs_mapping)?)
                    {
                        let typed_rule = self.rule(&u)?;
                        let lhs_total = lhs.len() == typed_rule.lhs().node_count();
                        let rhs_total = rhs.len() == typed_rule.rhs().node_count();
                        self.set_rule_typing_mappings(&u, &v, lhs, rhs, lhs_total, rhs_total);
                    }
                }
            }
        }

        let old_relations: Vec<(GraphId, GraphId, Relation)> = self
            .relations()
            .map(|(l, r, rel)| (l.clone(), r.clone(), rel.clone()))
            .collect();
        for (left, right, relation) in old_relations {
            if matches!(kind(&left), Kind::Other) && matches!(kind(&right), Kind::Other) {
                continue;
            }
            let carry = |gid: &GraphId, n: &NodeId| -> Vec<NodeId> {
                match kind(gid) {
                    Kind::Target => preimages(&mid_to_t, n)
                        .into_iter()
                        .map(|m| mid_to_t2[m].clone())
                        .collect(),
                    Kind::Instance(r) => preimages(&r.to_old, n).into_iter().cloned().collect(),
                    Kind::Type(e) => e.from_old.get(n).cloned().into_iter().collect(),
                    Kind::Other => vec![n.clone()],
                }
            };
            let mut new_rel: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
            for (l_node, r_nodes) in &relation.rel {
                let mut images: IndexSet<NodeId> = IndexSet::new();
                for r_node in r_nodes {
                    images.extend(carry(&right, r_node));
                }
                if images.is_empty() {
                    continue;
                }
                for l_new in carry(&left, l_node) {
                    new_rel.entry(l_new).or_default().extend(images.iter().cloned());
                }
            }
            self.set_relation_pairs(&left, &right, new_rel);
        }

        self.check_consistency()?;
        Ok(RewriteReport {
            rhs_instance: rhs_to_t2,
            updated_graphs: updated,
        })
    }

    fn validate_p_typing(
        &self,
        p_typing: &PTyping,
        ancestors: &IndexMap<GraphId, NodeMap>,
        rule: &Rule,
        instance: &NodeMap,
    ) -> Result<(), RewritingError> {
        for (gid, entries) in p_typing {
            let first = || entries.keys().next().cloned().unwrap_or_else(|| NodeId::new(""));
            let Some(typing) = ancestors.get(gid) else {
                return Err(RewritingError::NonComposablePTyping {
                    graph: gid.clone(),
                    node: first(),
                });
            };
            let graph = self.graph(gid)?;
            for (node, keep) in entries {
                let fail = || RewritingError::NonComposablePTyping {
                    graph: gid.clone(),
                    node: node.clone(),
                };
                if !graph.has_node(node) {
                    return Err(fail());
                }
                let image = typing.get(node).ok_or_else(fail)?;
                let lhs_node = *preimages(instance, image).first().ok_or_else(fail)?;
                let class: IndexSet<&NodeId> =
                    preimages(rule.p_lhs(), lhs_node).into_iter().collect();
                if !keep.iter().all(|copy| class.contains(copy)) {
                    return Err(fail());
                }
            }
        }
        // Kept copies must shrink along typing chains between instances.
        for (upper, upper_entries) in p_typing {
            let below = self.descendants(upper)?;
            for (lower, lower_entries) in p_typing {
                if upper == lower {
                    continue;
                }
                let Some(upper_to_lower) = below.get(lower) else {
                    continue;
                };
                for (node, keep) in upper_entries {
                    let Some(image) = upper_to_lower.get(node) else {
                        continue;
                    };
                    if let Some(lower_keep) = lower_entries.get(image) {
                        if !keep.is_subset(lower_keep) {
                            return Err(RewritingError::NonComposablePTyping {
                                graph: lower.clone(),
                                node: image.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_rhs_typing(
        &self,
        rhs_typing: &RhsTyping,
        descendants: &IndexMap<GraphId, NodeMap>,
        rule: &Rule,
    ) -> Result<(), RewritingError> {
        for (gid, entries) in rhs_typing {
            if !descendants.contains_key(gid) {
                return Err(RewritingError::NonComposableRhsTyping {
                    graph: gid.clone(),
                    node: entries.keys().next().cloned().unwrap_or_else(|| NodeId::new("")),
                });
            }
            let graph = self.graph(gid)?;
            for (rhs_node, type_node) in entries {
                if !rule.rhs().has_node(rhs_node) || !graph.has_node(type_node) {
                    return Err(RewritingError::NonComposableRhsTyping {
                        graph: gid.clone(),
                        node: rhs_node.clone(),
                    });
                }
            }
        }
        // Directly given types must agree with composition along typing
        // chains between types.
        for (nearer, nearer_entries) in rhs_typing {
            let below = self.descendants(nearer)?;
            for (farther, farther_entries) in rhs_typing {
                if nearer == farther {
                    continue;
                }
                let Some(nearer_to_farther) = below.get(farther) else {
                    continue;
                };
                for (rhs_node, type_node) in nearer_entries {
                    if let (Some(via_path), Some(direct)) = (
                        nearer_to_farther.get(type_node),
                        farther_entries.get(rhs_node),
                    ) {
                        if via_path != direct {
                            return Err(RewritingError::NonComposableRhsTyping {
                                graph: farther.clone(),
                                node: rhs_node.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pull the restriction of the target back into one of its instances.
///
/// Nodes with no type in the target survive untouched; typed nodes follow
/// their type: removed with it, cloned alongside it (subject to the kept-copy
/// filter), attributes capped by it.
#[allow(clippy::too_many_arguments)]
fn restrict_instance(
    old: &AttributedGraph,
    typing: &NodeMap,
    mid: &AttributedGraph,
    target_graph: &AttributedGraph,
    mid_to_t: &NodeMap,
    p_mid: &NodeMap,
    keep: Option<&IndexMap<NodeId, IndexSet<NodeId>>>,
) -> Result<Restricted, RewritingError> {
    let typed_part = old.subgraph(typing.keys());
    let (pb, pb_old, pb_mid) = pullback(&typed_part, mid, target_graph, typing, mid_to_t)?;

    // Drop the copies the caller chose not to keep.
    let kept: Vec<NodeId> = pb
        .nodes()
        .filter(|n| {
            let chosen = keep.and_then(|k| k.get(&pb_old[*n]));
            let copy = preimages(p_mid, &pb_mid[*n]).into_iter().next();
            match (chosen, copy) {
                (Some(set), Some(c)) => set.contains(c),
                _ => true,
            }
        })
        .cloned()
        .collect();
    let filtered = pb.subgraph(&kept);

    // Reassemble under stable names: the first copy of a node keeps its
    // name, extra clones get fresh derived names.
    let mut graph = AttributedGraph::new();
    let mut to_old = NodeMap::new();
    let mut to_mid = NodeMap::new();
    let mut taken: IndexSet<NodeId> = old.nodes().cloned().collect();
    let mut rename = NodeMap::new();

    for n in old.nodes() {
        if !typing.contains_key(n) {
            graph.add_node(n.clone(), old.node_attrs(n)?.clone())?;
            to_old.insert(n.clone(), n.clone());
        }
    }
    let mut copies: IndexMap<&NodeId, Vec<&NodeId>> = IndexMap::new();
    for n in filtered.nodes() {
        copies.entry(&pb_old[n]).or_default().push(n);
    }
    for origin in old.nodes() {
        let Some(group) = copies.get(origin) else {
            continue;
        };
        for (i, &pb_node) in group.iter().enumerate() {
            let name = if i == 0 {
                origin.clone()
            } else {
                (1u64..)
                    .map(|k| NodeId::new(format!("{origin}{k}")))
                    .find(|c| !taken.contains(c))
                    .expect("an unused identifier exists")
            };
            taken.insert(name.clone());
            graph.add_node(name.clone(), filtered.node_attrs(pb_node)?.clone())?;
            to_old.insert(name.clone(), origin.clone());
            to_mid.insert(name.clone(), pb_mid[pb_node].clone());
            rename.insert(pb_node.clone(), name);
        }
    }

    for (s, t, attrs) in filtered.edges() {
        graph.add_edge(rename[s].clone(), rename[t].clone(), attrs.clone())?;
    }
    // Edges touching an untyped node are outside the rewrite's reach: keep
    // them as they were, duplicated onto every copy of a typed endpoint.
    for (s, t, attrs) in old.edges() {
        match (typing.contains_key(s), typing.contains_key(t)) {
            (false, false) => graph.add_edge(s.clone(), t.clone(), attrs.clone())?,
            (false, true) => {
                for t_copy in copies.get(t).into_iter().flatten() {
                    graph.add_edge(s.clone(), rename[*t_copy].clone(), attrs.clone())?;
                }
            }
            (true, false) => {
                for s_copy in copies.get(s).into_iter().flatten() {
                    graph.add_edge(rename[*s_copy].clone(), t.clone(), attrs.clone())?;
                }
            }
            (true, true) => {}
        }
    }

    Ok(Restricted {
        graph,
        to_old,
        to_mid,
    })
}

/// Push the expansion of the target forward into one of its types: merges of
/// typed nodes carry over, added attributes and edges accumulate, and added
/// nodes appear only through an explicit `rhs_typing` entry.
#[allow(clippy::too_many_arguments)]
fn expand_type(
    old: &AttributedGraph,
    typing: &NodeMap,
    mid: &AttributedGraph,
    mid_to_t: &NodeMap,
    t2: &AttributedGraph,
    mid_to_t2: &NodeMap,
    rhs_to_t2: &NodeMap,
    rhs_typing: Option<&NodeMap>,
    gid: &GraphId,
) -> Result<Expanded, RewritingError> {
    let mid_to_old = compose(mid_to_t, typing);
    let span = mid.subgraph(mid_to_old.keys());
    let span_to_t2: NodeMap = mid_to_t2
        .iter()
        .filter(|(n, _)| mid_to_old.contains_key(*n))
        .map(|(n, x)| (n.clone(), x.clone()))
        .collect();
    let image_nodes: IndexSet<NodeId> = span_to_t2.values().cloned().collect();
    let img = t2.subgraph(&image_nodes);

    let (graph, from_old, img_to_new) = pushout(&span, old, &img, &mid_to_old, &span_to_t2)?;

    let mut from_t2 = NodeMap::new();
    for x in t2.nodes() {
        if let Some(y) = img_to_new.get(x) {
            from_t2.insert(x.clone(), y.clone());
        }
    }
    if let Some(entries) = rhs_typing {
        for (rhs_node, type_node) in entries {
            let fail = || RewritingError::NonComposableRhsTyping {
                graph: gid.clone(),
                node: rhs_node.clone(),
            };
            let x = rhs_to_t2.get(rhs_node).ok_or_else(fail)?;
            let y = from_old.get(type_node).ok_or_else(fail)?;
            if from_t2.get(x).is_some_and(|existing| existing != y) {
                return Err(fail());
            }
            from_t2.insert(x.clone(), y.clone());
        }
        // The extended typing has to remain a homomorphism; it can only
        // break through the entries just inserted.
        check_homomorphism(t2, &graph, &from_t2, false).map_err(|_| {
            RewritingError::NonComposableRhsTyping {
                graph: gid.clone(),
                node: entries.keys().next().cloned().unwrap_or_else(|| NodeId::new("")),
            }
        })?;
    }

    Ok(Expanded {
        graph,
        from_old,
        from_t2,
        img_to_new,
    })
}

/// Recompose a typing between two restricted instances as the mediating map
/// into the lower one's pullback corner.
fn lift_between_instances(
    a: &Restricted,
    b: &Restricted,
    old_map: &NodeMap,
) -> Result<NodeMap, RewritingError> {
    let to_old_b = compose(&a.to_old, old_map);
    let mut lifted = get_unique_map_to_pullback(&b.to_old, &b.to_mid, &to_old_b, &a.to_mid)?;
    // Untyped nodes sit outside the pullback; their old typing carries over
    // whenever the image survived untouched.
    for (node, image) in &to_old_b {
        if !lifted.contains_key(node)
            && !a.to_mid.contains_key(node)
            && b.graph.has_node(image)
            && !b.to_mid.contains_key(image)
        {
            lifted.insert(node.clone(), image.clone());
        }
    }
    Ok(lifted)
}

/// Recompose a typing between two expanded types as the mediating map out of
/// the upper one's pushout corner.
fn lift_between_types(
    d1: &Expanded,
    d2: &Expanded,
    old_map: &NodeMap,
) -> Result<NodeMap, RewritingError> {
    let via_old = compose(old_map, &d2.from_old);
    let via_img: NodeMap = d1
        .img_to_new
        .keys()
        .filter_map(|x| d2.from_t2.get(x).map(|y| (x.clone(), y.clone())))
        .collect();
    Ok(get_unique_map_from_pushout(
        d1.graph.nodes().cloned(),
        &d1.from_old,
        &d1.img_to_new,
        &via_old,
        &via_img,
    )?)
}

/// Lift a rule typing leg over the rewrite of its target graph. Images that
/// were removed drop out; an image cloned into several copies is ambiguous
/// and fails.
fn lift_over_rewrite(
    leg: &NodeMap,
    mid_to_t: &NodeMap,
    mid_to_t2: &NodeMap,
) -> Result<NodeMap, ()> {
    let mut lifted = NodeMap::new();
    for (node, image) in leg {
        match preimages(mid_to_t, image).as_slice() {
            [] => {}
            [unique] => {
                lifted.insert(node.clone(), mid_to_t2[*unique].clone());
            }
            _ => return Err(()),
        }
    }
    Ok(lifted)
}

/// Same lifting over a backward-propagated instance graph.
fn lift_over_restriction(leg: &NodeMap, a: &Restricted) -> Result<NodeMap, ()> {
    let mut lifted = NodeMap::new();
    for (node, image) in leg {
        match preimages(&a.to_old, image).as_slice() {
            [] => {}
            [unique] => {
                lifted.insert(node.clone(), (*unique).clone());
            }
            _ => return Err(()),
        }
    }
    Ok(lifted)
}
