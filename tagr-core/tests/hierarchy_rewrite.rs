//! End-to-end rewriting scenarios on a diamond-shaped hierarchy.
//!
//! The fixture is the diamond `world -> {schema, roles} -> meta`: a bottom
//! graph typed two ways into a top graph, which is where the commutativity
//! invariant actually bites.

use cool_asserts::assert_matches;
use indexmap::{IndexMap, IndexSet};
use rstest::{fixture, rstest};

use tagr_core::attrs::{AttrSet, Attributes};
use tagr_core::graph::AttributedGraph;
use tagr_core::hierarchy::{Hierarchy, HierarchyEdge, PTyping, RhsTyping};
use tagr_core::homomorphism::NodeMap;
use tagr_core::rule::{RewritingError, Rule};
use tagr_core::{GraphId, NodeId};

fn attrs(pairs: &[(&str, &[&str])]) -> Attributes {
    pairs
        .iter()
        .map(|(k, vs)| ((*k).into(), AttrSet::finite(vs.iter().copied())))
        .collect()
}

fn map(pairs: &[(&str, &str)]) -> NodeMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).into(), (*v).into()))
        .collect()
}

fn typing_map(h: &Hierarchy, from: &str, to: &str) -> NodeMap {
    match h.typing(&from.into(), &to.into()).unwrap() {
        HierarchyEdge::Typing { mapping, .. } => mapping.clone(),
        HierarchyEdge::RuleTyping { .. } => panic!("expected a graph typing"),
    }
}

/// `world -> schema -> meta` and `world -> roles -> meta`.
#[fixture]
fn diamond() -> Hierarchy {
    let mut h = Hierarchy::new();
    let meta = AttributedGraph::from_parts(
        [(
            "e".into(),
            [("role".into(), AttrSet::Universal)]
                .into_iter()
                .collect::<Attributes>(),
        )],
        [("e".into(), "e".into(), Attributes::new())],
    )
    .unwrap();
    let schema = AttributedGraph::from_parts(
        [
            ("person".into(), attrs(&[("role", &["agent"])])),
            ("thing".into(), Attributes::new()),
        ],
        [("person".into(), "thing".into(), Attributes::new())],
    )
    .unwrap();
    let roles = AttributedGraph::from_parts(
        [
            ("active".into(), attrs(&[("role", &["agent"])])),
            ("passive".into(), Attributes::new()),
        ],
        [("active".into(), "passive".into(), Attributes::new())],
    )
    .unwrap();
    let world = AttributedGraph::from_parts(
        [
            ("alice".into(), attrs(&[("role", &["agent"])])),
            ("bob".into(), attrs(&[("role", &["agent"])])),
            ("box".into(), Attributes::new()),
        ],
        [
            ("alice".into(), "box".into(), Attributes::new()),
            ("bob".into(), "box".into(), Attributes::new()),
        ],
    )
    .unwrap();

    h.add_graph("meta".into(), meta, Attributes::new()).unwrap();
    h.add_graph("schema".into(), schema, Attributes::new()).unwrap();
    h.add_graph("roles".into(), roles, Attributes::new()).unwrap();
    h.add_graph("world".into(), world, Attributes::new()).unwrap();
    h.add_typing(
        "schema".into(),
        "meta".into(),
        map(&[("person", "e"), ("thing", "e")]),
        true,
        Attributes::new(),
    )
    .unwrap();
    h.add_typing(
        "roles".into(),
        "meta".into(),
        map(&[("active", "e"), ("passive", "e")]),
        true,
        Attributes::new(),
    )
    .unwrap();
    h.add_typing(
        "world".into(),
        "schema".into(),
        map(&[("alice", "person"), ("bob", "person"), ("box", "thing")]),
        true,
        Attributes::new(),
    )
    .unwrap();
    h.add_typing(
        "world".into(),
        "roles".into(),
        map(&[("alice", "active"), ("bob", "active"), ("box", "passive")]),
        true,
        Attributes::new(),
    )
    .unwrap();
    h
}

fn single_node_pattern(id: &str) -> AttributedGraph {
    AttributedGraph::from_parts([(id.into(), Attributes::new())], []).unwrap()
}

#[rstest]
fn diamond_commutes(diamond: Hierarchy) {
    diamond.check_consistency().unwrap();
    assert_eq!(diamond.ancestors(&"meta".into()).unwrap().len(), 3);
    assert_eq!(diamond.descendants(&"world".into()).unwrap().len(), 3);
    // Both paths world -> meta compose to the same map.
    let via_schema = diamond
        .compose_path_typing(&["world".into(), "schema".into(), "meta".into()])
        .unwrap();
    let via_roles = diamond
        .compose_path_typing(&["world".into(), "roles".into(), "meta".into()])
        .unwrap();
    assert_eq!(via_schema, via_roles);
}

#[rstest]
fn clone_in_the_middle_propagates_to_instances(mut diamond: Hierarchy) {
    diamond
        .add_relation(
            "schema".into(),
            "roles".into(),
            [(NodeId::from("person"), IndexSet::from([NodeId::from("active")]))]
                .into_iter()
                .collect(),
            Attributes::new(),
        )
        .unwrap();

    let mut rule = Rule::identity(single_node_pattern("x"));
    rule.inject_clone_node(&"x".into()).unwrap();
    let report = diamond
        .rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "person")]),
            None,
            None,
            false,
        )
        .unwrap();

    // schema gained a copy of person; each instance of person in world
    // followed both copies.
    let schema = diamond.graph(&"schema".into()).unwrap();
    assert_eq!(schema.node_count(), 3);
    assert!(schema.has_node(&"person".into()) && schema.has_node(&"person1".into()));
    let world = diamond.graph(&"world".into()).unwrap();
    assert_eq!(world.node_count(), 5);
    for n in ["alice", "alice1", "bob", "bob1", "box"] {
        assert!(world.has_node(&n.into()), "missing {n}");
    }
    // The two copies of alice are typed by the two copies of person.
    let typing = typing_map(&diamond, "world", "schema");
    let images: IndexSet<&NodeId> = [&typing[&NodeId::from("alice")], &typing[&NodeId::from("alice1")]]
        .into_iter()
        .collect();
    assert_eq!(images.len(), 2);
    // Both edges alice -> box survived on both copies.
    assert!(world.has_edge(&"alice".into(), &"box".into()));
    assert!(world.has_edge(&"alice1".into(), &"box".into()));
    // roles and meta are untouched.
    assert_eq!(
        report.updated_graphs,
        IndexSet::from([GraphId::from("schema"), GraphId::from("world")])
    );
    // The relation followed the clone.
    let rel = diamond.relation(&"schema".into(), &"roles".into()).unwrap();
    assert_eq!(rel.rel.len(), 2);
    assert!(rel.rel[&NodeId::from("person1")].contains(&NodeId::from("active")));
    diamond.check_consistency().unwrap();
}

#[rstest]
fn p_typing_selects_the_kept_copy(mut diamond: Hierarchy) {
    let mut rule = Rule::identity(single_node_pattern("x"));
    let (p_clone, _) = rule.inject_clone_node(&"x".into()).unwrap();

    let mut keep: PTyping = IndexMap::new();
    keep.insert(
        "world".into(),
        [
            (NodeId::from("alice"), IndexSet::from([NodeId::from("x")])),
            (NodeId::from("bob"), IndexSet::from([p_clone.clone()])),
        ]
        .into_iter()
        .collect(),
    );
    diamond
        .rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "person")]),
            Some(&keep),
            None,
            false,
        )
        .unwrap();

    // Each of alice and bob kept exactly one copy, following different
    // copies of person.
    let world = diamond.graph(&"world".into()).unwrap();
    assert_eq!(world.node_count(), 3);
    let typing = typing_map(&diamond, "world", "schema");
    assert_ne!(
        typing[&NodeId::from("alice")],
        typing[&NodeId::from("bob")]
    );
    assert_eq!(typing[&NodeId::from("box")], NodeId::from("thing"));
    diamond.check_consistency().unwrap();
}

#[rstest]
fn p_typing_for_a_non_instance_is_rejected(mut diamond: Hierarchy) {
    let before = diamond.clone();
    let mut rule = Rule::identity(single_node_pattern("x"));
    rule.inject_clone_node(&"x".into()).unwrap();
    let mut keep: PTyping = IndexMap::new();
    keep.insert(
        "meta".into(),
        [(NodeId::from("e"), IndexSet::from([NodeId::from("x")]))]
            .into_iter()
            .collect(),
    );
    assert_matches!(
        diamond.rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "person")]),
            Some(&keep),
            None,
            false,
        ),
        Err(RewritingError::NonComposablePTyping { .. })
    );
    assert_eq!(diamond, before);
}

#[rstest]
fn removal_propagates_backward(mut diamond: Hierarchy) {
    let mut rule = Rule::identity(single_node_pattern("x"));
    rule.inject_remove_node(&"x".into()).unwrap();
    let report = diamond
        .rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "thing")]),
            None,
            None,
            false,
        )
        .unwrap();

    assert!(!diamond.graph(&"schema".into()).unwrap().has_node(&"thing".into()));
    let world = diamond.graph(&"world".into()).unwrap();
    assert!(!world.has_node(&"box".into()));
    assert_eq!(world.edge_count(), 0);
    // roles still has passive: it sits on the other side of the diamond.
    assert!(diamond.graph(&"roles".into()).unwrap().has_node(&"passive".into()));
    assert_eq!(
        report.updated_graphs,
        IndexSet::from([GraphId::from("schema"), GraphId::from("world")])
    );
    diamond.check_consistency().unwrap();
}

#[rstest]
fn merge_at_the_bottom_propagates_forward(mut diamond: Hierarchy) {
    let pattern = AttributedGraph::from_parts(
        [("u".into(), Attributes::new()), ("v".into(), Attributes::new())],
        [],
    )
    .unwrap();
    let mut rule = Rule::identity(pattern);
    let merged_rhs = rule.inject_merge_nodes(&["u".into(), "v".into()]).unwrap();

    let report = diamond
        .rewrite(
            &"world".into(),
            &rule,
            &map(&[("u", "alice"), ("v", "box")]),
            None,
            None,
            false,
        )
        .unwrap();

    // alice and box merged; their distinct types merged above them.
    let merged = &report.rhs_instance[&merged_rhs];
    let world = diamond.graph(&"world".into()).unwrap();
    assert_eq!(world.node_count(), 2);
    assert!(world.has_node(merged));
    let schema = diamond.graph(&"schema".into()).unwrap();
    assert_eq!(schema.node_count(), 1);
    // The person -> thing edge folded into a self-loop.
    let schema_merged = schema.nodes().next().unwrap();
    assert!(schema.has_edge(schema_merged, schema_merged));
    assert_eq!(diamond.graph(&"roles".into()).unwrap().node_count(), 1);
    // meta already had a single node; nothing to merge there.
    assert_eq!(diamond.graph(&"meta".into()).unwrap().node_count(), 1);
    assert_eq!(
        typing_map(&diamond, "world", "schema")[merged],
        *schema_merged
    );
    assert!(!report.updated_graphs.contains(&GraphId::from("meta")));
    diamond.check_consistency().unwrap();
}

#[rstest]
fn added_node_stays_untyped_by_default(mut diamond: Hierarchy) {
    let mut rule = Rule::identity(AttributedGraph::new());
    rule.inject_add_node("carol".into(), attrs(&[("role", &["agent"])]))
        .unwrap();

    diamond
        .rewrite(&"world".into(), &rule, &NodeMap::new(), None, None, false)
        .unwrap();

    let world = diamond.graph(&"world".into()).unwrap();
    assert!(world.has_node(&"carol".into()));
    // carol has no type anywhere; the typings became partial.
    assert!(diamond
        .node_type(&"world".into(), &"carol".into())
        .unwrap()
        .is_empty());
    let typing = typing_map(&diamond, "world", "schema");
    assert!(!typing.contains_key(&NodeId::from("carol")));
    assert_eq!(typing.len(), 3);
    diamond.check_consistency().unwrap();
}

#[rstest]
fn strict_rewrite_requires_complete_rhs_typing(mut diamond: Hierarchy) {
    let before = diamond.clone();
    let mut rule = Rule::identity(AttributedGraph::new());
    rule.inject_add_node("carol".into(), Attributes::new()).unwrap();

    assert_matches!(
        diamond.rewrite(&"world".into(), &rule, &NodeMap::new(), None, None, true),
        Err(RewritingError::StrictnessViolation { .. })
    );
    assert_eq!(diamond, before);

    let mut typing: RhsTyping = IndexMap::new();
    typing.insert("schema".into(), map(&[("carol", "person")]));
    typing.insert("roles".into(), map(&[("carol", "active")]));
    typing.insert("meta".into(), map(&[("carol", "e")]));
    diamond
        .rewrite(
            &"world".into(),
            &rule,
            &NodeMap::new(),
            None,
            Some(&typing),
            true,
        )
        .unwrap();

    assert_eq!(
        typing_map(&diamond, "world", "schema")[&NodeId::from("carol")],
        NodeId::from("person")
    );
    // Fully typed addition leaves the type graphs themselves unchanged.
    assert_eq!(diamond.graph(&"schema".into()).unwrap().node_count(), 2);
    diamond.check_consistency().unwrap();
}

#[rstest]
fn strict_rewrite_rejects_side_effects(mut diamond: Hierarchy) {
    let before = diamond.clone();
    let mut rule = Rule::identity(single_node_pattern("x"));
    rule.inject_remove_node(&"x".into()).unwrap();
    assert_matches!(
        diamond.rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "thing")]),
            None,
            None,
            true,
        ),
        Err(RewritingError::StrictSideEffect(_))
    );
    assert_eq!(diamond, before);
}

#[rstest]
fn incoherent_rhs_typing_rolls_back(mut diamond: Hierarchy) {
    let before = diamond.clone();
    // carol -> alice's type would need a person -> person edge in schema.
    let mut rule = Rule::identity(single_node_pattern("u"));
    rule.inject_add_node("carol".into(), Attributes::new()).unwrap();
    rule.inject_add_edge("carol".into(), "u".into(), Attributes::new())
        .unwrap();
    let mut typing: RhsTyping = IndexMap::new();
    typing.insert("schema".into(), map(&[("carol", "person")]));

    assert_matches!(
        diamond.rewrite(
            &"world".into(),
            &rule,
            &map(&[("u", "alice")]),
            None,
            Some(&typing),
            false,
        ),
        Err(RewritingError::NonComposableRhsTyping { .. })
    );
    assert_eq!(diamond, before);
}

#[rstest]
fn invalid_instance_rolls_back(mut diamond: Hierarchy) {
    let before = diamond.clone();
    let rule = Rule::identity(single_node_pattern("x"));
    assert_matches!(
        diamond.rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "nowhere")]),
            None,
            None,
            false,
        ),
        Err(RewritingError::Instance(_))
    );
    assert_eq!(diamond, before);
}

#[rstest]
fn rule_typings_follow_the_rewrite(mut diamond: Hierarchy) {
    let rule_node = Rule::identity(single_node_pattern("x"));
    diamond
        .add_rule("tracked".into(), rule_node, Attributes::new())
        .unwrap();
    diamond
        .add_rule_typing(
            "tracked".into(),
            "schema".into(),
            map(&[("x", "person")]),
            map(&[("x", "person")]),
            Attributes::new(),
        )
        .unwrap();

    // Removing an unrelated node keeps the rule typing intact.
    let mut removal = Rule::identity(single_node_pattern("y"));
    removal.inject_remove_node(&"y".into()).unwrap();
    diamond
        .rewrite(
            &"schema".into(),
            &removal,
            &map(&[("y", "thing")]),
            None,
            None,
            false,
        )
        .unwrap();
    match diamond.typing(&"tracked".into(), &"schema".into()).unwrap() {
        HierarchyEdge::RuleTyping { lhs_mapping, .. } => {
            assert_eq!(lhs_mapping[&NodeId::from("x")], NodeId::from("person"));
        }
        HierarchyEdge::Typing { .. } => panic!("expected a rule typing"),
    }

    // Cloning the image makes the lifting ambiguous: rejected, no changes.
    let before = diamond.clone();
    let mut cloning = Rule::identity(single_node_pattern("z"));
    cloning.inject_clone_node(&"z".into()).unwrap();
    assert_matches!(
        diamond.rewrite(
            &"schema".into(),
            &cloning,
            &map(&[("z", "person")]),
            None,
            None,
            false,
        ),
        Err(RewritingError::RuleLifting { .. })
    );
    assert_eq!(diamond, before);
}

#[rstest]
fn hierarchy_round_trips_through_json(mut diamond: Hierarchy) {
    let json = diamond.to_json().unwrap();
    let back = Hierarchy::from_json(&json).unwrap();
    assert_eq!(diamond, back);

    // Still equal after a rewrite on the reloaded copy.
    let mut rule = Rule::identity(single_node_pattern("x"));
    rule.inject_clone_node(&"x".into()).unwrap();
    let mut reloaded = back;
    for h in [&mut diamond, &mut reloaded] {
        h.rewrite(
            &"schema".into(),
            &rule,
            &map(&[("x", "person")]),
            None,
            None,
            false,
        )
        .unwrap();
    }
    assert_eq!(diamond, reloaded);
}
