//! JSON serialization of graphs, rules, and hierarchies.
//!
//! Every public type round-trips through a dedicated `*Ser` shadow struct;
//! the shadows, not the in-memory types, are the on-disk contract.
//! Deserialization rebuilds through the ordinary constructors, so a payload
//! with duplicate nodes, an invalid homomorphism, or non-commuting typings
//! is rejected with the same errors as programmatic construction.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::attrs::Attributes;
use crate::core::{GraphId, NodeId};
use crate::graph::AttributedGraph;
use crate::hierarchy::{Hierarchy, HierarchyEdge, HierarchyError, HierarchyNode};
use crate::homomorphism::NodeMap;
use crate::rule::Rule;

#[derive(Serialize, Deserialize)]
struct NodeSer {
    id: NodeId,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct EdgeSer {
    from: NodeId,
    to: NodeId,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct GraphSer {
    nodes: Vec<NodeSer>,
    edges: Vec<EdgeSer>,
}

impl From<&AttributedGraph> for GraphSer {
    fn from(graph: &AttributedGraph) -> Self {
        GraphSer {
            nodes: graph
                .nodes()
                .map(|id| NodeSer {
                    id: id.clone(),
                    attrs: graph.node_attrs(id).expect("iterating own nodes").clone(),
                })
                .collect(),
            edges: graph
                .edges()
                .map(|(from, to, attrs)| EdgeSer {
                    from: from.clone(),
                    to: to.clone(),
                    attrs: attrs.clone(),
                })
                .collect(),
        }
    }
}

impl Serialize for AttributedGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GraphSer::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributedGraph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ser = GraphSer::deserialize(deserializer)?;
        AttributedGraph::from_parts(
            ser.nodes.into_iter().map(|n| (n.id, n.attrs)),
            ser.edges.into_iter().map(|e| (e.from, e.to, e.attrs)),
        )
        .map_err(de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct RuleSer {
    lhs: AttributedGraph,
    p: AttributedGraph,
    rhs: AttributedGraph,
    p_lhs: NodeMap,
    p_rhs: NodeMap,
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RuleSer {
            lhs: self.lhs().clone(),
            p: self.p().clone(),
            rhs: self.rhs().clone(),
            p_lhs: self.p_lhs().clone(),
            p_rhs: self.p_rhs().clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ser = RuleSer::deserialize(deserializer)?;
        Rule::new(ser.lhs, ser.p, ser.rhs, ser.p_lhs, ser.p_rhs).map_err(de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct GraphNodeSer {
    id: GraphId,
    graph: AttributedGraph,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct RuleNodeSer {
    id: GraphId,
    rule: Rule,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct TypingSer {
    from: GraphId,
    to: GraphId,
    mapping: NodeMap,
    total: bool,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct RuleTypingSer {
    from: GraphId,
    to: GraphId,
    lhs_mapping: NodeMap,
    rhs_mapping: NodeMap,
    lhs_total: bool,
    rhs_total: bool,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct RelationSer {
    from: GraphId,
    to: GraphId,
    rel: indexmap::IndexMap<NodeId, indexmap::IndexSet<NodeId>>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    attrs: Attributes,
}

#[derive(Serialize, Deserialize)]
struct HierarchySer {
    graphs: Vec<GraphNodeSer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rules: Vec<RuleNodeSer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    typing: Vec<TypingSer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rule_typing: Vec<RuleTypingSer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    relations: Vec<RelationSer>,
}

impl From<&Hierarchy> for HierarchySer {
    fn from(hierarchy: &Hierarchy) -> Self {
        let mut ser = HierarchySer {
            graphs: vec![],
            rules: vec![],
            typing: vec![],
            rule_typing: vec![],
            relations: vec![],
        };
        for id in hierarchy.node_ids() {
            match hierarchy.node(id).expect("iterating own nodes") {
                HierarchyNode::Graph { graph, attrs } => ser.graphs.push(GraphNodeSer {
                    id: id.clone(),
                    graph: graph.clone(),
                    attrs: attrs.clone(),
                }),
                HierarchyNode::Rule { rule, attrs } => ser.rules.push(RuleNodeSer {
                    id: id.clone(),
                    rule: rule.clone(),
                    attrs: attrs.clone(),
                }),
            }
        }
        for (from, to, edge) in hierarchy.typings() {
            match edge {
                HierarchyEdge::Typing {
                    mapping,
                    total,
                    attrs,
                } => ser.typing.push(TypingSer {
                    from: from.clone(),
                    to: to.clone(),
                    mapping: mapping.clone(),
                    total: *total,
                    attrs: attrs.clone(),
                }),
                HierarchyEdge::RuleTyping {
                    lhs_mapping,
                    rhs_mapping,
                    lhs_total,
                    rhs_total,
                    attrs,
                } => ser.rule_typing.push(RuleTypingSer {
                    from: from.clone(),
                    to: to.clone(),
                    lhs_mapping: lhs_mapping.clone(),
                    rhs_mapping: rhs_mapping.clone(),
                    lhs_total: *lhs_total,
                    rhs_total: *rhs_total,
                    attrs: attrs.clone(),
                }),
            }
        }
        for (left, right, relation) in hierarchy.relations() {
            ser.relations.push(RelationSer {
                from: left.clone(),
                to: right.clone(),
                rel: relation.rel.clone(),
                attrs: relation.attrs.clone(),
            });
        }
        ser
    }
}

impl TryFrom<HierarchySer> for Hierarchy {
    type Error = HierarchyError;

    fn try_from(ser: HierarchySer) -> Result<Self, Self::Error> {
        let mut hierarchy = Hierarchy::new();
        for g in ser.graphs {
            hierarchy.add_graph(g.id, g.graph, g.attrs)?;
        }
        for r in ser.rules {
            hierarchy.add_rule(r.id, r.rule, r.attrs)?;
        }
        for t in ser.typing {
            hierarchy.add_typing(t.from, t.to, t.mapping, t.total, t.attrs)?;
        }
        for rt in ser.rule_typing {
            hierarchy.add_rule_typing(rt.from, rt.to, rt.lhs_mapping, rt.rhs_mapping, rt.attrs)?;
        }
        for rel in ser.relations {
            hierarchy.add_relation(rel.from, rel.to, rel.rel, rel.attrs)?;
        }
        Ok(hierarchy)
    }
}

impl Serialize for Hierarchy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        HierarchySer::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hierarchy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ser = HierarchySer::deserialize(deserializer)?;
        Hierarchy::try_from(ser).map_err(de::Error::custom)
    }
}

impl Hierarchy {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from a JSON string, revalidating every graph, typing,
    /// and the commutativity invariant.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrSet;
    use cool_asserts::assert_matches;
    use indexmap::IndexMap;

    fn colored_graph() -> AttributedGraph {
        let attrs: Attributes = [("color".into(), AttrSet::finite(["red"]))]
            .into_iter()
            .collect();
        AttributedGraph::from_parts(
            [("a".into(), attrs), ("b".into(), Attributes::new())],
            [("a".into(), "b".into(), Attributes::new())],
        )
        .unwrap()
    }

    #[test]
    fn graph_round_trip() {
        let graph = colored_graph();
        let json = serde_json::to_string(&graph).unwrap();
        let back: AttributedGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(graph, back);
    }

    #[test]
    fn empty_attrs_omitted_from_wire() {
        let graph = colored_graph();
        let value = serde_json::to_value(&graph).unwrap();
        let nodes = value["nodes"].as_array().unwrap();
        assert!(nodes[0].get("attrs").is_some());
        assert!(nodes[1].get("attrs").is_none());
    }

    #[test]
    fn duplicate_node_payload_rejected() {
        let json = r#"{"nodes": [{"id": "a"}, {"id": "a"}], "edges": []}"#;
        assert_matches!(
            serde_json::from_str::<AttributedGraph>(json),
            Err(_)
        );
    }

    #[test]
    fn rule_round_trip_preserves_clone_structure() {
        let pattern = AttributedGraph::from_parts(
            [("x".into(), Attributes::new())],
            [],
        )
        .unwrap();
        let mut rule = Rule::identity(pattern);
        rule.inject_clone_node(&"x".into()).unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
        assert_eq!(back.cloned_nodes().len(), 1);
    }

    #[test]
    fn invalid_rule_leg_rejected() {
        let json = r#"{
            "lhs": {"nodes": [{"id": "x"}], "edges": []},
            "p": {"nodes": [{"id": "x"}], "edges": []},
            "rhs": {"nodes": [{"id": "x"}], "edges": []},
            "p_lhs": {"x": "missing"},
            "p_rhs": {"x": "x"}
        }"#;
        assert_matches!(serde_json::from_str::<Rule>(json), Err(_));
    }

    #[test]
    fn hierarchy_round_trip() {
        let mut h = Hierarchy::new();
        h.add_graph("g".into(), colored_graph(), Attributes::new())
            .unwrap();
        h.add_graph(
            "t".into(),
            AttributedGraph::from_parts(
                [(
                    "n".into(),
                    [("color".into(), AttrSet::Universal)]
                        .into_iter()
                        .collect::<Attributes>(),
                )],
                [("n".into(), "n".into(), Attributes::new())],
            )
            .unwrap(),
            Attributes::new(),
        )
        .unwrap();
        let mapping: NodeMap = [("a".into(), "n".into()), ("b".into(), "n".into())]
            .into_iter()
            .collect();
        h.add_typing("g".into(), "t".into(), mapping, true, Attributes::new())
            .unwrap();

        let json = h.to_json().unwrap();
        let back = Hierarchy::from_json(&json).unwrap();
        assert_eq!(h, back);
        back.check_consistency().unwrap();
    }

    #[test]
    fn non_commuting_payload_rejected() {
        // Two parallel paths g -> t that disagree on "a".
        let mut h = Hierarchy::new();
        let two = AttributedGraph::from_parts(
            [("a".into(), Attributes::new())],
            [],
        )
        .unwrap();
        let mid = AttributedGraph::from_parts(
            [("m".into(), Attributes::new())],
            [],
        )
        .unwrap();
        let top = AttributedGraph::from_parts(
            [("u".into(), Attributes::new()), ("v".into(), Attributes::new())],
            [],
        )
        .unwrap();
        h.add_graph("g".into(), two, Attributes::new()).unwrap();
        h.add_graph("m".into(), mid, Attributes::new()).unwrap();
        h.add_graph("t".into(), top, Attributes::new()).unwrap();
        let to_mid: NodeMap = [("a".into(), "m".into())].into_iter().collect();
        let mid_up: NodeMap = [("m".into(), "u".into())].into_iter().collect();
        h.add_typing("g".into(), "m".into(), to_mid, true, Attributes::new())
            .unwrap();
        h.add_typing("m".into(), "t".into(), mid_up, true, Attributes::new())
            .unwrap();

        let mut value = serde_json::to_value(&h).unwrap();
        // Splice in a direct typing that contradicts the composite.
        value["typing"].as_array_mut().unwrap().push(serde_json::json!({
            "from": "g",
            "to": "t",
            "mapping": {"a": "v"},
            "total": true
        }));
        let json = serde_json::to_string(&value).unwrap();
        assert_matches!(Hierarchy::from_json(&json), Err(_));

        let mut mapping: IndexMap<NodeId, NodeId> = IndexMap::new();
        mapping.insert("a".into(), "u".into());
        // The agreeing direct typing is accepted.
        h.add_typing("g".into(), "t".into(), mapping, true, Attributes::new())
            .unwrap();
    }
}
