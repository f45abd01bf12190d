//! Universal constructions over attributed graphs.
//!
//! Pullback, pushout, pullback complement and image factorization are the
//! sole mechanism by which rewriting and hierarchy propagation edit graphs:
//! no other module performs ad-hoc graph surgery. All constructions are pure;
//! they validate their input homomorphisms and return fresh graphs together
//! with the homomorphisms of the constructed square.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::attrs::{Attributes, attrs_difference, attrs_intersect, attrs_union};
use crate::core::NodeId;
use crate::graph::AttributedGraph;
use crate::homomorphism::{
    InvalidHomomorphism, NodeMap, check_homomorphism, check_monic, preimages,
};

/// The result of a span-completing construction: the new graph and the two
/// homomorphisms attaching it to the input cospan or span.
pub type SquareCorner = (AttributedGraph, NodeMap, NodeMap);

fn fresh_in(graph: &AttributedGraph, base: &str) -> NodeId {
    let candidate = NodeId::new(base);
    if !graph.has_node(&candidate) {
        return candidate;
    }
    graph.fresh_node_id(&candidate)
}

/// Compute the pullback (fiber product) of the cospan `b --b_d--> d <--c_d-- c`.
///
/// Returns `(a, a_b, a_c)` such that `a_b;b_d == a_c;c_d` and `a` is
/// universal: one node per pair of `b`/`c` nodes with a common image,
/// carrying the attribute intersection; an edge wherever both projections
/// have one.
pub fn pullback(
    b: &AttributedGraph,
    c: &AttributedGraph,
    d: &AttributedGraph,
    b_d: &NodeMap,
    c_d: &NodeMap,
) -> Result<SquareCorner, InvalidHomomorphism> {
    check_homomorphism(b, d, b_d, true)?;
    check_homomorphism(c, d, c_d, true)?;

    let mut a = AttributedGraph::new();
    let mut a_b = NodeMap::new();
    let mut a_c = NodeMap::new();
    for (n1, n2) in b.nodes().cartesian_product(c.nodes().collect_vec()) {
        if b_d[n1] != c_d[n2] {
            continue;
        }
        let base = if n1 == n2 {
            n1.to_string()
        } else {
            format!("{n1}_{n2}")
        };
        let id = fresh_in(&a, &base);
        let attrs = attrs_intersect(
            b.node_attrs(n1).expect("iterating b's nodes"),
            c.node_attrs(n2).expect("iterating c's nodes"),
        );
        a.add_node(id.clone(), attrs).expect("id is fresh");
        a_b.insert(id.clone(), n1.clone());
        a_c.insert(id, n2.clone());
    }

    let a_nodes: Vec<NodeId> = a.nodes().cloned().collect();
    for (x, y) in a_nodes.iter().cartesian_product(&a_nodes) {
        let b_has = b.has_edge(&a_b[x], &a_b[y]);
        let c_has = c.has_edge(&a_c[x], &a_c[y]);
        if b_has && c_has {
            let attrs = attrs_intersect(
                b.edge_attrs(&a_b[x], &a_b[y]).expect("edge checked"),
                c.edge_attrs(&a_c[x], &a_c[y]).expect("edge checked"),
            );
            a.add_edge(x.clone(), y.clone(), attrs)
                .expect("endpoints exist, pair visited once");
        }
    }
    Ok((a, a_b, a_c))
}

/// Compute the pushout of the span `b <--a_b-- a --a_c--> c`.
///
/// Returns `(d, b_d, c_d)`: the universal gluing of `b` and `c` along `a`.
/// Nodes of `c` outside `a`'s image are freshly added; nodes identified
/// through `a` are merged; attributes and edges are unioned.
pub fn pushout(
    a: &AttributedGraph,
    b: &AttributedGraph,
    c: &AttributedGraph,
    a_b: &NodeMap,
    a_c: &NodeMap,
) -> Result<SquareCorner, InvalidHomomorphism> {
    check_homomorphism(a, b, a_b, true)?;
    check_homomorphism(a, c, a_c, true)?;

    // d's nodes are the classes of the disjoint union of b's and c's nodes
    // under the relation generated by a_b(x) ~ a_c(x).
    let mut dsu = UnionFind::new();
    for n in b.nodes() {
        dsu.add(Element::B(n.clone()));
    }
    for n in c.nodes() {
        dsu.add(Element::C(n.clone()));
    }
    for x in a.nodes() {
        dsu.union(&Element::B(a_b[x].clone()), &Element::C(a_c[x].clone()));
    }

    let classes = dsu.classes();
    let mut d = AttributedGraph::new();
    let mut b_d = NodeMap::new();
    let mut c_d = NodeMap::new();
    for class in classes {
        let b_members: Vec<&NodeId> = class
            .iter()
            .filter_map(|e| match e {
                Element::B(n) => Some(n),
                Element::C(_) => None,
            })
            .collect();
        let c_members: Vec<&NodeId> = class
            .iter()
            .filter_map(|e| match e {
                Element::C(n) => Some(n),
                Element::B(_) => None,
            })
            .collect();
        // Name merged nodes by joining the b-side names; pure additions keep
        // their c-side name.
        let base = if b_members.is_empty() {
            c_members.iter().join("_")
        } else {
            b_members.iter().join("_")
        };
        let id = fresh_in(&d, &base);
        let attrs = class
            .iter()
            .map(|e| match e {
                Element::B(n) => b.node_attrs(n).expect("member of b"),
                Element::C(n) => c.node_attrs(n).expect("member of c"),
            })
            .fold(Attributes::new(), |acc, next| attrs_union(&acc, next));
        d.add_node(id.clone(), attrs).expect("id is fresh");
        for n in b_members {
            b_d.insert(n.clone(), id.clone());
        }
        for n in c_members {
            c_d.insert(n.clone(), id.clone());
        }
    }

    let mut glue_edge = |s: NodeId, t: NodeId, attrs: &Attributes| {
        if d.has_edge(&s, &t) {
            let merged = attrs_union(d.edge_attrs(&s, &t).expect("just checked"), attrs);
            d.set_edge_attrs(&s, &t, merged).expect("edge exists");
        } else {
            d.add_edge(s, t, attrs.clone()).expect("class nodes exist");
        }
    };
    for (s, t, attrs) in b.edges() {
        glue_edge(b_d[s].clone(), b_d[t].clone(), attrs);
    }
    for (s, t, attrs) in c.edges() {
        glue_edge(c_d[s].clone(), c_d[t].clone(), attrs);
    }
    Ok((d, b_d, c_d))
}

/// Compute the pullback complement of `a --a_b--> b --b_d--> d`, with `b_d`
/// monic.
///
/// Returns `(c, a_c, c_d)` making `a -> b -> d` / `a -> c -> d` a pushout
/// square: `b`-nodes without an `a`-preimage are deleted from (a copy of)
/// `d`, `b`-nodes with several preimages are cloned one copy per preimage,
/// and attributes present in `b` but not in `a` are stripped.
pub fn pullback_complement(
    a: &AttributedGraph,
    b: &AttributedGraph,
    d: &AttributedGraph,
    a_b: &NodeMap,
    b_d: &NodeMap,
) -> Result<SquareCorner, InvalidHomomorphism> {
    check_homomorphism(a, b, a_b, true)?;
    check_homomorphism(b, d, b_d, true)?;
    check_monic(b_d)?;

    let d_to_b: IndexMap<&NodeId, &NodeId> = b_d.iter().map(|(k, v)| (v, k)).collect();
    let mut c = AttributedGraph::new();
    let mut a_c = NodeMap::new();
    let mut c_d = NodeMap::new();
    // Copies of a given d-node in c (one, several clones, or none).
    let mut copies: IndexMap<&NodeId, Vec<NodeId>> = IndexMap::new();

    for x in d.nodes() {
        let x_attrs = d.node_attrs(x).expect("iterating d's nodes");
        match d_to_b.get(x) {
            // Untouched by the rule: kept as is.
            None => {
                c.add_node(x.clone(), x_attrs.clone()).expect("fresh graph");
                c_d.insert(x.clone(), x.clone());
                copies.insert(x, vec![x.clone()]);
            }
            Some(&n) => {
                let pre = preimages(a_b, n);
                let n_attrs = b.node_attrs(n).expect("image of b_d");
                let mut mine = Vec::with_capacity(pre.len());
                for (i, p) in pre.iter().enumerate() {
                    // Strip what the rule removes: d attrs minus (b minus a).
                    let keep = attrs_difference(
                        x_attrs,
                        &attrs_difference(n_attrs, a.node_attrs(p).expect("node of a")),
                    );
                    // The first copy keeps the d-node's name; further clones
                    // get fresh names derived from it.
                    let id = if i == 0 { x.clone() } else { fresh_in(&c, x.as_str()) };
                    c.add_node(id.clone(), keep).expect("id is fresh");
                    a_c.insert((*p).clone(), id.clone());
                    c_d.insert(id.clone(), x.clone());
                    mine.push(id);
                }
                copies.insert(x, mine);
            }
        }
    }

    for (x, y, xy_attrs) in d.edges() {
        // The b-edge this d-edge is the image of, if any (unique: b_d monic).
        let b_edge = match (d_to_b.get(x), d_to_b.get(y)) {
            (Some(&n), Some(&m)) if b.has_edge(n, m) => Some((n, m)),
            _ => None,
        };
        let empty = Vec::new();
        let xs = copies.get(x).unwrap_or(&empty);
        let ys = copies.get(y).unwrap_or(&empty);
        for (cx, cy) in xs.iter().cartesian_product(ys) {
            match b_edge {
                None => {
                    c.add_edge(cx.clone(), cy.clone(), xy_attrs.clone())
                        .expect("copies exist, edge visited once");
                }
                Some((n, m)) => {
                    // Between copies, keep only the edges reflected in a.
                    let p = edge_origin(&a_c, cx).expect("copy of a b-image has a preimage");
                    let q = edge_origin(&a_c, cy).expect("copy of a b-image has a preimage");
                    if !a.has_edge(p, q) {
                        continue;
                    }
                    let attrs = attrs_difference(
                        xy_attrs,
                        &attrs_difference(
                            b.edge_attrs(n, m).expect("b-edge checked"),
                            a.edge_attrs(p, q).expect("a-edge checked"),
                        ),
                    );
                    c.add_edge(cx.clone(), cy.clone(), attrs).expect("copies exist");
                }
            }
        }
    }
    Ok((c, a_c, c_d))
}

// The a-node a given c-node is the copy of, if it came through cloning.
fn edge_origin<'m>(a_c: &'m NodeMap, c_node: &NodeId) -> Option<&'m NodeId> {
    a_c.iter().find(|(_, v)| *v == c_node).map(|(k, _)| k)
}

/// Factor `a_b: a -> b` through the image of `a` inside `b` as an epi
/// followed by a mono.
///
/// Returns `(image, a_image, image_b)` where `a_image` is surjective,
/// `image_b` is the (monic) inclusion, and the image carries `a`'s attributes
/// pushed forward (unioned over preimages).
pub fn image_factorization(
    a: &AttributedGraph,
    b: &AttributedGraph,
    a_b: &NodeMap,
) -> Result<SquareCorner, InvalidHomomorphism> {
    check_homomorphism(a, b, a_b, true)?;

    let mut image = AttributedGraph::new();
    for (n, x) in a_b {
        if !image.has_node(x) {
            image
                .add_node(x.clone(), a.node_attrs(n).expect("key of a_b").clone())
                .expect("just checked");
        } else {
            let merged = attrs_union(
                image.node_attrs(x).expect("just checked"),
                a.node_attrs(n).expect("key of a_b"),
            );
            image.set_node_attrs(x, merged).expect("node exists");
        }
    }
    for (s, t, attrs) in a.edges() {
        let (is, it) = (&a_b[s], &a_b[t]);
        if image.has_edge(is, it) {
            let merged = attrs_union(image.edge_attrs(is, it).expect("just checked"), attrs);
            image.set_edge_attrs(is, it, merged).expect("edge exists");
        } else {
            image
                .add_edge(is.clone(), it.clone(), attrs.clone())
                .expect("images added above");
        }
    }
    let a_image = a_b.clone();
    let image_b: NodeMap = image.nodes().map(|x| (x.clone(), x.clone())).collect();
    Ok((image, a_image, image_b))
}

/// Given a pullback `(a, a_b, a_c)` of some cospan and another commuting
/// corner `z` with `z_b: z -> b`, `z_c: z -> c`, compute the unique mediating
/// map `z -> a`.
///
/// Fails with [`InvalidHomomorphism::NonCommuting`] if some `z`-node has no
/// (or no unique) counterpart in `a`.
pub fn get_unique_map_to_pullback(
    a_b: &NodeMap,
    a_c: &NodeMap,
    z_b: &NodeMap,
    z_c: &NodeMap,
) -> Result<NodeMap, InvalidHomomorphism> {
    let mut mediating = NodeMap::new();
    for (z, zb) in z_b {
        let Some(zc) = z_c.get(z) else {
            continue;
        };
        let candidates: Vec<&NodeId> = a_b
            .iter()
            .filter(|(an, bn)| *bn == zb && a_c.get(*an) == Some(zc))
            .map(|(an, _)| an)
            .collect();
        match candidates.as_slice() {
            [unique] => {
                mediating.insert(z.clone(), (*unique).clone());
            }
            _ => return Err(InvalidHomomorphism::NonCommuting(z.clone())),
        }
    }
    Ok(mediating)
}

/// Given a pushout `(d, b_d, c_d)` of some span and another commuting cocone
/// `z` with `b_z: b -> z`, `c_z: c -> z`, compute the unique mediating map
/// `d -> z`.
///
/// Fails with [`InvalidHomomorphism::NonCommuting`] if the two legs disagree
/// on some glued node.
pub fn get_unique_map_from_pushout(
    d_nodes: impl IntoIterator<Item = NodeId>,
    b_d: &NodeMap,
    c_d: &NodeMap,
    b_z: &NodeMap,
    c_z: &NodeMap,
) -> Result<NodeMap, InvalidHomomorphism> {
    let mut mediating = NodeMap::new();
    for x in d_nodes {
        let via_b: IndexSet<&NodeId> = preimages(b_d, &x)
            .into_iter()
            .filter_map(|n| b_z.get(n))
            .collect();
        let via_c: IndexSet<&NodeId> = preimages(c_d, &x)
            .into_iter()
            .filter_map(|n| c_z.get(n))
            .collect();
        let all: IndexSet<&NodeId> = via_b.union(&via_c).copied().collect();
        match all.len() {
            0 => continue,
            1 => {
                mediating.insert(x, (*all.first().expect("len 1")).clone());
            }
            _ => return Err(InvalidHomomorphism::NonCommuting(x)),
        }
    }
    Ok(mediating)
}

// -- union-find over the disjoint union of two node sets --

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Element {
    B(NodeId),
    C(NodeId),
}

struct UnionFind {
    index: IndexMap<Element, usize>,
    parent: Vec<usize>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            index: IndexMap::new(),
            parent: Vec::new(),
        }
    }

    fn add(&mut self, e: Element) {
        let next = self.parent.len();
        if self.index.insert(e, next).is_none() {
            self.parent.push(next);
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: &Element, b: &Element) {
        let (i, j) = (self.index[a], self.index[b]);
        let (ri, rj) = (self.find(i), self.find(j));
        // Keep the earliest-added element as representative so output order
        // follows insertion order.
        let (keep, drop) = if ri <= rj { (ri, rj) } else { (rj, ri) };
        self.parent[drop] = keep;
    }

    /// The equivalence classes, members in insertion order.
    fn classes(&mut self) -> Vec<Vec<Element>> {
        let mut by_root: IndexMap<usize, Vec<Element>> = IndexMap::new();
        for (e, i) in self.index.clone() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(e);
        }
        by_root.into_values().collect()
    }
}
