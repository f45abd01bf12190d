//! Set-valued attributes for graph nodes and edges.
//!
//! Attribute values are sets, not scalars: a node attribute `"shape"` maps to
//! a *set* of admissible values, and typing checks compare attributes by set
//! inclusion. This module implements a small, clearly-bounded set algebra
//! (finite sets, integer interval sets, regex pattern sets, and the empty and
//! universal sets) behind the operations the rewriting core needs: union,
//! intersection, difference and subset testing.
//!
//! Operations between sets of the same kind are precise. Across kinds the
//! algebra is conservative: finite integer sets promote into the interval
//! algebra, finite-versus-regex comparisons test membership exactly, and
//! anything without a precise answer widens to [`AttrSet::Universal`] on
//! union while intersections stay symbolic.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;
use thiserror::Error;

use crate::core::AttrKey;

/// A scalar member of a finite attribute set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrValue {
    /// An integer value.
    Int(i64),
    /// A string value.
    Str(SmolStr),
}

impl AttrValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Str(_) => None,
        }
    }

    fn to_match_str(&self) -> String {
        match self {
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Str(s) => s.to_string(),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.into())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v.into())
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// An endpoint of an integer interval. `None` stands for the unbounded end.
type Endpoint = Option<i64>;

/// A closed integer interval, possibly unbounded on either end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// Lower endpoint, `None` for negative infinity.
    pub low: Endpoint,
    /// Upper endpoint, `None` for positive infinity.
    pub high: Endpoint,
}

impl Interval {
    /// A closed interval `[low, high]`.
    #[must_use]
    pub fn new(low: impl Into<Endpoint>, high: impl Into<Endpoint>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
        }
    }

    fn contains(&self, v: i64) -> bool {
        self.low.is_none_or(|l| l <= v) && self.high.is_none_or(|h| v <= h)
    }

    fn contains_interval(&self, other: &Interval) -> bool {
        let low_ok = match (self.low, other.low) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a <= b,
        };
        let high_ok = match (self.high, other.high) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        low_ok && high_ok
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let low = match (self.low, other.low) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => Some(a.max(b)),
        };
        let high = match (self.high, other.high) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => Some(a.min(b)),
        };
        match (low, high) {
            (Some(l), Some(h)) if l > h => None,
            _ => Some(Interval { low, high }),
        }
    }
}

/// A set of values usable as a node or edge attribute.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum AttrSet {
    /// A finite set of scalar values.
    Finite(BTreeSet<AttrValue>),
    /// A union of disjoint integer intervals, kept sorted.
    Integers(Vec<Interval>),
    /// A union of regular-expression languages, kept as the pattern list.
    Regex(Vec<SmolStr>),
    /// The empty set.
    #[default]
    Empty,
    /// The set of all values.
    Universal,
}

/// Failure to build or parse an attribute set.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum AttrSetError {
    /// A regex pattern did not compile.
    #[error("invalid regex pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: SmolStr,
        /// The regex compiler's message.
        message: String,
    },
    /// An interval with its endpoints in the wrong order.
    #[error("invalid integer interval [{low:?}, {high:?}]")]
    InvalidInterval {
        /// Lower endpoint.
        low: Endpoint,
        /// Upper endpoint.
        high: Endpoint,
    },
    /// A serialized attribute set that does not match the schema.
    #[error("malformed attribute set payload: {0}")]
    Malformed(String),
}

impl AttrSet {
    /// A finite set from an iterator of scalar values.
    pub fn finite(values: impl IntoIterator<Item = impl Into<AttrValue>>) -> Self {
        let set: BTreeSet<AttrValue> = values.into_iter().map(Into::into).collect();
        if set.is_empty() {
            AttrSet::Empty
        } else {
            AttrSet::Finite(set)
        }
    }

    /// An integer interval set. Intervals are normalized: sorted, merged when
    /// overlapping or adjacent.
    pub fn integers(
        intervals: impl IntoIterator<Item = Interval>,
    ) -> Result<Self, AttrSetError> {
        let mut intervals: Vec<Interval> = intervals.into_iter().collect();
        for iv in &intervals {
            if let (Some(l), Some(h)) = (iv.low, iv.high) {
                if l > h {
                    return Err(AttrSetError::InvalidInterval {
                        low: iv.low,
                        high: iv.high,
                    });
                }
            }
        }
        normalize_intervals(&mut intervals);
        if intervals.is_empty() {
            Ok(AttrSet::Empty)
        } else if intervals == [Interval::new(None, None)] {
            Ok(AttrSet::Universal)
        } else {
            Ok(AttrSet::Integers(intervals))
        }
    }

    /// A regex pattern set. Every pattern must compile.
    pub fn regex(
        patterns: impl IntoIterator<Item = impl Into<SmolStr>>,
    ) -> Result<Self, AttrSetError> {
        let patterns: Vec<SmolStr> = patterns.into_iter().map(Into::into).unique().collect();
        for pattern in &patterns {
            compile_anchored(pattern)?;
        }
        if patterns.is_empty() {
            Ok(AttrSet::Empty)
        } else {
            Ok(AttrSet::Regex(patterns))
        }
    }

    /// Whether this is the empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AttrSet::Finite(s) => s.is_empty(),
            AttrSet::Integers(ivs) => ivs.is_empty(),
            AttrSet::Regex(ps) => ps.is_empty(),
            AttrSet::Empty => true,
            AttrSet::Universal => false,
        }
    }

    /// Whether `value` is a member of this set.
    #[must_use]
    pub fn contains(&self, value: &AttrValue) -> bool {
        match self {
            AttrSet::Finite(s) => s.contains(value),
            AttrSet::Integers(ivs) => value
                .as_int()
                .is_some_and(|v| ivs.iter().any(|iv| iv.contains(v))),
            AttrSet::Regex(ps) => {
                let text = value.to_match_str();
                ps.iter()
                    .any(|p| compile_anchored(p).is_ok_and(|re| re.is_match(&text)))
            }
            AttrSet::Empty => false,
            AttrSet::Universal => true,
        }
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &AttrSet) -> AttrSet {
        use AttrSet::*;
        match (self, other) {
            (Empty, x) | (x, Empty) => x.clone(),
            (Universal, _) | (_, Universal) => Universal,
            (Finite(a), Finite(b)) => Finite(a.union(b).cloned().collect()),
            (Integers(a), Integers(b)) => {
                let mut ivs = a.clone();
                ivs.extend(b.iter().copied());
                normalize_intervals(&mut ivs);
                Integers(ivs)
            }
            (Regex(a), Regex(b)) => {
                Regex(a.iter().chain(b).cloned().unique().collect())
            }
            (Finite(f), Integers(ivs)) | (Integers(ivs), Finite(f)) => {
                match finite_as_intervals(f) {
                    Some(mut extra) => {
                        extra.extend(ivs.iter().copied());
                        normalize_intervals(&mut extra);
                        Integers(extra)
                    }
                    // Strings mixed with an interval algebra: no precise form.
                    None => Universal,
                }
            }
            (Finite(f), Regex(ps)) | (Regex(ps), Finite(f)) => {
                let extra: Vec<SmolStr> = f
                    .iter()
                    .map(|v| regex::escape(&v.to_match_str()).into())
                    .collect();
                Regex(ps.iter().cloned().chain(extra).unique().collect())
            }
            (Integers(_), Regex(_)) | (Regex(_), Integers(_)) => Universal,
        }
    }

    /// Set intersection.
    #[must_use]
    pub fn intersect(&self, other: &AttrSet) -> AttrSet {
        use AttrSet::*;
        match (self, other) {
            (Empty, _) | (_, Empty) => Empty,
            (Universal, x) | (x, Universal) => x.clone(),
            (Finite(a), Finite(b)) => {
                Self::finite(a.intersection(b).cloned().collect_vec())
            }
            (Integers(a), Integers(b)) => {
                let ivs: Vec<Interval> = a
                    .iter()
                    .cartesian_product(b)
                    .filter_map(|(x, y)| x.intersect(y))
                    .collect();
                if ivs.is_empty() { Empty } else { Integers(ivs) }
            }
            (Finite(f), other @ (Integers(_) | Regex(_)))
            | (other @ (Integers(_) | Regex(_)), Finite(f)) => {
                Self::finite(f.iter().filter(|v| other.contains(v)).cloned().collect_vec())
            }
            (Regex(a), Regex(b)) => {
                // Language intersection is kept symbolic: shared patterns only.
                let shared: Vec<SmolStr> =
                    a.iter().filter(|p| b.contains(p)).cloned().collect();
                if shared.is_empty() { Empty } else { Regex(shared) }
            }
            (Integers(_), Regex(_)) | (Regex(_), Integers(_)) => Empty,
        }
    }

    /// Set difference `self \ other`.
    #[must_use]
    pub fn difference(&self, other: &AttrSet) -> AttrSet {
        use AttrSet::*;
        match (self, other) {
            (Empty, _) | (_, Universal) => Empty,
            (x, Empty) => x.clone(),
            (Finite(a), Finite(b)) => {
                Self::finite(a.difference(b).cloned().collect_vec())
            }
            (Finite(f), sub @ (Integers(_) | Regex(_))) => {
                Self::finite(f.iter().filter(|v| !sub.contains(v)).cloned().collect_vec())
            }
            (Integers(a), Integers(b)) => {
                let mut out = a.clone();
                for iv in b {
                    out = out
                        .into_iter()
                        .flat_map(|x| subtract_interval(x, *iv))
                        .collect();
                }
                if out.is_empty() { Empty } else { Integers(out) }
            }
            (Integers(a), Finite(f)) => {
                // Puncture the intervals at each removed integer; non-integer
                // members cannot occur in an interval set anyway.
                let mut out = a.clone();
                for v in f.iter().filter_map(AttrValue::as_int) {
                    let point = Interval::new(v, v);
                    out = out
                        .into_iter()
                        .flat_map(|x| subtract_interval(x, point))
                        .collect();
                }
                if out.is_empty() { Empty } else { Integers(out) }
            }
            (Regex(a), Regex(b)) => {
                let rest: Vec<SmolStr> =
                    a.iter().filter(|p| !b.contains(p)).cloned().collect();
                if rest.is_empty() { Empty } else { Regex(rest) }
            }
            // No precise complement in this algebra; keep the left operand.
            (x, _) => x.clone(),
        }
    }

    /// Whether `self ⊆ other`.
    #[must_use]
    pub fn is_subset(&self, other: &AttrSet) -> bool {
        use AttrSet::*;
        match (self, other) {
            (Empty, _) => true,
            (_, Universal) => true,
            (Universal, _) => false,
            (_, Empty) => self.is_empty(),
            (Finite(a), Finite(b)) => a.is_subset(b),
            (Finite(f), sup @ (Integers(_) | Regex(_))) => {
                f.iter().all(|v| sup.contains(v))
            }
            (Integers(a), Integers(b)) => a
                .iter()
                .all(|x| b.iter().any(|y| y.contains_interval(x))),
            (Regex(a), Regex(b)) => a.iter().all(|p| b.contains(p)),
            (Integers(ivs), Finite(f)) => {
                // Only singleton intervals can fit in a finite set.
                ivs.iter().all(|iv| match (iv.low, iv.high) {
                    (Some(l), Some(h)) => {
                        (l..=h).all(|v| f.contains(&AttrValue::Int(v)))
                    }
                    _ => false,
                })
            }
            (Integers(_), Regex(_)) | (Regex(_), Integers(_) | Finite(_)) => false,
        }
    }
}

fn finite_as_intervals(set: &BTreeSet<AttrValue>) -> Option<Vec<Interval>> {
    set.iter()
        .map(|v| v.as_int().map(|i| Interval::new(i, i)))
        .collect()
}

fn normalize_intervals(intervals: &mut Vec<Interval>) {
    intervals.sort_by_key(|iv| (iv.low.is_some(), iv.low));
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals.drain(..) {
        match merged.last_mut() {
            Some(last) if touches(last, &iv) => {
                last.high = match (last.high, iv.high) {
                    (None, _) | (_, None) => None,
                    (Some(a), Some(b)) => Some(a.max(b)),
                };
            }
            _ => merged.push(iv),
        }
    }
    *intervals = merged;
}

// Overlapping or adjacent, assuming `a.low <= b.low` in the sort order.
fn touches(a: &Interval, b: &Interval) -> bool {
    match (a.high, b.low) {
        (None, _) | (_, None) => true,
        (Some(h), Some(l)) => l <= h.saturating_add(1),
    }
}

fn subtract_interval(from: Interval, sub: Interval) -> Vec<Interval> {
    let Some(overlap) = from.intersect(&sub) else {
        return vec![from];
    };
    let mut out = Vec::new();
    if let Some(ol) = overlap.low {
        let keep_low = from.low.is_none_or(|l| l < ol);
        if keep_low {
            out.push(Interval::new(from.low, Some(ol - 1)));
        }
    }
    if let Some(oh) = overlap.high {
        let keep_high = from.high.is_none_or(|h| h > oh);
        if keep_high {
            out.push(Interval::new(Some(oh + 1), from.high));
        }
    }
    out
}

fn compile_anchored(pattern: &str) -> Result<regex::Regex, AttrSetError> {
    regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        AttrSetError::InvalidPattern {
            pattern: pattern.into(),
            message: e.to_string(),
        }
    })
}

/// The attribute table of a node or an edge.
pub type Attributes = IndexMap<AttrKey, AttrSet>;

/// Key-wise union of two attribute tables.
#[must_use]
pub fn attrs_union(a: &Attributes, b: &Attributes) -> Attributes {
    let mut out = a.clone();
    for (key, set) in b {
        match out.get_mut(key) {
            Some(existing) => *existing = existing.union(set),
            None => {
                out.insert(key.clone(), set.clone());
            }
        }
    }
    out
}

/// Key-wise intersection of two attribute tables. Keys missing on either
/// side intersect to the empty set and are dropped.
#[must_use]
pub fn attrs_intersect(a: &Attributes, b: &Attributes) -> Attributes {
    let mut out = Attributes::new();
    for (key, set) in a {
        if let Some(other) = b.get(key) {
            let both = set.intersect(other);
            if !both.is_empty() {
                out.insert(key.clone(), both);
            }
        }
    }
    out
}

/// Key-wise difference `a \ b`. Keys whose set becomes empty are dropped.
#[must_use]
pub fn attrs_difference(a: &Attributes, b: &Attributes) -> Attributes {
    let mut out = Attributes::new();
    for (key, set) in a {
        let rest = match b.get(key) {
            Some(other) => set.difference(other),
            None => set.clone(),
        };
        if !rest.is_empty() {
            out.insert(key.clone(), rest);
        }
    }
    out
}

/// Whether every attribute of `a` is a subset of the same-keyed attribute of
/// `b`. Keys absent from `b` fail the test unless their set in `a` is empty.
#[must_use]
pub fn attrs_included(a: &Attributes, b: &Attributes) -> bool {
    a.iter().all(|(key, set)| match b.get(key) {
        Some(other) => set.is_subset(other),
        None => set.is_empty(),
    })
}

// -- serde: `{"type": <SetKind>, "data": [...]}` --

#[derive(Serialize, Deserialize)]
struct AttrSetSer {
    #[serde(rename = "type")]
    kind: SmolStr,
    data: Vec<serde_json::Value>,
}

impl Serialize for AttrSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (kind, data): (&str, Vec<serde_json::Value>) = match self {
            AttrSet::Finite(s) => (
                "FiniteSet",
                s.iter().map(attr_value_to_json).collect(),
            ),
            AttrSet::Integers(ivs) => (
                "IntegerSet",
                ivs.iter()
                    .map(|iv| {
                        serde_json::Value::Array(vec![
                            endpoint_to_json(iv.low, "-inf"),
                            endpoint_to_json(iv.high, "inf"),
                        ])
                    })
                    .collect(),
            ),
            AttrSet::Regex(ps) => (
                "RegexSet",
                ps.iter().map(|p| p.as_str().into()).collect(),
            ),
            AttrSet::Empty => ("EmptySet", vec![]),
            AttrSet::Universal => ("UniversalSet", vec![]),
        };
        AttrSetSer {
            kind: kind.into(),
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ser = AttrSetSer::deserialize(deserializer)?;
        attr_set_from_parts(&ser.kind, ser.data).map_err(D::Error::custom)
    }
}

fn attr_value_to_json(v: &AttrValue) -> serde_json::Value {
    match v {
        AttrValue::Int(i) => (*i).into(),
        AttrValue::Str(s) => s.as_str().into(),
    }
}

fn endpoint_to_json(e: Endpoint, infinity: &str) -> serde_json::Value {
    match e {
        Some(v) => v.into(),
        None => infinity.into(),
    }
}

fn attr_value_from_json(v: &serde_json::Value) -> Result<AttrValue, AttrSetError> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(AttrValue::Int)
            .ok_or_else(|| AttrSetError::Malformed(format!("non-integer number {n}"))),
        serde_json::Value::String(s) => Ok(AttrValue::Str(s.as_str().into())),
        serde_json::Value::Bool(b) => Ok(AttrValue::Str(b.to_string().into())),
        other => Err(AttrSetError::Malformed(format!(
            "unsupported scalar {other}"
        ))),
    }
}

fn endpoint_from_json(v: &serde_json::Value) -> Result<Endpoint, AttrSetError> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| AttrSetError::Malformed(format!("bad interval endpoint {n}"))),
        serde_json::Value::String(s) if s == "inf" || s == "-inf" => Ok(None),
        other => Err(AttrSetError::Malformed(format!(
            "bad interval endpoint {other}"
        ))),
    }
}

fn attr_set_from_parts(
    kind: &str,
    data: Vec<serde_json::Value>,
) -> Result<AttrSet, AttrSetError> {
    match kind {
        "FiniteSet" => {
            let values: Vec<AttrValue> = data
                .iter()
                .map(attr_value_from_json)
                .collect::<Result<_, _>>()?;
            Ok(AttrSet::finite(values))
        }
        "IntegerSet" => {
            let intervals: Vec<Interval> = data
                .iter()
                .map(|entry| match entry {
                    serde_json::Value::Array(pair) if pair.len() == 2 => Ok(Interval {
                        low: endpoint_from_json(&pair[0])?,
                        high: endpoint_from_json(&pair[1])?,
                    }),
                    scalar => {
                        let v = endpoint_from_json(scalar)?;
                        Ok(Interval { low: v, high: v })
                    }
                })
                .collect::<Result<_, _>>()?;
            AttrSet::integers(intervals)
        }
        "RegexSet" => {
            let patterns: Vec<SmolStr> = data
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => Ok(SmolStr::from(s.as_str())),
                    other => Err(AttrSetError::Malformed(format!(
                        "regex pattern must be a string, got {other}"
                    ))),
                })
                .collect::<Result<_, _>>()?;
            AttrSet::regex(patterns)
        }
        "EmptySet" => Ok(AttrSet::Empty),
        "UniversalSet" => Ok(AttrSet::Universal),
        other => Err(AttrSetError::Malformed(format!("unknown set kind {other:?}"))),
    }
}

/// Normalize a raw JSON value into an attribute set: scalars become singleton
/// finite sets, arrays become finite sets, and tagged `{type, data}` objects
/// parse as their declared kind.
pub fn normalize(value: &serde_json::Value) -> Result<AttrSet, AttrSetError> {
    match value {
        serde_json::Value::Object(obj)
            if obj.contains_key("type") && obj.contains_key("data") =>
        {
            serde_json::from_value(value.clone())
                .map_err(|e| AttrSetError::Malformed(e.to_string()))
        }
        serde_json::Value::Array(values) => {
            let values: Vec<AttrValue> = values
                .iter()
                .map(attr_value_from_json)
                .collect::<Result<_, _>>()?;
            Ok(AttrSet::finite(values))
        }
        scalar => Ok(AttrSet::finite([attr_value_from_json(scalar)?])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cool_asserts::assert_matches;
    use rstest::rstest;

    fn fin(values: impl IntoIterator<Item = &'static str>) -> AttrSet {
        AttrSet::finite(values)
    }

    #[test]
    fn finite_ops() {
        let a = fin(["x", "y"]);
        let b = fin(["y", "z"]);
        assert_eq!(a.union(&b), fin(["x", "y", "z"]));
        assert_eq!(a.intersect(&b), fin(["y"]));
        assert_eq!(a.difference(&b), fin(["x"]));
        assert!(fin(["y"]).is_subset(&a));
        assert!(!a.is_subset(&b));
    }

    #[test]
    fn empty_and_universal_are_identities() {
        let a = fin(["x"]);
        assert_eq!(a.union(&AttrSet::Empty), a);
        assert_eq!(a.intersect(&AttrSet::Universal), a);
        assert_eq!(a.intersect(&AttrSet::Empty), AttrSet::Empty);
        assert!(a.is_subset(&AttrSet::Universal));
        assert!(AttrSet::Empty.is_subset(&a));
        assert!(!AttrSet::Universal.is_subset(&a));
    }

    #[test]
    fn interval_normalization_merges_adjacent() {
        let s = AttrSet::integers([Interval::new(1, 3), Interval::new(4, 6)]).unwrap();
        assert_eq!(s, AttrSet::Integers(vec![Interval::new(1, 6)]));
    }

    #[test]
    fn interval_difference_splits() {
        let a = AttrSet::integers([Interval::new(0, 10)]).unwrap();
        let b = AttrSet::integers([Interval::new(3, 5)]).unwrap();
        assert_eq!(
            a.difference(&b),
            AttrSet::Integers(vec![Interval::new(0, 2), Interval::new(6, 10)])
        );
    }

    #[test]
    fn finite_ints_puncture_intervals() {
        let a = AttrSet::integers([Interval::new(0, 10)]).unwrap();
        let b = AttrSet::finite([AttrValue::Int(4), AttrValue::Str("four".into())]);
        assert_eq!(
            a.difference(&b),
            AttrSet::Integers(vec![Interval::new(0, 3), Interval::new(5, 10)])
        );
        let unbounded = AttrSet::integers([Interval::new(None, Some(2))]).unwrap();
        assert_eq!(
            unbounded.difference(&AttrSet::finite([2i64])),
            AttrSet::Integers(vec![Interval::new(None, Some(1))])
        );
        assert_eq!(
            AttrSet::integers([Interval::new(5, 5)])
                .unwrap()
                .difference(&AttrSet::finite([5i64])),
            AttrSet::Empty
        );
    }

    #[test]
    fn finite_ints_promote_into_intervals() {
        let f = AttrSet::finite([1i64, 2, 7]);
        let ivs = AttrSet::integers([Interval::new(0, 5)]).unwrap();
        assert_eq!(
            f.union(&ivs),
            AttrSet::Integers(vec![Interval::new(0, 5), Interval::new(7, 7)])
        );
        assert!(AttrSet::finite([1i64, 2]).is_subset(&ivs));
        assert!(!f.is_subset(&ivs));
    }

    #[test]
    fn regex_membership_is_exact() {
        let re = AttrSet::regex(["[a-z]+", "[0-9]{2}"]).unwrap();
        assert!(re.contains(&"abc".into()));
        assert!(re.contains(&AttrValue::Int(42)));
        assert!(!re.contains(&"ABC".into()));
        assert!(fin(["ab", "cd"]).is_subset(&re));
        assert!(!fin(["ab", "CD"]).is_subset(&re));
    }

    #[test]
    fn invalid_regex_rejected() {
        assert_matches!(
            AttrSet::regex(["("]),
            Err(AttrSetError::InvalidPattern { .. })
        );
    }

    #[rstest]
    #[case(fin(["a", "b"]))]
    #[case(AttrSet::integers([Interval::new(1, 3), Interval::new(None, Some(-5))]).unwrap())]
    #[case(AttrSet::regex(["x.*"]).unwrap())]
    #[case(AttrSet::Empty)]
    #[case(AttrSet::Universal)]
    fn serde_round_trip(#[case] set: AttrSet) {
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["type"].as_str().is_some(), true);
        let back: AttrSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn normalize_scalars_and_arrays() {
        assert_eq!(
            normalize(&serde_json::json!("red")).unwrap(),
            fin(["red"])
        );
        assert_eq!(
            normalize(&serde_json::json!([1, 2])).unwrap(),
            AttrSet::finite([1i64, 2])
        );
        assert_eq!(
            normalize(&serde_json::json!({"type": "UniversalSet", "data": []})).unwrap(),
            AttrSet::Universal
        );
    }

    #[test]
    fn attribute_table_helpers() {
        let mut a = Attributes::new();
        a.insert("color".into(), fin(["red"]));
        let mut b = Attributes::new();
        b.insert("color".into(), fin(["red", "blue"]));
        b.insert("size".into(), AttrSet::finite([1i64]));

        assert!(attrs_included(&a, &b));
        assert!(!attrs_included(&b, &a));
        let u = attrs_union(&a, &b);
        assert_eq!(u["color"], fin(["red", "blue"]));
        let i = attrs_intersect(&a, &b);
        assert_eq!(i["color"], fin(["red"]));
        assert!(!i.contains_key("size"));
        let d = attrs_difference(&b, &a);
        assert_eq!(d["color"], fin(["blue"]));
        assert_eq!(d["size"], AttrSet::finite([1i64]));
    }
}
