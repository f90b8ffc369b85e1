//! Structural matching between nodes of two graphs.
//!
//! A [`Matcher`] answers "do these two nodes represent the same program
//! element?" at one of four escalating [`MatchLevel`]s. Answers are memoized
//! per pair in both directions (finest level confirmed, coarsest level
//! refuted), and every node gets a blake3 structural hash per level so
//! candidates can be bucketed before they are compared.
//!
//! The graphs are expected to be locked; the matcher never re-validates them.

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::graph::CodeGraph;

/// Matching strictness. Each level implies all lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchLevel {
    /// Same node kind.
    PrototypeSimilar,
    /// Same kind, display name and signature text.
    PrototypeIdentical,
    /// Prototype-identical, same unique name, parents Similar up to the root.
    Similar,
    /// Similar, with equal outgoing dependency multisets (and equal body
    /// text for functions).
    Identical,
}

impl MatchLevel {
    pub const ALL: [MatchLevel; 4] = [
        MatchLevel::PrototypeSimilar,
        MatchLevel::PrototypeIdentical,
        MatchLevel::Similar,
        MatchLevel::Identical,
    ];
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLevel::PrototypeSimilar => write!(f, "prototype-similar"),
            MatchLevel::PrototypeIdentical => write!(f, "prototype-identical"),
            MatchLevel::Similar => write!(f, "similar"),
            MatchLevel::Identical => write!(f, "identical"),
        }
    }
}

/// Which of the two graphs a node index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Before,
    After,
}

/// Per-kind dependency counts toward one target.
type CountVector = [u32; 5];

/// Memoized matcher over one (before, after) pair of graphs.
pub struct Matcher<'a> {
    before: &'a CodeGraph,
    after: &'a CodeGraph,
    confirmed: HashMap<(NodeIndex, NodeIndex), MatchLevel>,
    refuted: HashMap<(NodeIndex, NodeIndex), MatchLevel>,
    hashes: HashMap<(Side, NodeIndex, MatchLevel), blake3::Hash>,
}

impl<'a> Matcher<'a> {
    pub fn new(before: &'a CodeGraph, after: &'a CodeGraph) -> Self {
        Self {
            before,
            after,
            confirmed: HashMap::new(),
            refuted: HashMap::new(),
            hashes: HashMap::new(),
        }
    }

    pub fn before(&self) -> &'a CodeGraph {
        self.before
    }

    pub fn after(&self) -> &'a CodeGraph {
        self.after
    }

    pub fn graph(&self, side: Side) -> &'a CodeGraph {
        match side {
            Side::Before => self.before,
            Side::After => self.after,
        }
    }

    /// True if `a` (before) and `b` (after) match at `level`.
    pub fn matches(&mut self, a: NodeIndex, b: NodeIndex, level: MatchLevel) -> bool {
        let confirmed = self.confirmed.get(&(a, b)).copied();
        if confirmed.is_some_and(|c| c >= level) {
            return true;
        }
        if self.refuted.get(&(a, b)).is_some_and(|r| *r <= level) {
            return false;
        }

        for step in MatchLevel::ALL {
            if step > level || confirmed.is_some_and(|c| step <= c) {
                continue;
            }
            if !self.check(a, b, step) {
                self.refuted.insert((a, b), step);
                return false;
            }
            self.confirmed.insert((a, b), step);
        }
        true
    }

    /// The finest level at which `a` and `b` match, if any.
    pub fn best_level(&mut self, a: NodeIndex, b: NodeIndex) -> Option<MatchLevel> {
        MatchLevel::ALL
            .into_iter()
            .take_while(|level| self.matches(a, b, *level))
            .last()
    }

    /// Finest level already confirmed for the pair, without computing anything.
    pub fn confirmed_level(&self, a: NodeIndex, b: NodeIndex) -> Option<MatchLevel> {
        self.confirmed.get(&(a, b)).copied()
    }

    /// Coarsest level already refuted for the pair, without computing anything.
    pub fn refuted_level(&self, a: NodeIndex, b: NodeIndex) -> Option<MatchLevel> {
        self.refuted.get(&(a, b)).copied()
    }

    /// One level's own condition, assuming every lower level holds.
    fn check(&mut self, a: NodeIndex, b: NodeIndex, level: MatchLevel) -> bool {
        let (before, after) = (self.before, self.after);
        let (Some(na), Some(nb)) = (before.node(a), after.node(b)) else {
            return false;
        };
        match level {
            MatchLevel::PrototypeSimilar => na.kind == nb.kind,
            MatchLevel::PrototypeIdentical => na.name == nb.name && na.signature == nb.signature,
            MatchLevel::Similar => {
                if na.unique_name != nb.unique_name {
                    return false;
                }
                match (na.parent(), nb.parent()) {
                    (None, None) => true,
                    (Some(pa), Some(pb)) => self.matches(pa, pb, MatchLevel::Similar),
                    _ => false,
                }
            }
            MatchLevel::Identical => na.body() == nb.body() && self.same_dependencies(a, b),
        }
    }

    /// Outgoing dependencies correspond as a multiset: every target on one
    /// side pairs with a Prototype-identical target on the other side that
    /// carries the same per-kind counts.
    fn same_dependencies(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        let ours = dependency_profile(self.before, a);
        let theirs = dependency_profile(self.after, b);
        if ours.len() != theirs.len() {
            return false;
        }

        let mut buckets: HashMap<blake3::Hash, Vec<(NodeIndex, CountVector)>> = HashMap::new();
        for (target, counts) in theirs {
            let key = self.hash(Side::After, target, MatchLevel::PrototypeIdentical);
            buckets.entry(key).or_default().push((target, counts));
        }

        for (target, counts) in ours {
            let key = self.hash(Side::Before, target, MatchLevel::PrototypeIdentical);
            let Some(bucket) = buckets.get_mut(&key) else {
                return false;
            };
            let found = bucket.iter().position(|(other, other_counts)| {
                *other_counts == counts
                    && self.matches(target, *other, MatchLevel::PrototypeIdentical)
            });
            match found {
                Some(pos) => {
                    bucket.remove(pos);
                }
                None => return false,
            }
        }
        true
    }

    /// Structural hash of `node` at `level`. Nodes matching at a level
    /// always hash equal at that level.
    pub fn hash(&mut self, side: Side, node: NodeIndex, level: MatchLevel) -> blake3::Hash {
        if let Some(hash) = self.hashes.get(&(side, node, level)) {
            return *hash;
        }
        let graph = self.graph(side);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[level as u8]);

        match graph.node(node) {
            None => {
                hasher.update(b"<missing>");
            }
            Some(data) => {
                hasher.update(&[data.kind as u8]);
                if level >= MatchLevel::PrototypeIdentical {
                    hash_text(&mut hasher, &data.name);
                    hash_text(&mut hasher, &data.signature);
                }
                if level >= MatchLevel::Similar {
                    hash_text(&mut hasher, &data.unique_name);
                    match data.parent() {
                        Some(parent) => {
                            let parent_hash = self.hash(side, parent, MatchLevel::Similar);
                            hasher.update(parent_hash.as_bytes());
                        }
                        None => {
                            hasher.update(b"<detached>");
                        }
                    }
                }
                if level == MatchLevel::Identical {
                    match data.body() {
                        Some(body) => {
                            hasher.update(&[1]);
                            hash_text(&mut hasher, body);
                        }
                        None => {
                            hasher.update(&[0]);
                        }
                    }
                    let mut entries: Vec<([u8; 32], CountVector)> = dependency_profile(graph, node)
                        .into_iter()
                        .map(|(target, counts)| {
                            let target_hash =
                                self.hash(side, target, MatchLevel::PrototypeIdentical);
                            (*target_hash.as_bytes(), counts)
                        })
                        .collect();
                    entries.sort();
                    for (target_hash, counts) in entries {
                        hasher.update(&target_hash);
                        for count in counts {
                            hasher.update(&count.to_le_bytes());
                        }
                    }
                }
            }
        }

        let hash = hasher.finalize();
        self.hashes.insert((side, node, level), hash);
        hash
    }
}

fn hash_text(hasher: &mut blake3::Hasher, text: &str) {
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

/// Outgoing dependencies of `node` folded into one count vector per target,
/// ordered by target id.
fn dependency_profile(graph: &CodeGraph, node: NodeIndex) -> Vec<(NodeIndex, CountVector)> {
    let mut per_target: HashMap<NodeIndex, CountVector> = HashMap::new();
    for (target, dep) in graph.dependencies(node) {
        per_target.entry(target).or_insert([0; 5])[dep.kind.ordinal()] += dep.count;
    }
    let mut profile: Vec<(NodeIndex, CountVector)> = per_target.into_iter().collect();
    profile.sort_by_key(|(target, _)| graph.node(*target).map(|n| n.id));
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeclEvent, DeclKind, SymbolRef, TranslationUnit};
    use crate::graph::{build_graph, DependencyKind, NodeData, NodeId, NodeKind, WeightTable};

    fn build(events: Vec<DeclEvent>) -> CodeGraph {
        build_graph(&[TranslationUnit::new("m.cpp", events)], WeightTable::default()).unwrap()
    }

    fn find(graph: &CodeGraph, unique: &str) -> NodeIndex {
        graph.find_by_unique_name(unique)[0]
    }

    fn shape(area_sig: &str, body: &str) -> Vec<DeclEvent> {
        let int = SymbolRef::literal("int");
        vec![DeclEvent::named(DeclKind::Class, "Shape", "class Shape")
            .with_child(
                DeclEvent::named(DeclKind::Function, "Shape::area", area_sig)
                    .with_type(int.clone())
                    .with_body(body),
            )
            .with_child(DeclEvent::named(DeclKind::Variable, "Shape::w", "int w").with_type(int))]
    }

    #[test]
    fn test_identical_builds_match_everywhere() {
        let a = build(shape("int area()", "{ return w; }"));
        let b = build(shape("int area()", "{ return w; }"));
        let mut matcher = Matcher::new(&a, &b);
        assert!(matcher.matches(a.root(), b.root(), MatchLevel::Identical));
        for name in ["Shape", "Shape::area", "Shape::w"] {
            let (x, y) = (find(&a, name), find(&b, name));
            assert_eq!(matcher.best_level(x, y), Some(MatchLevel::Identical));
            assert_eq!(
                matcher.hash(Side::Before, x, MatchLevel::Identical),
                matcher.hash(Side::After, y, MatchLevel::Identical)
            );
        }
    }

    #[test]
    fn test_signature_change_fails_prototype_identical() {
        let a = build(shape("int area()", "{ }"));
        let b = build(shape("int area() const", "{ }"));
        let mut matcher = Matcher::new(&a, &b);
        let (x, y) = (find(&a, "Shape::area"), find(&b, "Shape::area"));
        assert!(matcher.matches(x, y, MatchLevel::PrototypeSimilar));
        assert!(!matcher.matches(x, y, MatchLevel::Similar));
        assert_eq!(matcher.refuted_level(x, y), Some(MatchLevel::PrototypeIdentical));
        assert_eq!(matcher.confirmed_level(x, y), Some(MatchLevel::PrototypeSimilar));
        assert!(!matcher.matches(x, y, MatchLevel::Identical));
        assert_eq!(matcher.best_level(x, y), Some(MatchLevel::PrototypeSimilar));
    }

    #[test]
    fn test_body_change_is_similar_not_identical() {
        let a = build(shape("int area()", "{ return w; }"));
        let b = build(shape("int area()", "{ return w * 2; }"));
        let mut matcher = Matcher::new(&a, &b);
        let (x, y) = (find(&a, "Shape::area"), find(&b, "Shape::area"));
        assert_eq!(matcher.best_level(x, y), Some(MatchLevel::Similar));
        // The class itself only sees the member by prototype.
        let (cx, cy) = (find(&a, "Shape"), find(&b, "Shape"));
        assert!(matcher.matches(cx, cy, MatchLevel::Identical));
    }

    #[test]
    fn test_dependency_counts_matter() {
        let callee = DeclEvent::named(DeclKind::Function, "h", "void h()");
        let caller = |calls: usize| {
            let mut f = DeclEvent::named(DeclKind::Function, "g", "void g()").with_body("{ }");
            for _ in 0..calls {
                f = f.with_reference(callee.to_ref(), DependencyKind::Invocation);
            }
            f
        };
        let a = build(vec![callee.clone(), caller(1)]);
        let b = build(vec![callee.clone(), caller(2)]);
        let mut matcher = Matcher::new(&a, &b);
        let (x, y) = (find(&a, "g"), find(&b, "g"));
        assert!(matcher.matches(x, y, MatchLevel::Similar));
        assert!(!matcher.matches(x, y, MatchLevel::Identical));
        assert_ne!(
            matcher.hash(Side::Before, x, MatchLevel::Identical),
            matcher.hash(Side::After, y, MatchLevel::Identical)
        );
    }

    #[test]
    fn test_similar_requires_similar_parent() {
        let mut a = CodeGraph::new(NodeId(0));
        let mut b = CodeGraph::new(NodeId(0));
        let ns_a = a
            .add_node(NodeData::new(NodeId(1), NodeKind::Namespace, "x", "x", "namespace x"), Some(a.root()))
            .unwrap();
        let ns_b = b
            .add_node(NodeData::new(NodeId(1), NodeKind::Namespace, "y", "y", "namespace y"), Some(b.root()))
            .unwrap();
        let f_a = a
            .add_node(NodeData::new(NodeId(2), NodeKind::Function, "f", "f", "void f()"), Some(ns_a))
            .unwrap();
        let f_b = b
            .add_node(NodeData::new(NodeId(2), NodeKind::Function, "f", "f", "void f()"), Some(ns_b))
            .unwrap();
        let mut matcher = Matcher::new(&a, &b);
        assert!(matcher.matches(f_a, f_b, MatchLevel::PrototypeIdentical));
        assert!(!matcher.matches(f_a, f_b, MatchLevel::Similar));
    }

    #[test]
    fn test_memo_answers_are_stable() {
        let a = build(shape("int area()", "{ }"));
        let b = build(shape("int area()", "{ return 1; }"));
        let mut matcher = Matcher::new(&a, &b);
        let (x, y) = (find(&a, "Shape::area"), find(&b, "Shape::area"));
        let first = matcher.matches(x, y, MatchLevel::Identical);
        assert_eq!(matcher.refuted_level(x, y), Some(MatchLevel::Identical));
        for _ in 0..3 {
            assert_eq!(matcher.matches(x, y, MatchLevel::Identical), first);
            assert!(matcher.matches(x, y, MatchLevel::Similar));
        }
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(MatchLevel::PrototypeSimilar < MatchLevel::PrototypeIdentical);
        assert!(MatchLevel::PrototypeIdentical < MatchLevel::Similar);
        assert!(MatchLevel::Similar < MatchLevel::Identical);
    }
}
