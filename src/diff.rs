//! Diff of two locked graphs.
//!
//! Both ownership trees are walked top-down in lock-step. Children of an
//! aligned pair are aligned with each other: candidates are shortlisted by
//! Prototype-identical hash and must be Similar. When several candidates
//! qualify, the first Identical one in declaration order wins, otherwise the
//! first one in declaration order. Detached nodes (literals) are aligned as
//! one separate pool with the same rule.

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::info;

use crate::graph::CodeGraph;
use crate::impact::ImpactReport;
use crate::matcher::{MatchLevel, Matcher, Side};

/// Classification of every node of both graphs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    /// Nodes of the before graph with no counterpart.
    pub removed: Vec<NodeIndex>,
    /// Nodes of the after graph with no counterpart.
    pub added: Vec<NodeIndex>,
    /// (before, after) pairs that are Similar but not Identical.
    pub changed: Vec<(NodeIndex, NodeIndex)>,
    /// (before, after) pairs that are Identical.
    pub unchanged: Vec<(NodeIndex, NodeIndex)>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            removed: self.removed.len(),
            added: self.added.len(),
            changed: self.changed.len(),
            unchanged: self.unchanged.len(),
        }
    }

    /// Seeds for impact propagation on the before graph.
    pub fn before_seeds(&self) -> Vec<NodeIndex> {
        self.removed
            .iter()
            .copied()
            .chain(self.changed.iter().map(|(a, _)| *a))
            .collect()
    }

    /// Seeds for impact propagation on the after graph.
    pub fn after_seeds(&self) -> Vec<NodeIndex> {
        self.added
            .iter()
            .copied()
            .chain(self.changed.iter().map(|(_, b)| *b))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub removed: usize,
    pub added: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} removed, {} added, {} changed, {} unchanged",
            self.removed, self.added, self.changed, self.unchanged
        )
    }
}

/// A stored diff: both graphs, the classification and the impact maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffArtifact {
    pub before_name: String,
    pub after_name: String,
    pub before: CodeGraph,
    pub after: CodeGraph,
    pub report: DiffReport,
    pub impact: ImpactReport,
}

/// Align `before` against `after` and classify every node.
pub fn diff_graphs(before: &CodeGraph, after: &CodeGraph) -> DiffReport {
    let mut matcher = Matcher::new(before, after);
    let report = diff_with(&mut matcher);
    info!(summary = %report.summary(), "diff complete");
    report
}

/// Same as [`diff_graphs`], reusing a caller-owned matcher and its memo.
pub fn diff_with(matcher: &mut Matcher<'_>) -> DiffReport {
    let (before, after) = (matcher.before(), matcher.after());
    let mut report = DiffReport::default();

    let roots = (before.root(), after.root());
    classify(matcher, &mut report, roots.0, roots.1);
    descend(matcher, &mut report, vec![roots]);

    let pairs = align(
        matcher,
        &mut report,
        &before.detached_nodes(),
        &after.detached_nodes(),
    );
    descend(matcher, &mut report, pairs);
    report
}

/// Breadth-first alignment below already aligned pairs.
fn descend(matcher: &mut Matcher<'_>, report: &mut DiffReport, start: Vec<(NodeIndex, NodeIndex)>) {
    let (before, after) = (matcher.before(), matcher.after());
    let mut queue = VecDeque::from(start);
    while let Some((a, b)) = queue.pop_front() {
        let ours = before.node(a).map(|n| n.children().to_vec()).unwrap_or_default();
        let theirs = after.node(b).map(|n| n.children().to_vec()).unwrap_or_default();
        let pairs = align(matcher, report, &ours, &theirs);
        queue.extend(pairs);
    }
}

/// Pair up two sibling lists, classify the pairs, and record unmatched
/// subtrees. Returns the aligned pairs.
fn align(
    matcher: &mut Matcher<'_>,
    report: &mut DiffReport,
    ours: &[NodeIndex],
    theirs: &[NodeIndex],
) -> Vec<(NodeIndex, NodeIndex)> {
    let mut buckets: HashMap<blake3::Hash, Vec<usize>> = HashMap::new();
    for (pos, b) in theirs.iter().enumerate() {
        let key = matcher.hash(Side::After, *b, MatchLevel::PrototypeIdentical);
        buckets.entry(key).or_default().push(pos);
    }
    let mut claimed = vec![false; theirs.len()];
    let mut pairs = Vec::new();

    for a in ours {
        let key = matcher.hash(Side::Before, *a, MatchLevel::PrototypeIdentical);
        let candidates: Vec<usize> = buckets
            .get(&key)
            .map(|positions| {
                positions
                    .iter()
                    .copied()
                    .filter(|pos| !claimed[*pos])
                    .filter(|pos| matcher.matches(*a, theirs[*pos], MatchLevel::Similar))
                    .collect()
            })
            .unwrap_or_default();

        let chosen = candidates
            .iter()
            .copied()
            .find(|pos| matcher.matches(*a, theirs[*pos], MatchLevel::Identical))
            .or_else(|| candidates.first().copied());

        match chosen {
            Some(pos) => {
                claimed[pos] = true;
                classify(matcher, report, *a, theirs[pos]);
                pairs.push((*a, theirs[pos]));
            }
            None => report.removed.extend(matcher.before().subtree(*a)),
        }
    }

    for (pos, b) in theirs.iter().enumerate() {
        if !claimed[pos] {
            report.added.extend(matcher.after().subtree(*b));
        }
    }
    pairs
}

fn classify(matcher: &mut Matcher<'_>, report: &mut DiffReport, a: NodeIndex, b: NodeIndex) {
    if matcher.matches(a, b, MatchLevel::Identical) {
        report.unchanged.push((a, b));
    } else {
        report.changed.push((a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeclEvent, DeclKind, SymbolRef, TranslationUnit};
    use crate::graph::{build_graph, WeightTable};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn build(events: Vec<DeclEvent>) -> CodeGraph {
        build_graph(&[TranslationUnit::new("d.cpp", events)], WeightTable::default()).unwrap()
    }

    fn find(graph: &CodeGraph, unique: &str) -> NodeIndex {
        graph.find_by_unique_name(unique)[0]
    }

    fn overload(symbol: &str, body: &str) -> DeclEvent {
        DeclEvent::new(DeclKind::Function, symbol, "f", "f", "void f(T)").with_body(body)
    }

    fn assert_partition(report: &DiffReport, before: &CodeGraph, after: &CodeGraph) {
        let left: Vec<NodeIndex> = report
            .removed
            .iter()
            .copied()
            .chain(report.changed.iter().map(|p| p.0))
            .chain(report.unchanged.iter().map(|p| p.0))
            .collect();
        let right: Vec<NodeIndex> = report
            .added
            .iter()
            .copied()
            .chain(report.changed.iter().map(|p| p.1))
            .chain(report.unchanged.iter().map(|p| p.1))
            .collect();
        assert_eq!(left.len(), before.node_count());
        assert_eq!(left.iter().collect::<HashSet<_>>().len(), before.node_count());
        assert_eq!(right.len(), after.node_count());
        assert_eq!(right.iter().collect::<HashSet<_>>().len(), after.node_count());
    }

    #[test]
    fn test_removed_subtree_is_classified_whole() {
        let int = SymbolRef::literal("int");
        let gone = DeclEvent::named(DeclKind::Class, "Gone", "class Gone")
            .with_child(DeclEvent::named(DeclKind::Variable, "Gone::x", "int x").with_type(int.clone()));
        let kept = DeclEvent::named(DeclKind::Variable, "k", "int k").with_type(int);
        let a = build(vec![gone, kept.clone()]);
        let b = build(vec![kept]);

        let report = diff_graphs(&a, &b);
        let removed: HashSet<NodeIndex> = report.removed.iter().copied().collect();
        assert!(removed.contains(&find(&a, "Gone")));
        assert!(removed.contains(&find(&a, "Gone::x")));
        assert!(report.added.is_empty());
        assert_partition(&report, &a, &b);
    }

    #[test]
    fn test_tie_break_prefers_identical_then_declaration_order() {
        let a = build(vec![overload("f#1", "{ a(); }"), overload("f#2", "{ b(); }")]);
        let swapped = build(vec![overload("f#1", "{ b(); }"), overload("f#2", "{ a(); }")]);
        let report = diff_graphs(&a, &swapped);
        let a_fs = a.find_by_unique_name("f");
        let b_fs = swapped.find_by_unique_name("f");
        assert!(report.changed.is_empty());
        assert!(report.unchanged.contains(&(a_fs[0], b_fs[1])));
        assert!(report.unchanged.contains(&(a_fs[1], b_fs[0])));

        let both_changed = build(vec![overload("f#1", "{ c(); }"), overload("f#2", "{ d(); }")]);
        let report = diff_graphs(&a, &both_changed);
        let c_fs = both_changed.find_by_unique_name("f");
        assert_eq!(report.changed, vec![(a_fs[0], c_fs[0]), (a_fs[1], c_fs[1])]);
    }

    #[test]
    fn test_literals_align_as_a_pool() {
        let a = build(vec![
            DeclEvent::named(DeclKind::Variable, "x", "int x").with_type(SymbolRef::literal("int")),
        ]);
        let b = build(vec![
            DeclEvent::named(DeclKind::Variable, "x", "long x").with_type(SymbolRef::literal("long")),
        ]);
        let report = diff_graphs(&a, &b);
        let int = a.nodes_of_kind(crate::graph::NodeKind::Integral)[0];
        let long = b.nodes_of_kind(crate::graph::NodeKind::Integral)[0];
        assert!(report.removed.contains(&int));
        assert!(report.added.contains(&long));
        assert_partition(&report, &a, &b);
    }

    #[test]
    fn test_summary_display() {
        let summary = DiffSummary {
            removed: 1,
            added: 2,
            changed: 3,
            unchanged: 4,
        };
        assert_eq!(
            summary.to_string(),
            "1 removed, 2 added, 3 changed, 4 unchanged"
        );
    }
}
