//! Impact propagation over reverse dependency edges.
//!
//! Starting from the changed nodes, impact flows to dependents (never to
//! dependencies). Traversing an edge costs `1 / (weight(kind) * count)`, so
//! heavy dependencies carry impact further. A node's impact is its shortest
//! distance to any seed; seeds sit at 0 and unreached nodes at infinity.

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::diff::DiffReport;
use crate::graph::{CodeGraph, WeightTable};

/// Impact distances for one graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactMap {
    distances: BTreeMap<NodeIndex, f64>,
    seeds: BTreeSet<NodeIndex>,
}

impl ImpactMap {
    /// Distance from the nearest seed. `f64::INFINITY` when unreached.
    pub fn get(&self, node: NodeIndex) -> f64 {
        self.distances.get(&node).copied().unwrap_or(f64::INFINITY)
    }

    pub fn is_seed(&self, node: NodeIndex) -> bool {
        self.seeds.contains(&node)
    }

    /// Number of reached nodes, seeds included.
    pub fn reached(&self) -> usize {
        self.distances.len()
    }

    /// Reached non-seed nodes, most affected first.
    pub fn ranked(&self) -> Vec<(NodeIndex, f64)> {
        let mut ranked: Vec<(NodeIndex, f64)> = self
            .distances
            .iter()
            .filter(|(node, _)| !self.seeds.contains(*node))
            .map(|(node, dist)| (*node, *dist))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        ranked
    }
}

/// Impact on both sides of a diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    /// Seeded with removed nodes and the before side of changed pairs.
    pub before: ImpactMap,
    /// Seeded with added nodes and the after side of changed pairs.
    pub after: ImpactMap,
}

#[derive(Debug, Clone, Copy)]
struct Frontier {
    node: NodeIndex,
    distance: f64,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Multi-seed Dijkstra from `seeds` along incoming dependency edges.
pub fn propagate_impact(graph: &CodeGraph, seeds: &[NodeIndex], table: &WeightTable) -> ImpactMap {
    let mut map = ImpactMap::default();
    let mut heap = BinaryHeap::new();

    for seed in seeds.iter().copied().filter(|s| graph.contains(*s)) {
        map.seeds.insert(seed);
        map.distances.insert(seed, 0.0);
        heap.push(Frontier {
            node: seed,
            distance: 0.0,
        });
    }

    while let Some(Frontier { node, distance }) = heap.pop() {
        if distance > map.get(node) {
            continue;
        }
        for (dependent, dep) in graph.dependents(node) {
            let strength = table.weight(dep.kind) * f64::from(dep.count);
            if strength <= 0.0 {
                continue;
            }
            let next = distance + 1.0 / strength;
            if next < map.get(dependent) {
                map.distances.insert(dependent, next);
                heap.push(Frontier {
                    node: dependent,
                    distance: next,
                });
            }
        }
    }
    map
}

/// Impact of a diff on both of its graphs.
pub fn impact_of(
    before: &CodeGraph,
    after: &CodeGraph,
    report: &DiffReport,
    table: &WeightTable,
) -> ImpactReport {
    ImpactReport {
        before: propagate_impact(before, &report.before_seeds(), table),
        after: propagate_impact(after, &report.after_seeds(), table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyKind, NodeData, NodeId, NodeKind};

    fn chain() -> (CodeGraph, NodeIndex, NodeIndex, NodeIndex, NodeIndex) {
        let mut graph = CodeGraph::new(NodeId(0));
        let root = graph.root();
        let add = |graph: &mut CodeGraph, id: u32, name: &str| {
            graph
                .add_node(NodeData::new(NodeId(id), NodeKind::Class, name, name, name), Some(root))
                .unwrap()
        };
        let a = add(&mut graph, 1, "a");
        let b = add(&mut graph, 2, "b");
        let c = add(&mut graph, 3, "c");
        let lone = add(&mut graph, 4, "lone");
        graph.add_dependency(b, a, DependencyKind::Use).unwrap();
        graph.add_dependency(c, b, DependencyKind::Use).unwrap();
        (graph, a, b, c, lone)
    }

    #[test]
    fn test_chain_distances() {
        let (graph, a, b, c, lone) = chain();
        let map = propagate_impact(&graph, &[a], &WeightTable::default());
        assert_eq!(map.get(a), 0.0);
        assert_eq!(map.get(b), 0.25);
        assert_eq!(map.get(c), 0.5);
        assert!(map.get(lone).is_infinite());
        assert_eq!(map.ranked(), vec![(b, 0.25), (c, 0.5)]);
    }

    #[test]
    fn test_impact_does_not_flow_to_dependencies() {
        let (graph, a, b, _, _) = chain();
        let map = propagate_impact(&graph, &[b], &WeightTable::default());
        assert!(map.get(a).is_infinite());
        assert!(map.is_seed(b));
    }

    #[test]
    fn test_heavier_edges_shorten_distance() {
        let (mut graph, a, _, _, lone) = chain();
        graph
            .add_dependency_count(lone, a, DependencyKind::Use, 2)
            .unwrap();
        let map = propagate_impact(&graph, &[a], &WeightTable::default());
        assert_eq!(map.get(lone), 0.125);
        assert_eq!(map.ranked()[0].0, lone);
    }

    #[test]
    fn test_nearest_seed_wins() {
        let (graph, a, b, c, _) = chain();
        let map = propagate_impact(&graph, &[a, b], &WeightTable::default());
        assert_eq!(map.get(c), 0.25);
        assert_eq!(map.ranked(), vec![(c, 0.25)]);
    }
}
