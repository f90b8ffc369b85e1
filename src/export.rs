//! Flat relational projection of graphs and diffs.
//!
//! Rows reference nodes by their per-graph [`NodeId`](crate::graph::NodeId)
//! and carry the version name, so rows of several versions can live in one
//! table.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::diff::DiffArtifact;
use crate::error::Result;
use crate::graph::{CodeGraph, DependencyKind, NodeKind};
use petgraph::stable_graph::NodeIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub version: String,
    pub id: u32,
    pub kind: NodeKind,
    pub parent_id: Option<u32>,
    pub name: String,
    pub unique_name: String,
    pub signature: String,
    pub type_id: Option<u32>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRow {
    pub version: String,
    pub class_id: u32,
    pub base_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRow {
    pub version: String,
    pub function_id: u32,
    pub parameter_id: u32,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseRow {
    pub version: String,
    pub node_a: u32,
    pub node_b: u32,
    pub kind: DependencyKind,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Unchanged,
    Changed,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceRow {
    pub version_a: String,
    pub version_b: String,
    pub node_a: Option<u32>,
    pub node_b: Option<u32>,
    pub diff_kind: DiffKind,
    /// Impact distance of the before node, if it was reached.
    pub impact_a: Option<f64>,
    /// Impact distance of the after node, if it was reached.
    pub impact_b: Option<f64>,
}

/// All rows describing one graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeRow>,
    pub bases: Vec<BaseRow>,
    pub parameters: Vec<ParameterRow>,
    pub uses: Vec<UseRow>,
}

pub fn export_graph(graph: &CodeGraph, version: &str) -> GraphExport {
    let id_of = |idx: NodeIndex| graph.node(idx).map(|n| n.id.0);
    let mut out = GraphExport::default();

    let order = graph
        .walk_tree()
        .into_iter()
        .chain(graph.detached_nodes());
    for idx in order {
        let Some(node) = graph.node(idx) else {
            continue;
        };
        out.nodes.push(NodeRow {
            version: version.to_string(),
            id: node.id.0,
            kind: node.kind,
            parent_id: node.parent().and_then(id_of),
            name: node.name.clone(),
            unique_name: node.unique_name.clone(),
            signature: node.signature.clone(),
            type_id: node.type_ref.and_then(id_of),
            weight: node.weight,
        });
        for base in node.bases().iter().filter_map(|b| id_of(*b)) {
            out.bases.push(BaseRow {
                version: version.to_string(),
                class_id: node.id.0,
                base_id: base,
            });
        }
        for (position, param) in node.params().iter().enumerate() {
            if let Some(parameter_id) = id_of(*param) {
                out.parameters.push(ParameterRow {
                    version: version.to_string(),
                    function_id: node.id.0,
                    parameter_id,
                    position,
                });
            }
        }
        for (target, dep) in graph.dependencies(idx) {
            if let Some(node_b) = id_of(target) {
                out.uses.push(UseRow {
                    version: version.to_string(),
                    node_a: node.id.0,
                    node_b,
                    kind: dep.kind,
                    count: dep.count,
                });
            }
        }
    }
    out
}

/// One row per classified node or pair of a stored diff.
pub fn export_diff(artifact: &DiffArtifact) -> Vec<DifferenceRow> {
    let id_a = |idx: NodeIndex| artifact.before.node(idx).map(|n| n.id.0);
    let id_b = |idx: NodeIndex| artifact.after.node(idx).map(|n| n.id.0);
    let finite = |d: f64| d.is_finite().then_some(d);
    let row = |a: Option<NodeIndex>, b: Option<NodeIndex>, diff_kind: DiffKind| DifferenceRow {
        version_a: artifact.before_name.clone(),
        version_b: artifact.after_name.clone(),
        node_a: a.and_then(id_a),
        node_b: b.and_then(id_b),
        diff_kind,
        impact_a: a.and_then(|a| finite(artifact.impact.before.get(a))),
        impact_b: b.and_then(|b| finite(artifact.impact.after.get(b))),
    };

    let report = &artifact.report;
    let mut rows = Vec::with_capacity(
        report.removed.len() + report.added.len() + report.changed.len() + report.unchanged.len(),
    );
    rows.extend(report.removed.iter().map(|a| row(Some(*a), None, DiffKind::Removed)));
    rows.extend(report.added.iter().map(|b| row(None, Some(*b), DiffKind::Added)));
    rows.extend(
        report
            .changed
            .iter()
            .map(|(a, b)| row(Some(*a), Some(*b), DiffKind::Changed)),
    );
    rows.extend(
        report
            .unchanged
            .iter()
            .map(|(a, b)| row(Some(*a), Some(*b), DiffKind::Unchanged)),
    );
    rows
}

/// Write any export as pretty JSON.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_graphs;
    use crate::events::{DeclEvent, DeclKind, SymbolRef, TranslationUnit};
    use crate::graph::{build_graph, WeightTable};
    use crate::impact::impact_of;
    use tempfile::TempDir;

    fn sample(field: &str) -> CodeGraph {
        let int = SymbolRef::literal("int");
        let base = DeclEvent::named(DeclKind::Class, "B", "class B");
        let class = DeclEvent::named(DeclKind::Class, "D", "class D : B")
            .with_base(base.to_ref())
            .with_child(
                DeclEvent::named(DeclKind::Function, "D::get", "int get(int)")
                    .with_type(int.clone())
                    .with_param(DeclEvent::named(DeclKind::Variable, "D::get::#0", "int").with_type(int.clone())),
            )
            .with_child(
                DeclEvent::named(DeclKind::Variable, &format!("D::{field}"), format!("int {field}"))
                    .with_type(int),
            );
        build_graph(
            &[TranslationUnit::new("e.cpp", vec![base, class])],
            WeightTable::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_graph_rows() {
        let graph = sample("x");
        let export = export_graph(&graph, "v1");
        assert_eq!(export.nodes.len(), graph.node_count());
        assert_eq!(export.nodes[0].kind, NodeKind::Root);
        assert_eq!(export.bases.len(), 1);
        assert_eq!(export.parameters.len(), 1);
        assert_eq!(export.parameters[0].position, 0);
        let total: u32 = export.uses.iter().map(|u| u.count).sum();
        assert_eq!(total as usize, graph.stats().total_dependencies);
        let literal = export
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Integral)
            .unwrap();
        assert_eq!(literal.parent_id, None);
    }

    #[test]
    fn test_difference_rows_cover_report() {
        let before = sample("x");
        let after = sample("y");
        let report = diff_graphs(&before, &after);
        let impact = impact_of(&before, &after, &report, &WeightTable::default());
        let artifact = DiffArtifact {
            before_name: "v1".into(),
            after_name: "v2".into(),
            before,
            after,
            report,
            impact,
        };
        let rows = export_diff(&artifact);
        let summary = artifact.report.summary();
        assert_eq!(
            rows.len(),
            summary.removed + summary.added + summary.changed + summary.unchanged
        );
        let removed = rows.iter().find(|r| r.diff_kind == DiffKind::Removed).unwrap();
        assert_eq!(removed.node_b, None);
        assert_eq!(removed.impact_a, Some(0.0));
    }

    #[test]
    fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/v1.nodes.json");
        write_json(&export_graph(&sample("x"), "v1"), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: GraphExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.nodes[0].version, "v1");
    }
}
