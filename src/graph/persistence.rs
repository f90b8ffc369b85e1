//! Artifact files for locked graphs and diff results.
//!
//! Every artifact is a bincode header followed by a bincode payload. The
//! header names the artifact kind, so a graph file handed to a diff loader
//! (or the other way round) is rejected instead of misread.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::engine::CodeGraph;
use super::types::NodeKind;
use crate::diff::DiffArtifact;
use crate::error::{Result, RippleError};

const MAGIC: [u8; 4] = *b"RPLG";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Graph,
    Diff,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    magic: [u8; 4],
    format_version: u32,
    kind: ArtifactKind,
    created_at: DateTime<Utc>,
}

/// Save a locked graph. Graphs that still hold placeholders are refused.
pub fn save_graph(graph: &CodeGraph, path: &Path) -> Result<()> {
    if !graph.is_locked() {
        return Err(RippleError::format(path, "only locked graphs can be saved"));
    }
    if !graph.nodes_of_kind(NodeKind::Unknown).is_empty() {
        return Err(RippleError::format(path, "graph holds unresolved placeholders"));
    }
    write_artifact(path, ArtifactKind::Graph, graph)?;
    info!(path = %path.display(), nodes = graph.node_count(), "saved graph");
    Ok(())
}

/// Load a graph artifact and check its invariants.
pub fn load_graph(path: &Path) -> Result<CodeGraph> {
    let graph: CodeGraph = read_artifact(path, ArtifactKind::Graph)?;
    graph
        .verify()
        .map_err(|e| RippleError::format(path, e.to_string()))?;
    if !graph.is_locked() {
        return Err(RippleError::format(path, "stored graph is not locked"));
    }
    debug!(path = %path.display(), nodes = graph.node_count(), "loaded graph");
    Ok(graph)
}

pub fn save_diff(artifact: &DiffArtifact, path: &Path) -> Result<()> {
    write_artifact(path, ArtifactKind::Diff, artifact)?;
    info!(path = %path.display(), "saved diff");
    Ok(())
}

pub fn load_diff(path: &Path) -> Result<DiffArtifact> {
    let artifact: DiffArtifact = read_artifact(path, ArtifactKind::Diff)?;
    for graph in [&artifact.before, &artifact.after] {
        graph
            .verify()
            .map_err(|e| RippleError::format(path, e.to_string()))?;
    }
    Ok(artifact)
}

fn write_artifact<T: Serialize>(path: &Path, kind: ArtifactKind, payload: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let header = ArtifactHeader {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        kind,
        created_at: Utc::now(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, &header)
        .map_err(|e| RippleError::format(path, e.to_string()))?;
    bincode::serialize_into(&mut writer, payload)
        .map_err(|e| RippleError::format(path, e.to_string()))?;
    writer.flush()?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path, expected: ArtifactKind) -> Result<T> {
    let mut reader = BufReader::new(File::open(path)?);
    let header: ArtifactHeader = bincode::deserialize_from(&mut reader)
        .map_err(|e| RippleError::format(path, format!("unreadable header: {e}")))?;
    if header.magic != MAGIC {
        return Err(RippleError::format(path, "not a ripple artifact"));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(RippleError::format(
            path,
            format!("unsupported format version {}", header.format_version),
        ));
    }
    if header.kind != expected {
        return Err(RippleError::format(
            path,
            format!("expected a {:?} artifact, found {:?}", expected, header.kind),
        ));
    }
    bincode::deserialize_from(&mut reader).map_err(|e| RippleError::format(path, e.to_string()))
}
