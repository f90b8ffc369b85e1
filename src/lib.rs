//! # Ripple
//!
//! Structural graphs of C++ codebases, cross-revision diffs and change
//! impact.
//!
//! Ripple parses a revision of a C++ codebase into a canonical graph of
//! namespaces, classes, functions and variables, with counted dependency
//! edges between them. Two such graphs can be aligned node by node, and
//! every change is weighted by how much other code depends on it.
//!
//! ## Key Features
//!
//! - **Canonical graph**: symbols seen in many files collapse into one node
//! - **Four-level matching**: from "same kind" up to "same body and dependencies"
//! - **Impact**: shortest weighted distance from any change along reverse edges
//! - **Artifacts**: graphs and diffs persist as versioned binary files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ripple::{build_graph, diff_graphs, impact_of, CppFrontEnd, WeightTable};
//! use std::path::PathBuf;
//!
//! let mut front_end = CppFrontEnd::new()?;
//! let before = build_graph(
//!     &front_end.parse_files(&[PathBuf::from("v1/shape.cpp")])?,
//!     WeightTable::default(),
//! )?;
//! let after = build_graph(
//!     &front_end.parse_files(&[PathBuf::from("v2/shape.cpp")])?,
//!     WeightTable::default(),
//! )?;
//!
//! let report = diff_graphs(&before, &after);
//! let impact = impact_of(&before, &after, &report, &WeightTable::default());
//! println!("{}", report.summary());
//! # Ok::<(), ripple::RippleError>(())
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod export;
pub mod graph;
pub mod impact;
pub mod jobs;
pub mod matcher;
pub mod parser;

// Re-exports for convenience
pub use error::{Result, RippleError};

// Graph re-exports
pub use graph::{
    build_graph, load_diff, load_graph, save_diff, save_graph, CodeGraph, Dependency,
    DependencyKind, GraphBuilder, GraphError, GraphStats, NodeData, NodeId, NodeKind, WeightTable,
};

pub use events::{DeclEvent, DeclKind, Reference, SymbolId, SymbolRef, TranslationUnit};
pub use parser::{discover_sources, CppFrontEnd, SourceKind};

// Comparison
pub use diff::{diff_graphs, diff_with, DiffArtifact, DiffReport, DiffSummary};
pub use impact::{impact_of, propagate_impact, ImpactMap, ImpactReport};
pub use matcher::{MatchLevel, Matcher, Side};

// Batch runs
pub use config::{DiffJob, JobPlan, RippleConfig, VersionJob};
pub use export::{export_diff, export_graph, write_json, GraphExport};
pub use jobs::{run_config, run_plan, JobSummary};
