//! Code graph: the structural backbone of Ripple.
//!
//! Provides the graph data model, the engine enforcing its invariants,
//! the builder that assembles a graph from declaration events, and
//! artifact persistence.

pub mod builder;
pub mod engine;
pub mod persistence;
pub mod types;

pub use builder::{build_graph, GraphBuilder};
pub use engine::{CodeGraph, GraphError, GraphStats};
pub use persistence::{load_diff, load_graph, save_diff, save_graph, ArtifactKind};
pub use types::{
    Dependency, DependencyKind, IdAllocator, NodeData, NodeDetail, NodeId, NodeKind, WeightTable,
};
