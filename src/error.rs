//! Error types for Ripple.
//!
//! `RippleError` is the user-facing taxonomy: configuration problems skip a
//! job, build errors abort one version, format errors reject an artifact.
//! Internal-consistency failures of the graph itself are [`GraphError`]s and
//! are never tolerated silently.

use std::path::Path;

use thiserror::Error;

pub use crate::graph::GraphError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RippleError>;

#[derive(Debug, Error)]
pub enum RippleError {
    /// A job description is missing a required field or is contradictory.
    #[error("configuration error in {job}: {reason}")]
    Configuration { job: String, reason: String },

    /// The front end produced no usable event stream, or an event shape the
    /// builder does not recognize.
    #[error("build error in {location}: {reason}")]
    Build { location: String, reason: String },

    /// A loaded artifact is corrupt or of the wrong kind.
    #[error("format error in {path}: {reason}")]
    Format { path: String, reason: String },

    /// A graph invariant was violated.
    #[error("graph invariant violated: {0}")]
    Graph(#[from] GraphError),

    /// The tree-sitter grammar could not be loaded.
    #[error("parser setup failed: {0}")]
    Parser(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RippleError {
    pub fn configuration(job: impl Into<String>, reason: impl Into<String>) -> Self {
        RippleError::Configuration {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Build error located at `file`, optionally naming the offending symbol.
    pub fn build(file: &Path, symbol: Option<&str>, reason: impl Into<String>) -> Self {
        let location = match symbol {
            Some(symbol) => format!("{} at '{}'", file.display(), symbol),
            None => file.display().to_string(),
        };
        RippleError::Build {
            location,
            reason: reason.into(),
        }
    }

    pub fn format(path: &Path, reason: impl Into<String>) -> Self {
        RippleError::Format {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}
