//! Batch job configuration, read from TOML.
//!
//! ```toml
//! output_dir = ".ripple"
//!
//! [weights]
//! use = 4.0
//!
//! [[version]]
//! name = "v1"
//! sources = ["v1/src"]
//! include_paths = ["v1/include"]
//!
//! [[diff]]
//! before = "v1"
//! after = "v2"
//! ```
//!
//! Relative paths are resolved against the directory holding the file. A job
//! missing a required field is rejected on its own; the other jobs still run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, RippleError};
use crate::graph::WeightTable;

/// The file as written. Job fields are optional here so that one bad job
/// does not make the whole file unreadable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RippleConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub weights: WeightTable,
    #[serde(default, rename = "version")]
    pub versions: Vec<VersionEntry>,
    #[serde(default, rename = "diff")]
    pub diffs: Vec<DiffEntry>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".ripple")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionEntry {
    pub name: Option<String>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    /// Load this graph artifact instead of building from sources.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffEntry {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// A validated version-build job.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionJob {
    pub name: String,
    pub sources: Vec<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub artifact: Option<PathBuf>,
}

/// A validated diff job between two named versions.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffJob {
    pub before: String,
    pub after: String,
}

impl DiffJob {
    pub fn label(&self) -> String {
        format!("{}..{}", self.before, self.after)
    }
}

/// Validated jobs plus the configuration errors of rejected ones.
#[derive(Debug, Default)]
pub struct JobPlan {
    pub output_dir: PathBuf,
    pub weights: WeightTable,
    pub versions: Vec<VersionJob>,
    pub diffs: Vec<DiffJob>,
    pub rejected: Vec<RippleError>,
}

impl RippleConfig {
    /// Read a config file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RippleError::configuration("config", e.to_string()))
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.output_dir);
        for version in &mut self.versions {
            version.sources.iter_mut().for_each(join);
            version.include_paths.iter_mut().for_each(join);
            if let Some(artifact) = version.artifact.as_mut() {
                join(artifact);
            }
        }
    }

    /// Validate every job. Rejected jobs become configuration errors.
    pub fn plan(&self) -> JobPlan {
        let mut plan = JobPlan {
            output_dir: self.output_dir.clone(),
            weights: self.weights,
            ..JobPlan::default()
        };

        let mut names = HashSet::new();
        for (pos, entry) in self.versions.iter().enumerate() {
            match validate_version(pos, entry) {
                Ok(job) if !names.insert(job.name.clone()) => plan.rejected.push(
                    RippleError::configuration(
                        format!("version '{}'", job.name),
                        "duplicate version name",
                    ),
                ),
                Ok(job) => plan.versions.push(job),
                Err(e) => plan.rejected.push(e),
            }
        }

        for (pos, entry) in self.diffs.iter().enumerate() {
            match validate_diff(pos, entry, &names) {
                Ok(job) => plan.diffs.push(job),
                Err(e) => plan.rejected.push(e),
            }
        }
        plan
    }
}

fn validate_version(pos: usize, entry: &VersionEntry) -> Result<VersionJob> {
    let name = match entry.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(RippleError::configuration(
                format!("version job #{}", pos + 1),
                "missing required field 'name'",
            ))
        }
    };
    if entry.sources.is_empty() && entry.artifact.is_none() {
        return Err(RippleError::configuration(
            format!("version '{name}'"),
            "missing required field 'sources' (or an 'artifact' to load)",
        ));
    }
    Ok(VersionJob {
        name,
        sources: entry.sources.clone(),
        include_paths: entry.include_paths.clone(),
        artifact: entry.artifact.clone(),
    })
}

fn validate_diff(pos: usize, entry: &DiffEntry, known: &HashSet<String>) -> Result<DiffJob> {
    let job = format!("diff job #{}", pos + 1);
    let field = |value: &Option<String>, field: &str| match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(RippleError::configuration(
            job.clone(),
            format!("missing required field '{field}'"),
        )),
    };
    let before = field(&entry.before, "before")?;
    let after = field(&entry.after, "after")?;
    for name in [&before, &after] {
        if !known.contains(name) {
            return Err(RippleError::configuration(
                job,
                format!("unknown version '{name}'"),
            ));
        }
    }
    Ok(DiffJob { before, after })
}
