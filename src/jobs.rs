//! Batch job runner.
//!
//! Versions are built in parallel, each on its own builder. Diff jobs run
//! after every version has finished. A failing job is logged and recorded
//! in the [`JobSummary`]; the jobs that do not depend on it still run.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{DiffJob, JobPlan, RippleConfig, VersionJob};
use crate::diff::{diff_graphs, DiffArtifact, DiffSummary};
use crate::error::{Result, RippleError};
use crate::export::{export_diff, export_graph, write_json};
use crate::graph::{build_graph, load_graph, save_diff, save_graph, CodeGraph, WeightTable};
use crate::impact::impact_of;
use crate::parser::{discover_sources, CppFrontEnd};

/// What happened to each job of a run.
#[derive(Debug, Default)]
pub struct JobSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, RippleError)>,
}

impl JobSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} job(s) succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (job, err) in &self.failed {
            write!(f, "\n  {job}: {err}")?;
        }
        Ok(())
    }
}

/// Where a run writes its artifacts.
pub fn graph_artifact_path(output_dir: &Path, version: &str) -> PathBuf {
    output_dir.join(format!("{version}.graph.bin"))
}

pub fn diff_artifact_path(output_dir: &Path, job: &DiffJob) -> PathBuf {
    output_dir.join(format!("{}.diff.bin", job.label()))
}

/// Load a config file and run every job in it.
pub fn run_config(path: &Path) -> Result<JobSummary> {
    let config = RippleConfig::load(path)?;
    run_plan(config.plan())
}

/// Run a validated plan. Only failing to create the output directory
/// aborts the whole run.
pub fn run_plan(plan: JobPlan) -> Result<JobSummary> {
    std::fs::create_dir_all(&plan.output_dir)?;
    let mut summary = JobSummary::default();

    for err in plan.rejected {
        warn!(error = %err, "job skipped");
        let job = match &err {
            RippleError::Configuration { job, .. } => job.clone(),
            _ => "config".to_string(),
        };
        summary.failed.push((job, err));
    }

    let built: Vec<(String, Result<CodeGraph>)> = plan
        .versions
        .par_iter()
        .map(|job| {
            (
                job.name.clone(),
                run_version(job, &plan.output_dir, &plan.weights),
            )
        })
        .collect();

    let mut graphs: HashMap<String, CodeGraph> = HashMap::new();
    for (name, result) in built {
        let label = format!("version '{name}'");
        match result {
            Ok(graph) => {
                info!(version = %name, nodes = graph.node_count(), "version ready");
                summary.succeeded.push(label);
                graphs.insert(name, graph);
            }
            Err(e) => {
                error!(version = %name, error = %e, "version failed");
                summary.failed.push((label, e));
            }
        }
    }

    for job in &plan.diffs {
        let label = format!("diff '{}'", job.label());
        match run_diff(job, &graphs, &plan.output_dir, &plan.weights) {
            Ok(diff) => {
                info!(diff = %job.label(), summary = %diff, "diff written");
                summary.succeeded.push(label);
            }
            Err(e) => {
                error!(diff = %job.label(), error = %e, "diff failed");
                summary.failed.push((label, e));
            }
        }
    }

    Ok(summary)
}

/// Build or load one version and write its artifacts.
pub fn run_version(job: &VersionJob, output_dir: &Path, weights: &WeightTable) -> Result<CodeGraph> {
    let graph = match &job.artifact {
        Some(artifact) => {
            info!(version = %job.name, artifact = %artifact.display(), "loading graph artifact");
            load_graph(artifact)?
        }
        None => {
            let graph = build_version(job, weights)?;
            save_graph(&graph, &graph_artifact_path(output_dir, &job.name))?;
            graph
        }
    };
    write_json(
        &export_graph(&graph, &job.name),
        &output_dir.join(format!("{}.graph.json", job.name)),
    )?;
    Ok(graph)
}

/// Parse the sources of one version and build its graph.
pub fn build_version(job: &VersionJob, weights: &WeightTable) -> Result<CodeGraph> {
    let mut files = discover_sources(&job.sources, false);
    files.extend(discover_sources(&job.include_paths, true));
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(RippleError::Build {
            location: format!("version '{}'", job.name),
            reason: "no C++ sources found".to_string(),
        });
    }
    info!(version = %job.name, files = files.len(), "building version");

    let units = CppFrontEnd::new()?.parse_files(&files)?;
    build_graph(&units, *weights)
}

fn run_diff(
    job: &DiffJob,
    graphs: &HashMap<String, CodeGraph>,
    output_dir: &Path,
    weights: &WeightTable,
) -> Result<DiffSummary> {
    let side = |name: &str| {
        graphs.get(name).ok_or_else(|| RippleError::Build {
            location: format!("diff '{}'", job.label()),
            reason: format!("version '{name}' is unavailable"),
        })
    };
    let before = side(&job.before)?;
    let after = side(&job.after)?;

    let report = diff_graphs(before, after);
    let impact = impact_of(before, after, &report, weights);
    let artifact = DiffArtifact {
        before_name: job.before.clone(),
        after_name: job.after.clone(),
        before: before.clone(),
        after: after.clone(),
        report,
        impact,
    };
    save_diff(&artifact, &diff_artifact_path(output_dir, job))?;
    write_json(
        &export_diff(&artifact),
        &output_dir.join(format!("{}.diff.json", job.label())),
    )?;
    Ok(artifact.report.summary())
}
