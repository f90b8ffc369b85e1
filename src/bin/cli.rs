//! Ripple CLI - structural diffs and change impact for C++ codebases.
//!
//! Usage:
//!   ripple run --config ripple.toml         # Run every job of a config file
//!   ripple build <name> <sources...>        # Build one version's graph
//!   ripple diff <before.bin> <after.bin>    # Diff two graph artifacts
//!   ripple show <diff.bin>                  # Print a stored diff
//!   ripple stats <graph.bin>                # Graph statistics

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use ripple::config::VersionJob;
use ripple::jobs::{graph_artifact_path, run_version};
use ripple::{
    diff_graphs, impact_of, load_diff, load_graph, run_config, save_diff, CodeGraph, DiffArtifact,
    ImpactMap, WeightTable,
};

#[derive(Parser)]
#[command(name = "ripple")]
#[command(about = "Ripple - structural diffs and change impact for C++", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the version and diff jobs of a config file
    Run {
        #[arg(short, long, default_value = "ripple.toml")]
        config: PathBuf,
    },

    /// Build the graph of one version from source files or directories
    Build {
        /// Version name, used for artifact file names
        name: String,

        /// Files or directories to parse
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Directories whose headers are parsed too
        #[arg(short = 'I', long = "include")]
        include_paths: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".ripple")]
        out: PathBuf,
    },

    /// Diff two graph artifacts and rank the impact of the changes
    Diff {
        before: PathBuf,
        after: PathBuf,

        /// How many impacted nodes to list
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Also store the diff artifact here
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Print a stored diff artifact
    Show {
        diff: PathBuf,

        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Show graph statistics
    Stats { graph: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { config } => {
            let summary = run_config(&config)
                .with_context(|| format!("running {}", config.display()))?;
            println!("{summary}");
            if !summary.is_success() {
                bail!("{} job(s) failed", summary.failed.len());
            }
        }

        Commands::Build {
            name,
            sources,
            include_paths,
            out,
        } => {
            std::fs::create_dir_all(&out)?;
            let job = VersionJob {
                name,
                sources,
                include_paths,
                artifact: None,
            };
            let graph = run_version(&job, &out, &WeightTable::default())?;
            let stats = graph.stats();
            println!("✓ Graph built");
            println!("  Nodes:        {}", stats.total_nodes);
            println!("  Edges:        {}", stats.total_edges);
            println!("  Dependencies: {}", stats.total_dependencies);
            println!("  Artifact:     {}", graph_artifact_path(&out, &job.name).display());
        }

        Commands::Diff {
            before,
            after,
            top,
            save,
        } => {
            let before_graph = load_graph(&before)?;
            let after_graph = load_graph(&after)?;
            let report = diff_graphs(&before_graph, &after_graph);
            let impact = impact_of(&before_graph, &after_graph, &report, &WeightTable::default());
            let artifact = DiffArtifact {
                before_name: version_name(&before),
                after_name: version_name(&after),
                before: before_graph,
                after: after_graph,
                report,
                impact,
            };
            print_diff(&artifact, top);
            if let Some(path) = save {
                save_diff(&artifact, &path)?;
                info!(path = %path.display(), "diff saved");
            }
        }

        Commands::Show { diff, top } => {
            let artifact = load_diff(&diff)?;
            print_diff(&artifact, top);
        }

        Commands::Stats { graph } => {
            let graph = load_graph(&graph)?;
            let json = serde_json::to_string_pretty(&graph.stats())?;
            println!("{}", json);
        }
    }

    Ok(())
}

/// `v1.graph.bin` -> `v1`
fn version_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.strip_suffix(".graph.bin")
        .or_else(|| file.strip_suffix(".bin"))
        .unwrap_or(&file)
        .to_string()
}

fn print_diff(artifact: &DiffArtifact, top: usize) {
    println!(
        "{} -> {}: {}",
        artifact.before_name,
        artifact.after_name,
        artifact.report.summary()
    );
    print_impact("before", &artifact.before, &artifact.impact.before, top);
    print_impact("after", &artifact.after, &artifact.impact.after, top);
}

fn print_impact(label: &str, graph: &CodeGraph, impact: &ImpactMap, top: usize) {
    let ranked = impact.ranked();
    if ranked.is_empty() {
        return;
    }
    println!("\nMost affected ({label}):");
    for (node, distance) in ranked.into_iter().take(top) {
        if let Some(data) = graph.node(node) {
            let name = if data.unique_name.is_empty() {
                &data.name
            } else {
                &data.unique_name
            };
            println!("  {:>8.3}  {:<10} {}", distance, data.kind.to_string(), name);
        }
    }
}
