//! affil-classify - command-line entry point
//!
//! Reads harvester JSONL, merges records by identifier, resolves place
//! countries, classifies every entity and writes the annotated JSONL plus an
//! optional run report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use affil_classify::graph::{GraphQuery, MemoryGraph, SparqlGraph};
use affil_classify::{AttributionLabel, ClassificationPipeline, ClassifierConfig, FailurePolicy};
use affil_common::jsonl::write_jsonl;
use affil_common::logging::init_tracing;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for affil-classify
#[derive(Parser, Debug)]
#[command(name = "affil-classify")]
#[command(about = "Classify harvested entities by affiliation (A, B, Mixed, Other)")]
#[command(version)]
struct Args {
    /// Input JSONL files or directories containing *.jsonl
    #[arg(long = "in", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Output JSONL (one classified entity per line)
    #[arg(long)]
    out: PathBuf,

    /// Optional run report (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Configuration file (overrides AFFIL_CONFIG and the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum Other score to label Other when A/B evidence is absent
    #[arg(long)]
    other_threshold: Option<i64>,

    /// Resolve places offline from a JSON graph snapshot instead of SPARQL
    #[arg(long, env = "AFFIL_GRAPH_SNAPSHOT")]
    graph_snapshot: Option<PathBuf>,

    /// SPARQL endpoint URL
    #[arg(long, env = "AFFIL_SPARQL_ENDPOINT")]
    endpoint: Option<String>,

    /// Places per resolver query
    #[arg(long)]
    batch_size: Option<usize>,

    /// Resolver queries in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Abort the run or continue with a partial place index when resolution fails
    #[arg(long, value_enum)]
    on_resolver_failure: Option<FailurePolicy>,

    /// Log filter directive (RUST_LOG takes precedence)
    #[arg(long, env = "AFFIL_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Command-line values win over the configuration file
    fn apply_to(&self, config: &mut ClassifierConfig) {
        if let Some(threshold) = self.other_threshold {
            config.scoring.threshold = threshold;
        }
        if let Some(endpoint) = &self.endpoint {
            config.resolver.endpoint = endpoint.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.resolver.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.resolver.concurrency = concurrency;
        }
        if let Some(policy) = self.on_resolver_failure {
            config.resolver.on_failure = policy;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        ClassifierConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_to(&mut config);

    init_tracing(&config.logging, args.log_level.as_deref())
        .context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        inputs = args.inputs.len(),
        out = %args.out.display(),
        "Starting affil-classify"
    );

    let settings = config.validate().context("Invalid configuration")?;

    let graph: Arc<dyn GraphQuery> = match &args.graph_snapshot {
        Some(path) => Arc::new(
            MemoryGraph::load(path)
                .with_context(|| format!("Failed to load graph snapshot {}", path.display()))?,
        ),
        None => Arc::new(
            SparqlGraph::new(settings.sparql.clone()).context("Failed to create SPARQL client")?,
        ),
    };

    let pipeline = ClassificationPipeline::new(settings, graph)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let output = pipeline
        .run(&args.inputs, &cancel)
        .await
        .context("Classification failed")?;

    if output.classification.resolver.cancelled {
        warn!("Run was interrupted; output scored with a partial place index");
    }

    write_jsonl(&args.out, &output.classification.entities)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    info!(
        path = %args.out.display(),
        entities = output.classification.entities.len(),
        "Output written"
    );

    if let Some(path) = &args.report {
        write_report(path, &output.report)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    let counts = &output.classification.label_counts;
    info!(
        run_id = %output.run_id,
        a = counts.get(&AttributionLabel::A).copied().unwrap_or(0),
        b = counts.get(&AttributionLabel::B).copied().unwrap_or(0),
        mixed = counts.get(&AttributionLabel::Mixed).copied().unwrap_or(0),
        other = counts.get(&AttributionLabel::Other).copied().unwrap_or(0),
        "Done"
    );

    Ok(())
}

fn write_report<T: serde::Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling remaining place queries");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling remaining place queries");
        },
    }

    cancel.cancel();
}
