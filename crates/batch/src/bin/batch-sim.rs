//! batch-sim -- drive the adaptive batch scheduler with synthetic load.
//!
//! Submits a burst of synthetic analysis requests with a spread of
//! priorities against the in-process [`SimulatedProvider`], waits for every
//! outcome and prints the final status, metrics and recent batch history as
//! JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use credence_batch::{OutcomeStatus, Scheduler, SimulatedProvider, Submission};
use credence_core::config::{load_dotenv, Config};
use credence_core::{AnalysisKind, BatchConfig, Metadata};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic load generator for the batch scheduler.
#[derive(Parser, Debug)]
#[command(name = "batch-sim", version, about)]
struct Cli {
    /// Number of requests to submit.
    #[arg(long, env = "SIM_REQUESTS", default_value_t = 20)]
    requests: usize,

    /// Simulated provider latency per request, in milliseconds.
    #[arg(long, env = "SIM_LATENCY_MS", default_value_t = 50)]
    latency_ms: u64,

    /// Fail every n-th provider call (0 = never).
    #[arg(long, env = "SIM_FAIL_EVERY", default_value_t = 0)]
    fail_every: u64,

    /// Analysis kind for every request.
    #[arg(long, env = "SIM_KIND", default_value = "full")]
    kind: AnalysisKind,

    /// Requests cycle through priorities 0..levels.
    #[arg(long, env = "SIM_PRIORITY_LEVELS", default_value_t = 3)]
    priority_levels: u32,

    /// Optional TOML file with scheduler settings. Environment is used otherwise.
    #[arg(long, env = "BATCH_CONFIG")]
    config: Option<PathBuf>,

    /// How long to wait for each outcome, in seconds.
    #[arg(long, env = "SIM_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

fn load_config(cli: &Cli) -> anyhow::Result<BatchConfig> {
    match &cli.config {
        Some(path) => {
            let batch = BatchConfig::from_toml_file(path)?;
            info!(path = %path.display(), "loaded scheduler config");
            batch.log_summary();
            Ok(batch)
        }
        None => {
            let config = Config::from_env();
            config.log_summary();
            Ok(config.batch)
        }
    }
}

fn synthetic_load(count: usize, kind: AnalysisKind, levels: u32) -> Vec<Submission> {
    let levels = levels.max(1) as usize;
    (0..count)
        .map(|i| {
            let mut metadata = Metadata::new();
            metadata.insert("sequence".to_string(), json!(i));
            Submission {
                payload: json!(format!("synthetic transcript #{i}")),
                kind,
                priority: (i % levels) as i32,
                metadata,
            }
        })
        .collect()
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let chunk = config.max_bulk_submit;

    let provider = Arc::new(
        SimulatedProvider::new(Duration::from_millis(cli.latency_ms)).fail_every(cli.fail_every),
    );
    let scheduler = Scheduler::new(config, provider)?;
    scheduler.start();

    let started = Instant::now();
    let mut ids = Vec::with_capacity(cli.requests);
    let mut load = synthetic_load(cli.requests, cli.kind, cli.priority_levels);
    while !load.is_empty() {
        let rest = load.split_off(chunk.min(load.len()));
        ids.extend(scheduler.submit_many(load)?);
        load = rest;
    }
    info!(submitted = ids.len(), kind = %cli.kind, "synthetic load submitted");

    let timeout = Duration::from_secs(cli.timeout_secs);
    let outcomes = join_all(ids.iter().map(|id| scheduler.await_outcome(id, timeout))).await;

    let completed = outcomes
        .iter()
        .flatten()
        .filter(|o| o.status == OutcomeStatus::Completed)
        .count();
    let failed = outcomes
        .iter()
        .flatten()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    let missing = outcomes.iter().filter(|o| o.is_none()).count();
    if missing > 0 {
        warn!(missing, "some outcomes did not arrive before the timeout");
    }
    info!(
        completed,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );

    scheduler.tune();
    let metrics = scheduler.refresh_metrics();
    let report = json!({
        "status": scheduler.status(),
        "metrics": metrics,
        "batches": scheduler.batch_history(10),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    scheduler.stop();
    scheduler.stopped().await;
    info!("batch-sim exited cleanly");
    Ok(())
}
