//! Traffic simulation CLI
//!
//! Live mode runs the orchestrator and both workers as concurrent tasks on
//! the wall clock; `--scenario` runs fault scenarios on the virtual clock.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use traffic_core::{
    BootstrapError, CoreError, MobilityPartition, Orchestrator, SignalPartition, SimulationConfig,
    Snapshot, Worker,
};
use traffic_env::{BlobRef, BlobStore, LocalBlobStore, TokioContext};
use traffic_sim::scenarios::ScenarioId;
use traffic_sim::{InMemoryChannel, MemoryBlobStore, ScenarioResult, ScenarioRunner, TimelineExport, Topology};

/// Tick-synchronized traffic simulation
#[derive(Parser, Debug)]
#[command(name = "traffic-sim")]
#[command(about = "Run the traffic simulation live or under fault scenarios", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master seed for determinism; overrides the config file's seed
    /// (default 42, 0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of ticks to run
    #[arg(short, long, default_value = "20")]
    ticks: u64,

    /// Road network to bootstrap (triangle, grid)
    #[arg(long, default_value = "triangle")]
    topology: String,

    /// Directory for the blob store in live mode (in memory when absent)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Scenario to run (baseline, duplicate_delivery, reordered_delivery,
    /// late_delivery, poison_message, cold_start, transient_outage, all)
    #[arg(short = 'S', long)]
    scenario: Option<String>,

    /// Export the snapshot timeline to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Error)]
enum LiveError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging; stdout is kept for --json
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match &args.config {
        Some(path) => match SimulationConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid configuration {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => SimulationConfig::default(),
    };

    let Some(topology) = Topology::by_name(&args.topology) else {
        error!("Unknown topology '{}' (expected triangle or grid)", args.topology);
        return ExitCode::FAILURE;
    };

    let seed = match resolve_seed(args.seed, config.seed) {
        0 => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64),
        seed => seed,
    };

    match &args.scenario {
        Some(scenario) => run_scenarios(&args, scenario, config, topology, seed).await,
        None => {
            info!("Traffic simulation v0.1.0 (seed={}, topology={})", seed, topology.name);
            let outcome = match &args.store_dir {
                Some(dir) => run_live(Arc::new(LocalBlobStore::new(dir)), &args, config, &topology, seed).await,
                None => run_live(MemoryBlobStore::shared(), &args, config, &topology, seed).await,
            };
            match outcome {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Simulation stopped: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Seed precedence: command line, then config file, then 42.
fn resolve_seed(flag: Option<u64>, configured: Option<u64>) -> u64 {
    flag.or(configured).unwrap_or(DEFAULT_SEED)
}

/// Runs the orchestrator and both workers concurrently until the tick budget
/// is spent or Ctrl-C is pressed.
async fn run_live<St: BlobStore>(
    store: Arc<St>,
    args: &Args,
    mut config: SimulationConfig,
    topology: &Topology,
    seed: u64,
) -> Result<(), LiveError> {
    let context = Arc::new(TokioContext::with_seed(seed));

    let mut channels: Vec<String> = config.channels.tick_channels().iter().map(|c| c.to_string()).collect();
    channels.push(config.channels.updates.clone());
    channels.extend(config.channels.snapshots.clone());
    let channel = Arc::new(InMemoryChannel::new(context.clone(), seed, channels));

    if config.bundle.is_none() {
        let bundle = topology.upload(store.as_ref(), "bundle").await?;
        info!("Uploaded {} bundle ({} slices)", topology.name, bundle.len());
        config.bundle = Some(bundle);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let mut mobility: Worker<MobilityPartition, _, _, _> =
        Worker::new(context.clone(), channel.clone(), store.clone(), config.clone());
    let mut signal: Worker<SignalPartition, _, _, _> =
        Worker::new(context.clone(), channel.clone(), store.clone(), config.clone());
    let mobility_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { mobility.run(shutdown).await }
    });
    let signal_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { signal.run(shutdown).await }
    });

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, stopping after the current tick");
                shutdown_tx.send_replace(true);
            }
        });
    }

    let mut orchestrator = Orchestrator::new(context, channel, store.clone(), config.clone());
    orchestrator.bootstrap().await?;
    let ticks = orchestrator.run_tick_loop(shutdown_rx, Some(args.ticks)).await?;

    shutdown_tx.send_replace(true);
    mobility_task.await??;
    signal_task.await??;

    let latest = Snapshot::latest_name(&config.snapshot_prefix);
    if args.json {
        let summary = serde_json::json!({
            "seed": seed,
            "topology": topology.name,
            "ticks": ticks,
            "latest": latest,
        });
        println!("{}", summary);
    } else {
        info!("Ran {} ticks, latest snapshot at {}", ticks, latest);
    }

    if let Some(path) = &args.export {
        let mut export = TimelineExport::new("live", seed, topology.name);
        for tick in 1..=ticks {
            let location = BlobRef::new(Snapshot::blob_name(&config.snapshot_prefix, tick));
            match store.get(&location).await.map(|bytes| Snapshot::from_json(&bytes)) {
                Ok(Ok(snapshot)) => export.add_frame(snapshot),
                Ok(Err(e)) => warn!("Unreadable snapshot {}: {}", location, e),
                Err(e) => warn!("Missing snapshot {}: {}", location, e),
            }
        }
        export.finalize(true, None);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path.display()),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }
    Ok(())
}

async fn run_scenarios(
    args: &Args,
    scenario: &str,
    config: SimulationConfig,
    topology: Topology,
    seed: u64,
) -> ExitCode {
    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if scenario == "all" {
        ScenarioId::all()
    } else {
        match scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                return ExitCode::FAILURE;
            }
        }
    };
    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        return ExitCode::FAILURE;
    }

    let runner = ScenarioRunner::new(seed)
        .with_ticks(args.ticks)
        .with_topology(topology.clone())
        .with_config(config);

    let mut results: Vec<ScenarioResult> = Vec::new();
    for scenario in scenarios {
        let result = runner.run(scenario).await;
        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED - {}", scenario.name(), seed, scenario.description());
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    if let (Some(path), Some(result)) = (&args.export, results.first()) {
        let mut export = TimelineExport::new(result.scenario.name(), seed, topology.name);
        for frame in &result.timeline {
            export.add_frame(frame.clone());
        }
        export.finalize(result.passed, result.failure_reason.clone());
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path.display()),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "deltas_applied": r.metrics.deltas_applied,
                    "late_deltas": r.metrics.late_deltas,
                    "poison_discarded": r.metrics.poison_discarded,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string()));
    } else if failed == 0 {
        info!("✅ All {} scenario runs passed!", results.len());
    } else {
        error!("❌ {}/{} scenario runs failed!", failed, results.len());
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
