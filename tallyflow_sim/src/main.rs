//! TallyFlow DST Simulator CLI
//!
//! Run deterministic fault-injection scenarios against the ingestion pipeline,
//! or drive a generated election into live HTTP collaborators.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tallyflow_core::{
    AggregationClient, AggregationConfig, AggregationError, CandidateRoster, DedupGuard,
    IngestionPipeline, PipelineConfig, PipelineError, RegistryError, SimulationError,
    SimulationOrchestrator, SimulationRun, SledRegistry, VoteEmitter,
};
use tallyflow_env::{HttpAggregator, HttpSink, TokioContext, TransportError};
use tallyflow_sim::scenarios::ScenarioId;
use tallyflow_sim::{ScenarioResult, ScenarioRunner, SimExport};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// TallyFlow Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "tallyflow-sim")]
#[command(about = "Run deterministic election pipeline simulations for TallyFlow", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
    
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,
    
    /// Scenario to run (baseline, flaky_sink, sink_outage, duplicate_storm, restart_recovery, early_call, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,
    
    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,
    
    /// Number of regions
    #[arg(short, long, default_value = "5")]
    regions: usize,
    
    /// Total electorate
    #[arg(short, long, default_value = "10000")]
    population: u64,
    
    /// Number of parties
    #[arg(long, default_value = "3")]
    parties: usize,
    
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
    
    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
    
    /// Export the run (regions, aggregation parts, decision) to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an election and stream it to a live broker and aggregator
    Live(LiveArgs),
}

#[derive(ClapArgs, Debug)]
struct LiveArgs {
    /// Broker gateway endpoint receiving vote batches
    #[arg(long, env = "BROKER_URL")]
    broker_url: String,
    
    /// Base URL of the partial-result aggregator
    #[arg(long, env = "AGGREGATOR_URL")]
    aggregator_url: String,
    
    /// JSON candidate list (array of objects with an `id`)
    #[arg(long, env = "CANDIDATES_PATH")]
    candidates: PathBuf,
    
    /// Durable retry log for undelivered batches
    #[arg(long, env = "RETRY_LOG_PATH", default_value = "pending_batches.json")]
    retry_log: PathBuf,
    
    /// Durable voter registry directory (in-memory when omitted)
    #[arg(long, env = "REGISTRY_PATH")]
    registry: Option<PathBuf>,
    
    /// Total electorate
    #[arg(long, default_value = "10000")]
    population: u64,
    
    /// Number of regions
    #[arg(long, default_value = "5")]
    regions: usize,
    
    /// Events per batch
    #[arg(long, default_value = "100")]
    batch_size: usize,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    
    #[error(transparent)]
    Transport(#[from] TransportError),
    
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    
    #[error(transparent)]
    Registry(#[from] RegistryError),
    
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    
    #[error("aggregation aborted: {0}")]
    Aggregation(#[from] AggregationError),
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: tracing subscriber already set: {}", e);
    }
}

/// Streams one generated election into the live collaborators.
async fn run_live(args: LiveArgs) -> Result<(), CliError> {
    let roster = CandidateRoster::load(&args.candidates)?;
    let parties = roster.ids();
    info!("Loaded {} candidates from {}", parties.len(), args.candidates.display());
    
    let config = PipelineConfig {
        max_batch_size: args.batch_size,
        retry_log_path: args.retry_log,
        ..PipelineConfig::default()
    };
    let aggregation = AggregationConfig::default();
    
    let ctx = TokioContext::shared();
    let sink = Arc::new(HttpSink::new(args.broker_url, config.send_timeout)?);
    let aggregator = Arc::new(HttpAggregator::new(&args.aggregator_url, config.send_timeout)?);
    
    let guard = match &args.registry {
        Some(path) => DedupGuard::with_registry(roster, Box::new(SledRegistry::open(path)?)),
        None => DedupGuard::new(roster),
    };
    
    let pipeline = IngestionPipeline::new(Arc::clone(&ctx), config, guard, sink);
    pipeline.start();
    
    let run = SimulationRun::new(args.population, args.regions, parties);
    let results = SimulationOrchestrator::new(run).run_all(ctx.as_ref())?;
    
    let emitter = VoteEmitter::new(&pipeline);
    let mut client = AggregationClient::new(Arc::clone(&ctx), aggregator, aggregation, args.population);
    
    for (index, result) in results.iter().enumerate() {
        let report = emitter.emit_region(index, result).await?;
        info!(
            "{}: {} votes admitted ({} duplicates, {} invalid)",
            result.name, report.accepted, report.rejected_duplicate, report.rejected_invalid
        );
        
        if let Err(e) = client.submit_region(result).await {
            error!("Aggregation failed at part {}: {}", client.next_part(), e);
            pipeline.shutdown().await?;
            return Err(e.into());
        }
    }
    
    pipeline.shutdown().await?;
    
    let stats = pipeline.stats().snapshot();
    info!(
        "Delivered {} batches ({:.1} events avg), {} persisted for retry",
        stats.batches_delivered, stats.avg_batch_size, stats.batches_persisted
    );
    info!("Decision: {:?}", client.decision());
    Ok(())
}

fn live(args: LiveArgs) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_live(args))
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);
    
    if let Some(Command::Live(live_args)) = args.command {
        if let Err(e) = live(live_args) {
            error!("Live run failed: {}", e);
            std::process::exit(1);
        }
        return;
    }
    
    if !args.json {
        info!("TallyFlow DST Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
    
    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: baseline, flaky_sink, sink_outage, duplicate_storm, restart_recovery, early_call, all");
            std::process::exit(1);
        })]
    };
    
    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64
    } else {
        args.seed
    };
    
    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed");
        std::process::exit(1);
    }
    
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;
    
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        
        let runner = ScenarioRunner::new(seed)
            .with_regions(args.regions)
            .with_population(args.population)
            .with_parties(args.parties);
        
        for scenario in &scenarios {
            let result = runner.run(*scenario);
            
            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED - {} votes, {} batches, {} recovered",
                        scenario.name(),
                        seed,
                        result.metrics.votes_generated,
                        result.metrics.pipeline.batches_delivered,
                        result.metrics.pipeline.batches_recovered
                    );
                } else {
                    error!("✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            
            if !result.passed {
                failed_count += 1;
            }
            
            all_results.push(result);
        }
    }
    
    if let (Some(path), Some(result)) = (&args.export, all_results.first()) {
        match SimExport::from_result(result).write_to_file(path) {
            Ok(()) => info!("Exported {} to {}", result.scenario.name(), path.display()),
            Err(e) => {
                error!("Failed to write export: {}", e);
                std::process::exit(1);
            }
        }
    }
    
    // Summary
    let total = all_results.len();
    let passed = total - failed_count;
    
    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: failed to encode results: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            
            for result in &all_results {
                if !result.passed {
                    error!("  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }
    
    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
