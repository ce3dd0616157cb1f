//! Scenario runner - executes fault-injection scenarios end to end.
//!
//! Every scenario generates a seeded election, pushes it through a real
//! `IngestionPipeline` and `AggregationClient` wired to the simulated sink
//! and aggregator, and asks the Oracle whether every vote ended up exactly
//! where it should.

use crate::oracle::Reconciliation;
use crate::scenarios::ScenarioId;
use crate::seeds::Subsystem;
use crate::sink::SimSink;
use crate::world::{SimConfig, SimWorld};
use crate::context::SimContext;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tallyflow_core::{
    Decision, IngestionPipeline, PipelineError, RegionResult, SledRegistry, StatsSnapshot,
    VoteEmitter,
};
use tallyflow_env::{AggregationSubmission, ElectionContext, FaultController};
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    #[serde(serialize_with = "serialize_scenario")]
    pub scenario: ScenarioId,
    
    /// Seed used
    pub seed: u64,
    
    /// Whether scenario passed all assertions
    pub passed: bool,
    
    /// Failure message if any
    pub failure_reason: Option<String>,
    
    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
    
    /// Generated region results
    #[serde(skip)]
    pub regions: Vec<RegionResult>,
    
    /// Snapshots the aggregator accepted, in arrival order
    #[serde(skip)]
    pub snapshots: Vec<AggregationSubmission>,
    
    /// Last early-decision evaluation
    pub decision: Option<Decision>,
}

fn serialize_scenario<S: serde::Serializer>(scenario: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(scenario.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Regions generated
    pub regions: usize,
    
    /// Votes produced by the model
    pub votes_generated: u64,
    
    /// Pipeline counters at the end of the run
    pub pipeline: StatsSnapshot,
    
    /// Send attempts seen by the sink, failed ones included
    pub sink_sends: u64,
    
    /// Reconnects after outages
    pub sink_reconnects: u64,
    
    /// Parts the aggregator accepted
    pub aggregation_parts: usize,
    
    /// First part at which the outcome was decided
    pub decided_at_part: Option<u64>,
    
    /// Virtual time consumed (retry delays, cache expiry)
    pub virtual_time_secs: f64,
}

/// What a scenario body hands back on success.
#[derive(Default)]
struct Outcome {
    regions: Vec<RegionResult>,
    stats: StatsSnapshot,
    decision: Option<Decision>,
    decided_at_part: Option<u64>,
}

type Check = Result<(), String>;

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

fn ensure_exact(rec: &Reconciliation, when: &str) -> Check {
    ensure(rec.is_exact(), || format!("{}: votes lost or duplicated {:?}", when, rec.mismatches()))
}

fn ensure_delivered(rec: &Reconciliation, when: &str) -> Check {
    ensure_exact(rec, when)?;
    ensure(rec.is_fully_delivered(), || format!("{}: retry log not drained {:?}", when, rec.pending))
}

/// Runs scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            config: SimConfig {
                seed,
                ..SimConfig::default()
            },
        }
    }
    
    /// Sets the region count.
    pub fn with_regions(mut self, regions: usize) -> Self {
        self.config.regions = regions;
        self
    }
    
    /// Sets the total electorate.
    pub fn with_population(mut self, population: u64) -> Self {
        self.config.population = population;
        self
    }
    
    /// Sets the party count.
    pub fn with_parties(mut self, parties: usize) -> Self {
        self.config.parties = parties;
        self
    }
    
    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }
    
    pub fn seed(&self) -> u64 {
        self.config.seed
    }
    
    /// Runs a scenario on a private runtime and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build();
        
        match runtime {
            Ok(runtime) => runtime.block_on(self.run_async(scenario)),
            Err(e) => self.failed(scenario, format!("failed to start runtime: {}", e)),
        }
    }
    
    /// Runs a scenario on the caller's runtime.
    pub async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        
        let mut world = match SimWorld::new(self.config.clone()) {
            Ok(world) => world,
            Err(e) => return self.failed(scenario, format!("failed to build world: {}", e)),
        };
        
        let outcome = match scenario {
            ScenarioId::Baseline => self.run_baseline(&mut world).await,
            ScenarioId::FlakySink => self.run_flaky_sink(&mut world).await,
            ScenarioId::SinkOutage => self.run_sink_outage(&mut world).await,
            ScenarioId::DuplicateStorm => self.run_duplicate_storm(&mut world).await,
            ScenarioId::RestartRecovery => self.run_restart_recovery(&mut world).await,
            ScenarioId::EarlyCall => self.run_early_call(&mut world).await,
        };
        
        let (passed, failure_reason, outcome) = match outcome {
            Ok(outcome) => (true, None, outcome),
            Err(reason) => {
                warn!("Scenario {} failed: {}", scenario.name(), reason);
                (false, Some(reason), Outcome::default())
            }
        };
        
        let snapshots = world.aggregator.history();
        let metrics = ScenarioMetrics {
            regions: outcome.regions.len(),
            votes_generated: world.oracle.expected_votes(),
            pipeline: outcome.stats,
            sink_sends: world.sink.sends(),
            sink_reconnects: world.sink.reconnects(),
            aggregation_parts: snapshots.len(),
            decided_at_part: outcome.decided_at_part,
            virtual_time_secs: world.time(),
        };
        
        ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed,
            failure_reason,
            metrics,
            regions: outcome.regions,
            snapshots,
            decision: outcome.decision,
        }
    }
    
    fn failed(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed: false,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            regions: Vec::new(),
            snapshots: Vec::new(),
            decision: None,
        }
    }
    
    /// Generates the election and checks the model's own invariants.
    fn generate(&self, world: &mut SimWorld) -> Result<Vec<RegionResult>, String> {
        let results = world.generate().map_err(|e| e.to_string())?;
        world.oracle.check_model(&results)?;
        Ok(results)
    }
    
    /// Emits every region, submitting each to the aggregator after its votes.
    async fn emit_and_aggregate(
        &self,
        world: &SimWorld,
        pipeline: &IngestionPipeline<SimContext, SimSink>,
        results: &[RegionResult],
    ) -> Result<Option<Decision>, String> {
        let emitter = VoteEmitter::new(pipeline);
        let mut client = world.aggregation_client();
        
        for (index, result) in results.iter().enumerate() {
            emitter.emit_region(index, result).await.map_err(|e| e.to_string())?;
            client.submit_region(result).await.map_err(|e| e.to_string())?;
        }
        Ok(Some(client.decision()))
    }
    
    /// DST-001: Baseline - healthy sink.
    ///
    /// **Assertion**: every vote delivered exactly once, the final aggregated
    /// snapshot covers the whole electorate.
    async fn run_baseline(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        info!("DST-001: Baseline");
        let results = self.generate(world)?;
        
        let pipeline = world.pipeline();
        pipeline.start();
        let decision = self.emit_and_aggregate(world, &pipeline, &results).await?;
        pipeline.shutdown().await.map_err(|e| e.to_string())?;
        
        let rec = world.reconcile(&pipeline).await.map_err(|e| e.to_string())?;
        ensure_delivered(&rec, "after shutdown")?;
        
        let last = world
            .aggregator
            .snapshot(0)
            .ok_or_else(|| "aggregator holds no snapshot for serial 0".to_string())?;
        ensure(last.total_population == world.config.population, || {
            format!("final part covers {} of {} voters", last.total_population, world.config.population)
        })?;
        ensure(last.total_votes == world.oracle.expected_votes(), || {
            format!("final part carries {} votes, expected {}", last.total_votes, world.oracle.expected_votes())
        })?;
        ensure(!last.active, || "final part still marked active".to_string())?;
        
        Ok(Outcome {
            regions: results,
            stats: pipeline.stats().snapshot(),
            decision,
            decided_at_part: None,
        })
    }
    
    /// DST-002: FlakySink - random delivery failures.
    ///
    /// **Assertion**: before recovery, sink + retry log hold every vote exactly
    /// once; after healing and one sweep, the log is empty.
    async fn run_flaky_sink(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        info!("DST-002: FlakySink - 30% delivery failures");
        let results = self.generate(world)?;
        world.sink_controller.set_failure_rate(0.3);
        
        let pipeline = world.pipeline();
        let decision = self.emit_and_aggregate(world, &pipeline, &results).await?;
        pipeline.shutdown().await.map_err(|e| e.to_string())?;
        
        let rec = world.reconcile(&pipeline).await.map_err(|e| e.to_string())?;
        ensure_exact(&rec, "while flaky")?;
        
        // Sweeps under failure keep whatever still fails
        for _ in 0..3 {
            pipeline.sweep_now().await.map_err(|e| e.to_string())?;
            ensure_exact(&world.reconcile(&pipeline).await.map_err(|e| e.to_string())?, "mid-sweep")?;
        }
        
        world.sink_controller.heal_all();
        pipeline.sweep_now().await.map_err(|e| e.to_string())?;
        let rec = world.reconcile(&pipeline).await.map_err(|e| e.to_string())?;
        ensure_delivered(&rec, "after healing")?;
        
        Ok(Outcome {
            regions: results,
            stats: pipeline.stats().snapshot(),
            decision,
            decided_at_part: None,
        })
    }
    
    /// DST-003: SinkOutage - broker down for the first half of the run.
    ///
    /// **Assertion**: batches built during the outage are persisted, the sink
    /// reconnects afterwards and one sweep drains the log.
    async fn run_sink_outage(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        info!("DST-003: SinkOutage");
        let results = self.generate(world)?;
        let split = (results.len() + 1) / 2;
        
        let pipeline = world.pipeline();
        let emitter = VoteEmitter::new(&pipeline);
        let mut client = world.aggregation_client();
        
        world.sink_controller.set_outage(true);
        for (index, result) in results.iter().enumerate() {
            if index == split {
                // Buffered votes from the outage go out with the failing sink
                pipeline.flush().await.map_err(|e| e.to_string())?;
                world.sink_controller.set_outage(false);
                debug!("Outage over after {} regions", split);
            }
            emitter.emit_region(index, result).await.map_err(|e| e.to_string())?;
            client.submit_region(result).await.map_err(|e| e.to_string())?;
        }
        world.sink_controller.set_outage(false);
        pipeline.shutdown().await.map_err(|e| e.to_string())?;
        
        let persisted = pipeline.stats().batches_persisted.load(Ordering::Relaxed);
        ensure(persisted > 0, || "outage persisted no batches".to_string())?;
        ensure_exact(&world.reconcile(&pipeline).await.map_err(|e| e.to_string())?, "before sweep")?;
        
        let report = pipeline.sweep_now().await.map_err(|e| e.to_string())?;
        ensure(report.delivered as u64 == persisted, || {
            format!("sweep delivered {} of {} persisted batches", report.delivered, persisted)
        })?;
        ensure_delivered(&world.reconcile(&pipeline).await.map_err(|e| e.to_string())?, "after sweep")?;
        ensure(world.sink.reconnects() >= 1, || "sink never reconnected".to_string())?;
        
        Ok(Outcome {
            regions: results,
            stats: pipeline.stats().snapshot(),
            decision: Some(client.decision()),
            decided_at_part: None,
        })
    }
    
    /// DST-004: DuplicateStorm - concurrent replays.
    ///
    /// **Assertion**: every replayed vote is rejected as a duplicate, unknown
    /// candidates are rejected without touching the registry, and the sink
    /// still holds every original vote exactly once.
    async fn run_duplicate_storm(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        const REPLAYERS: u64 = 4;
        const GHOSTS: u64 = 10;
        info!("DST-004: DuplicateStorm - {} concurrent replayers", REPLAYERS);
        
        let results = Arc::new(self.generate(world)?);
        let pipeline = Arc::new(world.pipeline());
        
        // Replayers race the original emission, each walking the regions in its own order
        let orders = replay_orders(
            world.seeds.seed_for(Subsystem::Choreography),
            REPLAYERS as usize + 1,
            results.len(),
        );
        let mut tasks = Vec::new();
        for order in orders {
            let pipeline = Arc::clone(&pipeline);
            let results = Arc::clone(&results);
            tasks.push(tokio::spawn(async move {
                let emitter = VoteEmitter::new(pipeline.as_ref());
                let mut accepted = 0;
                let mut duplicates = 0;
                for index in order {
                    let report = emitter.emit_region(index, &results[index]).await?;
                    accepted += report.accepted;
                    duplicates += report.rejected_duplicate;
                }
                Ok::<_, PipelineError>((accepted, duplicates))
            }));
        }
        
        let mut accepted = 0;
        let mut duplicates = 0;
        for task in tasks {
            let (task_accepted, task_duplicates) = task
                .await
                .map_err(|e| format!("replayer panicked: {}", e))?
                .map_err(|e| e.to_string())?;
            accepted += task_accepted;
            duplicates += task_duplicates;
        }
        
        for ghost in 0..GHOSTS {
            pipeline
                .submit_vote(&format!("ghost-{}", ghost), "P0")
                .await
                .map_err(|e| e.to_string())?;
        }
        pipeline.shutdown().await.map_err(|e| e.to_string())?;
        
        let expected = world.oracle.expected_votes();
        ensure(accepted == expected, || format!("{} votes accepted, expected {}", accepted, expected))?;
        ensure(duplicates == expected * REPLAYERS, || {
            format!("{} duplicates rejected, expected {}", duplicates, expected * REPLAYERS)
        })?;
        let stats = pipeline.stats().snapshot();
        ensure(stats.rejected_invalid == GHOSTS, || {
            format!("{} invalid candidates rejected, expected {}", stats.rejected_invalid, GHOSTS)
        })?;
        ensure(pipeline.guard().admitted() as u64 == expected, || {
            "unknown candidates reached the registry".to_string()
        })?;
        ensure_delivered(&world.reconcile(&pipeline).await.map_err(|e| e.to_string())?, "after storm")?;
        
        let regions = Arc::try_unwrap(results).unwrap_or_else(|shared| shared.as_ref().clone());
        Ok(Outcome {
            regions,
            stats,
            decision: None,
            decided_at_part: None,
        })
    }
    
    /// DST-005: RestartRecovery - the pipeline dies mid-run.
    ///
    /// **Assertion**: a fresh pipeline over the same retry log and registry
    /// rejects replays of pre-restart voters and its first sweep delivers the
    /// batches the old process left behind.
    async fn run_restart_recovery(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        info!("DST-005: RestartRecovery");
        let results = self.generate(world)?;
        let split = (results.len() + 1) / 2;
        
        let registry = SledRegistry::open(world.scratch_path().join("voters"))
            .map_err(|e| e.to_string())?
            .without_sync();
        
        // First process: broker down the whole time
        world.sink_controller.set_outage(true);
        let before_restart = {
            let pipeline = world.pipeline_with_registry(Box::new(registry.clone()));
            let emitter = VoteEmitter::new(&pipeline);
            for (index, result) in results.iter().enumerate().take(split) {
                emitter.emit_region(index, result).await.map_err(|e| e.to_string())?;
            }
            pipeline.shutdown().await.map_err(|e| e.to_string())?;
            pipeline.stats().snapshot()
        };
        ensure(world.sink.delivered().is_empty(), || "sink accepted batches while down".to_string())?;
        
        // Second process: broker back
        world.sink_controller.set_outage(false);
        let pipeline = world.pipeline_with_registry(Box::new(registry));
        let left_behind = pipeline.pending().await.map_err(|e| e.to_string())?.len();
        ensure(left_behind as u64 == before_restart.batches_persisted, || {
            format!("{} batches in the log, {} persisted", left_behind, before_restart.batches_persisted)
        })?;
        
        let emitter = VoteEmitter::new(&pipeline);
        let mut replayed = 0;
        for (index, result) in results.iter().enumerate() {
            let report = emitter.emit_region(index, result).await.map_err(|e| e.to_string())?;
            if index < split {
                replayed += report.rejected_duplicate;
                ensure(report.accepted == 0, || format!("region {} re-admitted after restart", index))?;
            }
        }
        let report = pipeline.sweep_now().await.map_err(|e| e.to_string())?;
        pipeline.shutdown().await.map_err(|e| e.to_string())?;
        
        let expected_replays: u64 = results.iter().take(split).map(RegionResult::total_votes).sum();
        ensure(replayed == expected_replays, || {
            format!("{} replays rejected, expected {}", replayed, expected_replays)
        })?;
        ensure(report.delivered == left_behind, || {
            format!("first sweep delivered {} of {} batches", report.delivered, left_behind)
        })?;
        ensure_delivered(&world.reconcile(&pipeline).await.map_err(|e| e.to_string())?, "after restart")?;
        
        Ok(Outcome {
            regions: results,
            stats: pipeline.stats().snapshot(),
            decision: None,
            decided_at_part: None,
        })
    }
    
    /// DST-006: EarlyCall - cumulative parts and the worst-case call.
    ///
    /// **Assertion**: the aggregator ends with one snapshot covering the whole
    /// electorate, every "decided" evaluation had a margin strictly above the
    /// remaining voters, and the early winner is the final winner.
    async fn run_early_call(&self, world: &mut SimWorld) -> Result<Outcome, String> {
        info!("DST-006: EarlyCall");
        let results = self.generate(world)?;
        let mut client = world.aggregation_client();
        let view = world.standings();
        let ttl = world.aggregation_config().standings_ttl;
        
        let mut early: Option<(u64, String)> = None;
        let mut last = None;
        for (index, result) in results.iter().enumerate() {
            if index == 1 {
                // Two failures stay inside the three-attempt budget
                world.aggregator.fail_next(2);
            }
            client.submit_region(result).await.map_err(|e| e.to_string())?;
            
            // Let the cached standings expire
            world.context.advance_time(ttl);
            let decision = view
                .decision()
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "aggregator has no standings".to_string())?;
            
            if let Decision::Decided { margin, remaining, .. } = &decision {
                ensure(margin > remaining, || format!("decided with margin {} <= remaining {}", margin, remaining))?;
            }
            if let (None, Some(winner)) = (&early, decision.winner()) {
                debug!("Outcome decided at part {}: {}", index, winner);
                early = Some((index as u64, winner.to_string()));
            }
            last = Some(decision);
        }
        
        ensure(client.serial() == Some(0), || format!("unexpected serial {:?}", client.serial()))?;
        let retry_time = world.aggregation_config().retry_delay * 2;
        ensure(world.context.now() >= retry_time, || "aggregation retries never slept".to_string())?;
        
        let final_snapshot = view
            .standings()
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "aggregator has no standings".to_string())?;
        ensure(final_snapshot.election_part == results.len() as u64 - 1, || {
            format!("final part {} for {} regions", final_snapshot.election_part, results.len())
        })?;
        ensure(final_snapshot.votes_by_party == *world.oracle.expected(), || {
            "final standings differ from the generated votes".to_string()
        })?;
        
        if let (Some((_, early_winner)), Some(Decision::Decided { winner, .. })) = (&early, &last) {
            ensure(early_winner == winner, || {
                format!("called {} early, {} won", early_winner, winner)
            })?;
        }
        
        Ok(Outcome {
            regions: results,
            stats: Default::default(),
            decided_at_part: early.map(|(part, _)| part),
            decision: last,
        })
    }
}

/// Region visiting order for each duplicate-storm emitter. The first emitter
/// walks the regions in order; every replayer gets a seeded shuffle.
fn replay_orders(seed: u64, emitters: usize, regions: usize) -> Vec<Vec<usize>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..emitters)
        .map(|emitter| {
            let mut order: Vec<usize> = (0..regions).collect();
            if emitter > 0 {
                order.shuffle(&mut rng);
            }
            order
        })
        .collect()
}
