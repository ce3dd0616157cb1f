//! SimWorld - The simulation harness container.

use crate::aggregator::SimAggregator;
use crate::context::SimContext;
use crate::oracle::{Oracle, Reconciliation};
use crate::seeds::{SeedProvider, Subsystem};
use crate::sink::{SimSink, SimSinkController};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tallyflow_core::{
    AggregationClient, AggregationConfig, CandidateRoster, DedupGuard, IngestionPipeline,
    PipelineConfig, PipelineError, RegionResult, SimulationError, SimulationOrchestrator,
    SimulationRun, StandingsView, VoterRegistry, DEFAULT_TURNOUT,
};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,
    
    /// Number of regions
    pub regions: usize,
    
    /// Total electorate
    pub population: u64,
    
    /// Number of parties (named `P1`, `P2`, ...)
    pub parties: usize,
    
    /// Turnout rate before the per-region shock
    pub turnout: f64,
    
    /// Events per batch
    pub batch_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            regions: 5,
            population: 10_000,
            parties: 3,
            turnout: DEFAULT_TURNOUT,
            batch_size: 50,
        }
    }
}

/// Party identifiers used by simulated runs.
pub fn party_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("P{}", i)).collect()
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,
    
    /// Shared simulation context (virtual clock, seeded streams)
    pub context: Arc<SimContext>,
    
    /// Per-subsystem seeds
    pub seeds: SeedProvider,
    
    /// Simulated broker
    pub sink: Arc<SimSink>,
    
    /// Fault injection for the broker
    pub sink_controller: Arc<SimSinkController>,
    
    /// Simulated aggregator
    pub aggregator: Arc<SimAggregator>,
    
    /// Ground truth
    pub oracle: Oracle,
    
    /// Holds the retry log and any durable registry for this world
    scratch: tempfile::TempDir,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> std::io::Result<Self> {
        let seeds = SeedProvider::new(config.seed);
        let context = SimContext::shared(seeds.seed_for(Subsystem::Election));
        let sink_controller = Arc::new(SimSinkController::new(seeds.seed_for(Subsystem::SinkFaults)));
        let sink = Arc::new(SimSink::new(Arc::clone(&sink_controller)));
        let oracle = Oracle::new(config.population);
        
        Ok(Self {
            config,
            context,
            seeds,
            sink,
            sink_controller,
            aggregator: Arc::new(SimAggregator::new()),
            oracle,
            scratch: tempfile::Builder::new().prefix("tallyflow-sim").tempdir()?,
        })
    }
    
    /// The run this world simulates.
    pub fn run(&self) -> SimulationRun {
        SimulationRun::new(self.config.population, self.config.regions, party_ids(self.config.parties))
            .with_turnout(self.config.turnout)
    }
    
    /// Generates every region and records it with the oracle.
    pub fn generate(&mut self) -> Result<Vec<RegionResult>, SimulationError> {
        let orchestrator = SimulationOrchestrator::new(self.run());
        let results = orchestrator.run_all(self.context.as_ref())?;
        for result in &results {
            self.oracle.record_region(result);
        }
        Ok(results)
    }
    
    /// Scratch directory owned by this world.
    pub fn scratch_path(&self) -> PathBuf {
        self.scratch.path().to_path_buf()
    }
    
    pub fn retry_log_path(&self) -> PathBuf {
        self.scratch.path().join("pending_batches.json")
    }
    
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_batch_size: self.config.batch_size,
            send_timeout: Duration::from_secs(1),
            retry_log_path: self.retry_log_path(),
            ..PipelineConfig::default()
        }
    }
    
    /// A pipeline over this world's sink with an in-memory registry.
    ///
    /// Every pipeline of a world shares the same retry log, so building a
    /// second one models a process restart.
    pub fn pipeline(&self) -> IngestionPipeline<SimContext, SimSink> {
        self.pipeline_with_guard(DedupGuard::new(self.roster()))
    }
    
    /// Same as [`pipeline`](Self::pipeline) with a caller-chosen registry.
    pub fn pipeline_with_registry(&self, registry: Box<dyn VoterRegistry>) -> IngestionPipeline<SimContext, SimSink> {
        self.pipeline_with_guard(DedupGuard::with_registry(self.roster(), registry))
    }
    
    fn pipeline_with_guard(&self, guard: DedupGuard) -> IngestionPipeline<SimContext, SimSink> {
        IngestionPipeline::new(
            Arc::clone(&self.context),
            self.pipeline_config(),
            guard,
            Arc::clone(&self.sink),
        )
    }
    
    pub fn roster(&self) -> CandidateRoster {
        CandidateRoster::from_ids(party_ids(self.config.parties))
    }
    
    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig::default()
    }
    
    pub fn aggregation_client(&self) -> AggregationClient<SimContext, SimAggregator> {
        AggregationClient::new(
            Arc::clone(&self.context),
            Arc::clone(&self.aggregator),
            self.aggregation_config(),
            self.config.population,
        )
    }
    
    pub fn standings(&self) -> StandingsView<SimContext, SimAggregator> {
        StandingsView::new(
            Arc::clone(&self.context),
            Arc::clone(&self.aggregator),
            self.aggregation_config().standings_ttl,
        )
    }
    
    /// Accounts the sink and the retry log against the oracle.
    pub async fn reconcile(&self, pipeline: &IngestionPipeline<SimContext, SimSink>) -> Result<Reconciliation, PipelineError> {
        let pending = pipeline.pending().await?;
        Ok(self.oracle.reconcile(&self.sink.delivered(), &pending))
    }
    
    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        use tallyflow_env::ElectionContext;
        self.context.now().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_sim_world_generates_the_whole_electorate() {
        let mut world = SimWorld::new(SimConfig::default()).unwrap();
        let results = world.generate().unwrap();
        
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().map(|r| r.population).sum::<u64>(), 10_000);
        world.oracle.check_model(&results).unwrap();
    }
    
    #[test]
    fn test_sim_world_determinism() {
        let config = SimConfig { seed: 1234, ..Default::default() };
        let a = SimWorld::new(config.clone()).unwrap().generate().unwrap();
        let b = SimWorld::new(config).unwrap().generate().unwrap();
        assert_eq!(a, b);
    }
    
    #[test]
    fn test_party_ids() {
        assert_eq!(party_ids(3), vec!["P1", "P2", "P3"]);
        assert_eq!(SimWorld::new(SimConfig::default()).unwrap().time(), 0.0);
    }
}
