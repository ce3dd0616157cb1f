//! Simulation orchestrator - drives the population, bias and distribution
//! engines over every region of a run.
//!
//! # Random streams
//!
//! ```text
//! ctx.derive_rng(0)      population allocation
//! ctx.derive_rng(1)      run-level bias vector
//! ctx.derive_rng(2 + i)  region i (local influence, shares, noise)
//! ```
//!
//! Regions never share generator state, so they can be processed in any order
//! without changing each other's draws.

use crate::bias::{BiasModel, BiasVector};
use crate::distribution::{RegionResult, VoteDistributor};
use crate::error::SimulationError;
use crate::population::PopulationAllocator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tallyflow_env::ElectionContext;
use tracing::{debug, info};

/// Turnout applied when a run does not specify one.
pub const DEFAULT_TURNOUT: f64 = 0.7;

const ALLOCATION_STREAM: u64 = 0;
const BIAS_STREAM: u64 = 1;
const REGION_STREAM_BASE: u64 = 2;

/// Parameters of one simulated election. Immutable once started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub total_electorate: u64,
    pub regions: Vec<String>,
    pub parties: Vec<String>,
    pub turnout: f64,
}

impl SimulationRun {
    /// Creates a run with `region_count` regions named `Region 1..=N`.
    pub fn new(total_electorate: u64, region_count: usize, parties: Vec<String>) -> Self {
        Self {
            total_electorate,
            regions: (1..=region_count).map(|i| format!("Region {}", i)).collect(),
            parties,
            turnout: DEFAULT_TURNOUT,
        }
    }
    
    /// Replaces the generated region names.
    pub fn with_region_names(mut self, names: Vec<String>) -> Self {
        self.regions = names;
        self
    }
    
    pub fn with_turnout(mut self, turnout: f64) -> Self {
        self.turnout = turnout;
        self
    }
    
    /// Checks the run can start.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.regions.is_empty() {
            return Err(SimulationError::NoRegions);
        }
        if self.parties.is_empty() {
            return Err(SimulationError::NoParties);
        }
        let mut seen = HashSet::with_capacity(self.parties.len());
        if let Some(duplicate) = self.parties.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(SimulationError::DuplicateParty(duplicate.clone()));
        }
        if !(0.0..=1.0).contains(&self.turnout) {
            return Err(SimulationError::InvalidTurnout(self.turnout));
        }
        if self.total_electorate < self.regions.len() as u64 {
            return Err(SimulationError::InsufficientPopulation {
                population: self.total_electorate,
                regions: self.regions.len(),
            });
        }
        Ok(())
    }
}

/// Run-wide draws made before any region is processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionPlan {
    /// Population per region, in the run's region order
    pub populations: Vec<u64>,
    pub bias: BiasVector,
}

/// Drives the vote-generation engines for a run.
#[derive(Debug, Clone)]
pub struct SimulationOrchestrator {
    run: SimulationRun,
    allocator: PopulationAllocator,
    bias_model: BiasModel,
    distributor: VoteDistributor,
}

impl SimulationOrchestrator {
    pub fn new(run: SimulationRun) -> Self {
        Self {
            run,
            allocator: PopulationAllocator::new(),
            bias_model: BiasModel::default(),
            distributor: VoteDistributor::default(),
        }
    }
    
    pub fn with_bias_model(mut self, bias_model: BiasModel) -> Self {
        self.bias_model = bias_model;
        self
    }
    
    pub fn with_distributor(mut self, distributor: VoteDistributor) -> Self {
        self.distributor = distributor;
        self
    }
    
    pub fn run(&self) -> &SimulationRun {
        &self.run
    }
    
    /// Allocates populations and draws the bias vector.
    pub fn plan<Ctx: ElectionContext>(&self, ctx: &Ctx) -> Result<ElectionPlan, SimulationError> {
        self.run.validate()?;
        
        let populations = self.allocator.allocate(
            self.run.total_electorate,
            self.run.regions.len(),
            &mut ctx.derive_rng(ALLOCATION_STREAM),
        )?;
        let bias = self
            .bias_model
            .draw(self.run.parties.len(), &mut ctx.derive_rng(BIAS_STREAM));
        
        info!(
            seed = ctx.seed(),
            regions = populations.len(),
            parties = self.run.parties.len(),
            electorate = self.run.total_electorate,
            effects = ?bias.effects(),
            "election planned"
        );
        
        Ok(ElectionPlan { populations, bias })
    }
    
    /// Processes one region of a plan.
    pub fn simulate_region<Ctx: ElectionContext>(
        &self,
        ctx: &Ctx,
        plan: &ElectionPlan,
        index: usize,
    ) -> Option<RegionResult> {
        let population = *plan.populations.get(index)?;
        let name = self.run.regions.get(index)?;
        let mut rng = ctx.derive_rng(REGION_STREAM_BASE + index as u64);
        
        let region = self
            .distributor
            .draw_region(name.clone(), population, self.run.parties.len(), &mut rng);
        let result = self.distributor.distribute(
            &region,
            &plan.bias,
            &self.run.parties,
            self.run.turnout,
            &mut rng,
        );
        
        debug!(
            region = %result.name,
            population = result.population,
            effective = result.effective_population,
            winner = ?result.winner,
            "region simulated"
        );
        Some(result)
    }
    
    /// Yields one result per region, in run order.
    pub fn results<'a, Ctx: ElectionContext>(
        &'a self,
        ctx: &'a Ctx,
    ) -> Result<RegionResults<'a, Ctx>, SimulationError> {
        let plan = self.plan(ctx)?;
        Ok(RegionResults {
            orchestrator: self,
            ctx,
            plan,
            next: 0,
        })
    }
    
    /// Processes every region and collects the results.
    pub fn run_all<Ctx: ElectionContext>(&self, ctx: &Ctx) -> Result<Vec<RegionResult>, SimulationError> {
        Ok(self.results(ctx)?.collect())
    }
}

/// Iterator over the region results of a run.
pub struct RegionResults<'a, Ctx: ElectionContext> {
    orchestrator: &'a SimulationOrchestrator,
    ctx: &'a Ctx,
    plan: ElectionPlan,
    next: usize,
}

impl<'a, Ctx: ElectionContext> RegionResults<'a, Ctx> {
    pub fn plan(&self) -> &ElectionPlan {
        &self.plan
    }
}

impl<'a, Ctx: ElectionContext> Iterator for RegionResults<'a, Ctx> {
    type Item = RegionResult;
    
    fn next(&mut self) -> Option<Self::Item> {
        let result = self
            .orchestrator
            .simulate_region(self.ctx, &self.plan, self.next)?;
        self.next += 1;
        Some(result)
    }
    
    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.populations.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallyflow_env::TokioContext;
    
    fn parties() -> Vec<String> {
        vec!["PX".into(), "PY".into(), "PZ".into()]
    }
    
    #[test]
    fn test_run_defaults() {
        let run = SimulationRun::new(10_000, 3, parties());
        assert_eq!(run.regions, vec!["Region 1", "Region 2", "Region 3"]);
        assert_eq!(run.turnout, DEFAULT_TURNOUT);
        assert!(run.validate().is_ok());
    }
    
    #[test]
    fn test_run_validation() {
        assert_eq!(
            SimulationRun::new(2, 5, parties()).validate(),
            Err(SimulationError::InsufficientPopulation { population: 2, regions: 5 })
        );
        assert_eq!(SimulationRun::new(10, 0, parties()).validate(), Err(SimulationError::NoRegions));
        assert_eq!(SimulationRun::new(10, 2, vec![]).validate(), Err(SimulationError::NoParties));
        assert_eq!(
            SimulationRun::new(10, 2, parties()).with_turnout(1.5).validate(),
            Err(SimulationError::InvalidTurnout(1.5))
        );
    }
    
    #[test]
    fn test_full_run_conserves_electorate() {
        let ctx = TokioContext::new();
        let run = SimulationRun::new(10_000, 5, parties());
        let orchestrator = SimulationOrchestrator::new(run);
        let results = orchestrator.run_all(&ctx).unwrap();
        
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().map(|r| r.population).sum::<u64>(), 10_000);
        for result in &results {
            assert_eq!(result.total_votes(), result.effective_population);
            assert!(result.effective_population <= result.population);
        }
    }
    
    #[test]
    fn test_duplicate_party_stops_run() {
        let run = SimulationRun::new(10_000, 2, vec!["A".into(), "A".into(), "B".into()]);
        assert_eq!(run.validate(), Err(SimulationError::DuplicateParty("A".into())));
        
        let ctx = TokioContext::new();
        assert_eq!(
            SimulationOrchestrator::new(run).run_all(&ctx),
            Err(SimulationError::DuplicateParty("A".into()))
        );
    }
    
    #[test]
    fn test_insufficient_population_stops_run() {
        let ctx = TokioContext::new();
        let orchestrator = SimulationOrchestrator::new(SimulationRun::new(3, 5, parties()));
        assert!(orchestrator.results(&ctx).is_err());
    }
}
