//! TallyFlow Core - election simulation and fault-tolerant vote ingestion
//!
//! This library covers the two halves of the system:
//! 1. **Vote generation**: population allocation across regions, a run-level
//!    campaign bias and per-region vote distribution whose counts always sum
//!    to the region's effective population
//! 2. **Vote ingestion**: exactly-once admission per voter, micro-batching,
//!    a durable retry log and the partial-result aggregation protocol with
//!    its worst-case early-decision check
//!
//! Everything that touches time, randomness or the network goes through the
//! traits in `tallyflow_env`, so the same code runs under tokio and under the
//! deterministic simulator.

pub mod config;
pub mod error;
pub mod metrics;

pub mod population;
pub mod bias;
pub mod distribution;
pub mod orchestrator;

pub mod registry;
pub mod dedup;
pub mod retry_store;
pub mod batcher;
pub mod pipeline;
pub mod emitter;
pub mod aggregation;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use aggregation::{early_decision, AggregationClient, Decision, StandingsView};
pub use batcher::{BatcherConfig, FlushOutcome, MicroBatcher};
pub use bias::{BiasConfig, BiasModel, BiasVector, CampaignEffects};
pub use config::{AggregationConfig, PipelineConfig};
pub use dedup::{Admission, CandidateRoster, DedupGuard, RejectReason};
pub use distribution::{DistributionConfig, Region, RegionResult, VoteDistributor};
pub use emitter::{EmitReport, VoteEmitter};
pub use error::{AggregationError, PipelineError, SimulationError};
pub use metrics::{FlushReason, PipelineStats, StatsSnapshot};
pub use orchestrator::{ElectionPlan, RegionResults, SimulationOrchestrator, SimulationRun, DEFAULT_TURNOUT};
pub use pipeline::IngestionPipeline;
pub use population::{PopulationAllocator, TierPlan};
pub use registry::{MemoryRegistry, RegistryError, SledRegistry, VoterRegistry};
pub use retry_store::{PendingBatch, RetryStore, SweepReport, SweeperHandle};
