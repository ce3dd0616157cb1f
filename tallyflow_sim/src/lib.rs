//! TallyFlow Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled environment where the whole election
//! pipeline (vote generation, dedup, batching, retry log, aggregation) runs
//! reproducibly from a single seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: virtual clock, advanced by retry sleeps and by the harness
//! - **Transport**: in-memory broker and aggregator with fault injection
//! - **Randomness**: every stream derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           SimWorld                           │
//! │                                                              │
//! │  SimulationOrchestrator ──► VoteEmitter ──► IngestionPipeline│
//! │          │                                   │         │     │
//! │          │                            SimSink ◄─┘  RetryStore│
//! │          ▼                              (faults)             │
//! │  AggregationClient ──► SimAggregator                         │
//! │                                                              │
//! │  Oracle: expected totals vs. sink + retry log                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tallyflow_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_regions(8).run(ScenarioId::SinkOutage);
//! assert!(result.passed);
//! ```

mod context;
mod world;
mod oracle;
mod sink;
mod aggregator;
mod seeds;
mod runner;
mod exporter;
pub mod scenarios;

pub use context::SimContext;
pub use world::{party_ids, SimConfig, SimWorld};
pub use oracle::{Oracle, Reconciliation};
pub use sink::{SimSink, SimSinkController};
pub use aggregator::SimAggregator;
pub use seeds::{SeedProvider, Subsystem};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use exporter::SimExport;
