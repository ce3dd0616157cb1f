//! JSON exporter for scenario runs.
//!
//! Writes the generated election, every aggregation part the aggregator
//! accepted, and the run metrics so a run can be inspected or diffed offline.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tallyflow_core::{Decision, RegionResult};
use tallyflow_env::AggregationSubmission;

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,
    
    /// Seed used
    pub seed: u64,
    
    /// Final result
    pub passed: bool,
    
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    
    /// Region results in generation order
    pub regions: Vec<RegionResult>,
    
    /// Accepted aggregation parts, in arrival order
    pub snapshots: Vec<AggregationSubmission>,
    
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    
    pub metrics: ScenarioMetrics,
}

impl SimExport {
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            regions: result.regions.clone(),
            snapshots: result.snapshots.clone(),
            decision: result.decision.clone(),
            metrics: result.metrics.clone(),
        }
    }
    
    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
