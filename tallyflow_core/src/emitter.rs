//! Vote emitter - replays region results as individual votes.
//!
//! Every vote in a `RegionResult` becomes one `submit_vote` call with a
//! synthetic voter id `"{region_index}-{seq}"`. Votes are fed from a single
//! async loop into the shared batcher.

use crate::dedup::{Admission, RejectReason};
use crate::distribution::RegionResult;
use crate::error::PipelineError;
use crate::pipeline::IngestionPipeline;
use serde::Serialize;
use tallyflow_env::{ElectionContext, VoteSink};
use tracing::debug;

/// Admission counts for emitted votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmitReport {
    pub accepted: u64,
    pub rejected_duplicate: u64,
    pub rejected_invalid: u64,
}

impl EmitReport {
    fn record(&mut self, admission: Admission) {
        match admission {
            Admission::Accepted => self.accepted += 1,
            Admission::Rejected(RejectReason::DuplicateVote) => self.rejected_duplicate += 1,
            Admission::Rejected(RejectReason::InvalidCandidate) => self.rejected_invalid += 1,
        }
    }
    
    fn merge(&mut self, other: EmitReport) {
        self.accepted += other.accepted;
        self.rejected_duplicate += other.rejected_duplicate;
        self.rejected_invalid += other.rejected_invalid;
    }
}

/// Synthetic voter id for the `seq`-th vote of region `region_index`.
pub fn voter_id(region_index: usize, seq: u64) -> String {
    format!("{}-{}", region_index, seq)
}

pub struct VoteEmitter<'a, Ctx: ElectionContext, S: VoteSink + ?Sized> {
    pipeline: &'a IngestionPipeline<Ctx, S>,
}

impl<'a, Ctx: ElectionContext, S: VoteSink + ?Sized> VoteEmitter<'a, Ctx, S> {
    pub fn new(pipeline: &'a IngestionPipeline<Ctx, S>) -> Self {
        Self { pipeline }
    }
    
    /// Emits every vote of one region, parties in name order.
    pub async fn emit_region(
        &self,
        region_index: usize,
        result: &RegionResult,
    ) -> Result<EmitReport, PipelineError> {
        let mut report = EmitReport::default();
        let mut seq = 0u64;
        
        for (party, &count) in &result.votes_by_party {
            for _ in 0..count {
                let admission = self
                    .pipeline
                    .submit_vote(&voter_id(region_index, seq), party)
                    .await?;
                report.record(admission);
                seq += 1;
            }
        }
        
        debug!(
            "Emitted {} votes for {} ({} accepted)",
            seq, result.name, report.accepted
        );
        Ok(report)
    }
    
    /// Emits all regions in order.
    pub async fn emit_all(&self, results: &[RegionResult]) -> Result<EmitReport, PipelineError> {
        let mut total = EmitReport::default();
        for (index, result) in results.iter().enumerate() {
            total.merge(self.emit_region(index, result).await?);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::dedup::{CandidateRoster, DedupGuard};
    use crate::testing::RecordingSink;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tallyflow_env::TokioContext;
    
    fn result(name: &str, pairs: &[(&str, u64)]) -> RegionResult {
        let votes: BTreeMap<String, u64> = pairs.iter().map(|(p, v)| (p.to_string(), *v)).collect();
        let total = votes.values().sum();
        RegionResult {
            name: name.to_string(),
            population: total,
            effective_population: total,
            votes_by_party: votes,
            winner: None,
            winner_percentage: 0.0,
        }
    }
    
    #[tokio::test]
    async fn test_emit_all_delivers_every_vote() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let config = PipelineConfig {
            max_batch_size: 4,
            retry_log_path: dir.path().join("pending.json"),
            ..PipelineConfig::default()
        };
        let guard = DedupGuard::new(CandidateRoster::from_ids(["PX", "PY"]));
        let pipeline = IngestionPipeline::new(TokioContext::shared(), config, guard, Arc::clone(&sink));
        
        let results = vec![result("North", &[("PX", 3), ("PY", 2)]), result("South", &[("PY", 4)])];
        let report = VoteEmitter::new(&pipeline).emit_all(&results).await.unwrap();
        pipeline.shutdown().await.unwrap();
        
        assert_eq!(report.accepted, 9);
        assert_eq!(report.rejected_duplicate, 0);
        
        let mut tally = BTreeMap::new();
        for batch in sink.batches() {
            for (party, n) in batch.tally() {
                *tally.entry(party).or_insert(0u64) += n;
            }
        }
        assert_eq!(tally.get("PX"), Some(&3));
        assert_eq!(tally.get("PY"), Some(&6));
    }
    
    #[tokio::test]
    async fn test_replaying_a_region_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            retry_log_path: dir.path().join("pending.json"),
            ..PipelineConfig::default()
        };
        let guard = DedupGuard::new(CandidateRoster::from_ids(["PX"]));
        let pipeline = IngestionPipeline::new(
            TokioContext::shared(),
            config,
            guard,
            Arc::new(RecordingSink::new()),
        );
        let emitter = VoteEmitter::new(&pipeline);
        let north = result("North", &[("PX", 5)]);
        
        emitter.emit_region(0, &north).await.unwrap();
        let replay = emitter.emit_region(0, &north).await.unwrap();
        assert_eq!(replay.accepted, 0);
        assert_eq!(replay.rejected_duplicate, 5);
        assert_eq!(voter_id(3, 17), "3-17");
    }
}
