//! Ingestion pipeline - dedup guard, micro-batcher and retry store wired
//! together around one sink.

use crate::batcher::{BatcherConfig, FlushOutcome, MicroBatcher};
use crate::config::PipelineConfig;
use crate::dedup::{Admission, DedupGuard, RejectReason};
use crate::error::PipelineError;
use crate::metrics::PipelineStats;
use crate::retry_store::{PendingBatch, RetryStore, SweepReport, SweeperHandle};
use std::sync::{Arc, Mutex};
use tallyflow_env::{ElectionContext, VoteEvent, VoteSink};
use tracing::info;

/// The vote ingestion pipeline.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct IngestionPipeline<Ctx: ElectionContext, S: VoteSink + ?Sized> {
    ctx: Arc<Ctx>,
    config: PipelineConfig,
    guard: DedupGuard,
    sink: Arc<S>,
    batcher: Arc<MicroBatcher<S>>,
    retry: Arc<RetryStore>,
    stats: Arc<PipelineStats>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl<Ctx: ElectionContext, S: VoteSink + ?Sized> IngestionPipeline<Ctx, S> {
    pub fn new(ctx: Arc<Ctx>, config: PipelineConfig, guard: DedupGuard, sink: Arc<S>) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let retry = Arc::new(RetryStore::open(config.retry_log_path.clone(), Arc::clone(&stats)));
        let batcher = Arc::new(MicroBatcher::new(
            BatcherConfig::from(&config),
            Arc::clone(&sink),
            Arc::clone(&retry),
            Arc::clone(&stats),
        ));
        
        Self {
            ctx,
            config,
            guard,
            sink,
            batcher,
            retry,
            stats,
            sweeper: Mutex::new(None),
        }
    }
    
    /// Spawns the flush timer and the retry sweeper.
    ///
    /// Batches left in the retry log by a previous process are picked up by
    /// the first sweep.
    pub fn start(&self) {
        self.batcher.start_timer(self.ctx.as_ref());
        let handle = self.retry.spawn_sweeper(
            self.ctx.as_ref(),
            Arc::clone(&self.sink),
            self.config.sweep_interval,
            self.config.send_timeout,
        );
        
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = sweeper.replace(handle) {
            previous.stop();
        }
        info!(
            "Ingestion pipeline started (sink: {}, batch size: {}, retry log: {})",
            self.sink.name(),
            self.config.max_batch_size,
            self.config.retry_log_path.display()
        );
    }
    
    /// Admits a vote and, if accepted, buffers it for the next batch.
    ///
    /// # Errors
    /// Registry storage errors, or `PersistenceFailure` when a flush
    /// triggered by this vote could not be delivered nor persisted.
    pub async fn submit_vote(&self, voter_id: &str, candidate_id: &str) -> Result<Admission, PipelineError> {
        let admission = self.guard.admit(voter_id, candidate_id)?;
        match admission {
            Admission::Accepted => {
                PipelineStats::bump(&self.stats.votes_admitted);
                let event = VoteEvent::new(
                    voter_id,
                    self.config.event_type.as_str(),
                    candidate_id,
                    self.ctx.system_time(),
                );
                self.batcher.add(event).await?;
            }
            Admission::Rejected(RejectReason::DuplicateVote) => {
                PipelineStats::bump(&self.stats.rejected_duplicate);
            }
            Admission::Rejected(RejectReason::InvalidCandidate) => {
                PipelineStats::bump(&self.stats.rejected_invalid);
            }
        }
        Ok(admission)
    }
    
    /// Flushes the buffer now (timer semantics).
    pub async fn flush(&self) -> Result<FlushOutcome, PipelineError> {
        self.batcher.flush(crate::metrics::FlushReason::Timer).await
    }
    
    /// Runs one retry sweep immediately.
    pub async fn sweep_now(&self) -> Result<SweepReport, PipelineError> {
        self.retry.sweep(self.sink.as_ref(), self.config.send_timeout).await
    }
    
    /// Batches waiting in the retry log.
    pub async fn pending(&self) -> Result<Vec<PendingBatch>, PipelineError> {
        self.retry.pending().await
    }
    
    /// Stops the sweeper, cancels the flush timer and performs the final flush.
    ///
    /// Batches still in the retry log stay there for the next start.
    pub async fn shutdown(&self) -> Result<FlushOutcome, PipelineError> {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.stop();
        }
        let outcome = self.batcher.shutdown().await;
        let snap = self.stats.snapshot();
        info!(
            "Ingestion pipeline stopped: {} admitted, {} delivered in {} batches, {} persisted",
            snap.votes_admitted, snap.events_delivered, snap.batches_delivered, snap.batches_persisted
        );
        outcome
    }
    
    pub fn guard(&self) -> &DedupGuard {
        &self.guard
    }
    
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
    
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::CandidateRoster;
    use crate::testing::RecordingSink;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tallyflow_env::TokioContext;
    
    fn pipeline(
        dir: &tempfile::TempDir,
        sink: Arc<RecordingSink>,
    ) -> IngestionPipeline<TokioContext, RecordingSink> {
        let config = PipelineConfig {
            max_batch_size: 2,
            flush_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            retry_log_path: dir.path().join("pending.json"),
            ..PipelineConfig::default()
        };
        let guard = DedupGuard::new(CandidateRoster::from_ids(["PX", "PY"]));
        IngestionPipeline::new(TokioContext::shared(), config, guard, sink)
    }
    
    #[tokio::test]
    async fn test_submit_vote_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let pipeline = pipeline(&dir, Arc::clone(&sink));
        
        assert_eq!(pipeline.submit_vote("1", "PX").await.unwrap(), Admission::Accepted);
        assert_eq!(
            pipeline.submit_vote("1", "PY").await.unwrap(),
            Admission::Rejected(RejectReason::DuplicateVote)
        );
        assert_eq!(
            pipeline.submit_vote("2", "ZZ").await.unwrap(),
            Admission::Rejected(RejectReason::InvalidCandidate)
        );
        assert_eq!(pipeline.submit_vote("3", "PY").await.unwrap(), Admission::Accepted);
        
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].data_points[0].kind, "election");
        
        let snap = pipeline.stats().snapshot();
        assert_eq!(snap.votes_admitted, 2);
        assert_eq!(snap.rejected_duplicate, 1);
        assert_eq!(snap.rejected_invalid, 1);
    }
    
    #[tokio::test]
    async fn test_outage_then_recovery_delivers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let pipeline = pipeline(&dir, Arc::clone(&sink));
        pipeline.start();
        
        sink.set_down(true);
        for voter in 0..5 {
            pipeline.submit_vote(&voter.to_string(), "PX").await.unwrap();
        }
        pipeline.shutdown().await.unwrap();
        assert_eq!(pipeline.pending().await.unwrap().len(), 3);
        assert!(sink.batches().is_empty());
        
        sink.set_down(false);
        let report = pipeline.sweep_now().await.unwrap();
        assert_eq!(report.delivered, 3);
        
        let delivered: usize = sink.batches().iter().map(|b| b.len()).sum();
        assert_eq!(delivered, 5);
        assert_eq!(pipeline.stats().batches_recovered.load(Ordering::Relaxed), 3);
        assert!(pipeline.pending().await.unwrap().is_empty());
    }
}
