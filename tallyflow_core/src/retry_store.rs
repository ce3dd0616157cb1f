//! Retry store - durable side-log for batches that failed delivery.
//!
//! The log is one JSON array of [`PendingBatch`] records. Every change
//! rewrites the whole file: write to `<log>.tmp`, fsync, rename over the log.
//! A crash between writes leaves either the old or the new array on disk,
//! never a torn one.
//!
//! `persist` and the read-attempt-rewrite cycle of `sweep` share one async
//! mutex, so a batch cannot be added while a sweep is rewriting the log.

use crate::error::PipelineError;
use crate::metrics::PipelineStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tallyflow_env::{Batch, ElectionContext, TransportError, VoteSink};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// A batch waiting for redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub batch: Batch,
    
    /// When the batch first became durable
    pub persisted_at: DateTime<Utc>,
    
    /// Failed sweep attempts so far
    pub attempts: u32,
}

impl PendingBatch {
    pub fn new(batch: Batch) -> Self {
        Self {
            batch,
            persisted_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

/// Sends one batch, bounded by `timeout`.
pub(crate) async fn send_with_timeout<S: VoteSink + ?Sized>(
    sink: &S,
    batch: &Batch,
    timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(timeout, sink.send(batch)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Durable store of undelivered batches.
pub struct RetryStore {
    path: PathBuf,
    lock: Mutex<()>,
    stats: Arc<PipelineStats>,
}

impl RetryStore {
    /// Opens (or prepares) the log at `path`. Nothing is read until the first
    /// `persist` or `sweep`; a log left by a previous process is resumed then.
    pub fn open(path: impl Into<PathBuf>, stats: Arc<PipelineStats>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            stats,
        }
    }
    
    pub fn path(&self) -> &Path {
        &self.path
    }
    
    /// Appends a batch to the log.
    ///
    /// # Errors
    /// `PersistenceFailure` if the log cannot be read or rewritten. This is
    /// logged at error level: the batch's votes may be lost.
    pub async fn persist(&self, batch: Batch) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;
        let batch_id = batch.batch_id.clone();
        let events = batch.len();
        
        let result = async {
            let mut pending = self.read_log().await?;
            pending.push(PendingBatch::new(batch));
            self.write_log(&pending).await
        }
        .await;
        
        match result {
            Ok(()) => {
                PipelineStats::bump(&self.stats.batches_persisted);
                debug!("Persisted batch {} ({} events) for retry", batch_id, events);
                Ok(())
            }
            Err(e) => {
                PipelineStats::bump(&self.stats.persistence_failures);
                error!(
                    "Failed to persist batch {} ({} events), votes may be lost: {}",
                    batch_id, events, e
                );
                Err(e)
            }
        }
    }
    
    /// All batches currently in the log.
    pub async fn pending(&self) -> Result<Vec<PendingBatch>, PipelineError> {
        let _guard = self.lock.lock().await;
        self.read_log().await
    }
    
    /// Attempts every stored batch once and rewrites the log with the ones
    /// that still failed.
    pub async fn sweep<S: VoteSink + ?Sized>(
        &self,
        sink: &S,
        timeout: Duration,
    ) -> Result<SweepReport, PipelineError> {
        let _guard = self.lock.lock().await;
        let pending = self.read_log().await?;
        if pending.is_empty() {
            return Ok(SweepReport::default());
        }
        
        let attempted = pending.len();
        let mut still_failing = Vec::new();
        
        for mut entry in pending {
            match send_with_timeout(sink, &entry.batch, timeout).await {
                Ok(()) => {
                    PipelineStats::bump(&self.stats.batches_recovered);
                    debug!("Recovered batch {}", entry.batch.batch_id);
                }
                Err(e) => {
                    entry.attempts += 1;
                    warn!(
                        "Retry of batch {} failed (attempt {}): {}",
                        entry.batch.batch_id, entry.attempts, e
                    );
                    still_failing.push(entry);
                }
            }
        }
        
        let report = SweepReport {
            attempted,
            delivered: attempted - still_failing.len(),
            remaining: still_failing.len(),
        };
        
        if let Err(e) = self.write_log(&still_failing).await {
            PipelineStats::bump(&self.stats.persistence_failures);
            error!("Failed to rewrite retry log after sweep: {}", e);
            return Err(e);
        }
        
        info!(
            "Retry sweep: {} attempted, {} delivered, {} remaining",
            report.attempted, report.delivered, report.remaining
        );
        Ok(report)
    }
    
    /// Starts the periodic sweeper on the context's executor.
    ///
    /// The sweeper runs until the returned handle is stopped or dropped.
    pub fn spawn_sweeper<Ctx, S>(
        self: &Arc<Self>,
        ctx: &Ctx,
        sink: Arc<S>,
        interval: Duration,
        timeout: Duration,
    ) -> SweeperHandle
    where
        Ctx: ElectionContext,
        S: VoteSink + ?Sized + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let store = Arc::clone(self);
        
        ctx.spawn("retry-sweeper", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = store.sweep(sink.as_ref(), timeout).await {
                            error!("Retry sweep aborted: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            debug!("Retry sweeper stopped");
                            break;
                        }
                    }
                }
            }
        });
        
        SweeperHandle { stop: stop_tx }
    }
    
    async fn read_log(&self) -> Result<Vec<PendingBatch>, PipelineError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::PersistenceFailure(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        
        // A corrupt log is never overwritten: refuse instead
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::PersistenceFailure(format!(
                "retry log {} is corrupt: {}",
                self.path.display(),
                e
            ))
        })
    }
    
    async fn write_log(&self, pending: &[PendingBatch]) -> Result<(), PipelineError> {
        let failure = |what: &str, e: std::io::Error| {
            PipelineError::PersistenceFailure(format!("{} {}: {}", what, self.path.display(), e))
        };
        
        let json = serde_json::to_vec_pretty(pending)
            .map_err(|e| PipelineError::PersistenceFailure(e.to_string()))?;
        
        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| failure("cannot create temp file for", e))?;
        file.write_all(&json)
            .await
            .map_err(|e| failure("cannot write temp file for", e))?;
        file.sync_all()
            .await
            .map_err(|e| failure("cannot fsync temp file for", e))?;
        drop(file);
        
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| failure("cannot replace", e))
    }
    
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Stops the background sweeper when stopped or dropped.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
}

impl SweeperHandle {
    pub fn stop(self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{event, RecordingSink};
    use tallyflow_env::{NodeId, TokioContext};
    
    fn batch(id: &str) -> Batch {
        Batch::with_id(id, NodeId::from_label("GROUP_1"), vec![event("v1", "PX")])
    }
    
    fn store(dir: &tempfile::TempDir) -> RetryStore {
        RetryStore::open(dir.path().join("pending.json"), Arc::new(PipelineStats::new()))
    }
    
    #[tokio::test]
    async fn test_persist_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        
        store.persist(batch("VOTE_a")).await.unwrap();
        store.persist(batch("VOTE_b")).await.unwrap();
        
        let pending = store.pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|p| p.batch.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["VOTE_a", "VOTE_b"]);
        assert!(pending.iter().all(|p| p.attempts == 0));
        assert!(!dir.path().join("pending.json.tmp").exists());
    }
    
    #[tokio::test]
    async fn test_sweep_after_restart_delivers_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir).persist(batch("VOTE_a")).await.unwrap();
        
        // A fresh store over the same log stands in for a restarted process
        let restarted = store(&dir);
        let sink = RecordingSink::new();
        let report = restarted.sweep(&sink, Duration::from_secs(1)).await.unwrap();
        
        assert_eq!(report, SweepReport { attempted: 1, delivered: 1, remaining: 0 });
        assert_eq!(sink.batch_ids(), vec!["VOTE_a".to_string()]);
        // The log never held voter ids
        let replayed = &sink.batches()[0].data_points[0];
        assert!(replayed.voter_id.is_empty());
        assert_eq!(replayed.object_identifier, "PX");
        assert!(restarted.pending().await.unwrap().is_empty());
        assert_eq!(restarted.stats.batches_recovered.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
    
    #[tokio::test]
    async fn test_failing_batch_stays_after_each_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.persist(batch("VOTE_a")).await.unwrap();
        
        let sink = RecordingSink::failing();
        for expected_attempts in 1..=3 {
            let report = store.sweep(&sink, Duration::from_secs(1)).await.unwrap();
            assert_eq!(report.remaining, 1);
            
            let pending = store.pending().await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].attempts, expected_attempts);
        }
        assert!(sink.batch_ids().is_empty());
    }
    
    #[tokio::test]
    async fn test_corrupt_log_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        std::fs::write(&path, b"[{\"batch\": ").unwrap();
        
        let store = RetryStore::open(&path, Arc::new(PipelineStats::new()));
        let err = store.persist(batch("VOTE_a")).await.unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailure(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"[{\"batch\": ");
        assert_eq!(store.stats.persistence_failures.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
    
    #[tokio::test]
    async fn test_sweep_on_missing_log_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let report = store.sweep(&RecordingSink::new(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(!store.path().exists());
    }
    
    #[tokio::test]
    async fn test_sweeper_task_recovers_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(&dir));
        store.persist(batch("VOTE_a")).await.unwrap();
        
        let sink = Arc::new(RecordingSink::new());
        let handle = store.spawn_sweeper(
            &TokioContext::new(),
            Arc::clone(&sink),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );
        
        for _ in 0..50 {
            if !sink.batch_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop();
        
        assert_eq!(sink.batch_ids(), vec!["VOTE_a".to_string()]);
        assert!(store.pending().await.unwrap().is_empty());
    }
}
