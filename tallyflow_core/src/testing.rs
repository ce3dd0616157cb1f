//! Test doubles shared by the pipeline tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tallyflow_env::{
    AggregationAck, AggregationSubmission, Aggregator, Batch, TransportError, VoteEvent, VoteSink,
};

pub(crate) fn event(voter: &str, candidate: &str) -> VoteEvent {
    VoteEvent::new(voter, "election", candidate, UNIX_EPOCH + Duration::from_secs(1_704_067_200))
}

/// Sink that records what it receives, or fails every send while `down`.
#[derive(Default)]
pub(crate) struct RecordingSink {
    received: Mutex<Vec<Batch>>,
    down: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }
    
    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.set_down(true);
        sink
    }
    
    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
    
    pub(crate) fn batches(&self) -> Vec<Batch> {
        self.received.lock().unwrap().clone()
    }
    
    pub(crate) fn batch_ids(&self) -> Vec<String> {
        self.batches().into_iter().map(|b| b.batch_id).collect()
    }
}

#[async_trait]
impl VoteSink for RecordingSink {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("sink down"));
        }
        self.received.lock().unwrap().push(batch.clone());
        Ok(())
    }
    
    fn name(&self) -> &str {
        "recording"
    }
}

/// Aggregator that hands out one fixed serial and keeps every part.
pub(crate) struct MemoryAggregator {
    serial: Option<u64>,
    parts: Mutex<Vec<AggregationSubmission>>,
    failures: AtomicU32,
    queries: AtomicU64,
}

impl MemoryAggregator {
    pub(crate) fn new(serial: u64) -> Self {
        Self {
            serial: Some(serial),
            parts: Mutex::new(Vec::new()),
            failures: AtomicU32::new(0),
            queries: AtomicU64::new(0),
        }
    }
    
    pub(crate) fn without_serials() -> Self {
        Self { serial: None, ..Self::new(0) }
    }
    
    pub(crate) fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }
    
    pub(crate) fn submissions(&self) -> Vec<AggregationSubmission> {
        self.parts.lock().unwrap().clone()
    }
    
    pub(crate) fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Aggregator for MemoryAggregator {
    async fn submit(&self, submission: &AggregationSubmission) -> Result<AggregationAck, TransportError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::delivery("injected failure"));
        }
        self.parts.lock().unwrap().push(submission.clone());
        Ok(AggregationAck {
            message: Some("ok".to_string()),
            serial: self.serial,
        })
    }
    
    async fn current(&self) -> Result<Option<AggregationSubmission>, TransportError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.parts.lock().unwrap().last().cloned())
    }
}
