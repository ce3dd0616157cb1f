//! Pipeline counters.
//!
//! All counters are relaxed atomics: they are observability, not control flow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Buffer reached the maximum batch size
    Size,
    /// Flush interval elapsed
    Timer,
    /// Final flush during shutdown
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timer => "timer",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Live counters shared by the guard, batcher and retry store.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub votes_admitted: AtomicU64,
    pub rejected_duplicate: AtomicU64,
    pub rejected_invalid: AtomicU64,
    /// Batches the sink acknowledged on first attempt.
    pub batches_delivered: AtomicU64,
    /// Events inside delivered batches (for the average batch size).
    pub events_delivered: AtomicU64,
    pub flushes_by_size: AtomicU64,
    pub flushes_by_timer: AtomicU64,
    pub flushes_by_shutdown: AtomicU64,
    pub batches_persisted: AtomicU64,
    /// Batches later delivered by a retry sweep.
    pub batches_recovered: AtomicU64,
    pub persistence_failures: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    
    pub(crate) fn record_flush(&self, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Size => &self.flushes_by_size,
            FlushReason::Timer => &self.flushes_by_timer,
            FlushReason::Shutdown => &self.flushes_by_shutdown,
        };
        Self::bump(counter);
    }
    
    pub(crate) fn record_delivery(&self, events: usize) {
        Self::bump(&self.batches_delivered);
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }
    
    /// Average events per delivered batch.
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_delivered.load(Ordering::Relaxed);
        let events = self.events_delivered.load(Ordering::Relaxed);
        if batches == 0 {
            0.0
        } else {
            events as f64 / batches as f64
        }
    }
    
    /// Point-in-time copy for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            votes_admitted: load(&self.votes_admitted),
            rejected_duplicate: load(&self.rejected_duplicate),
            rejected_invalid: load(&self.rejected_invalid),
            batches_delivered: load(&self.batches_delivered),
            events_delivered: load(&self.events_delivered),
            flushes_by_size: load(&self.flushes_by_size),
            flushes_by_timer: load(&self.flushes_by_timer),
            flushes_by_shutdown: load(&self.flushes_by_shutdown),
            batches_persisted: load(&self.batches_persisted),
            batches_recovered: load(&self.batches_recovered),
            persistence_failures: load(&self.persistence_failures),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Plain-value copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub votes_admitted: u64,
    pub rejected_duplicate: u64,
    pub rejected_invalid: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub flushes_by_size: u64,
    pub flushes_by_timer: u64,
    pub flushes_by_shutdown: u64,
    pub batches_persisted: u64,
    pub batches_recovered: u64,
    pub persistence_failures: u64,
    pub avg_batch_size: f64,
}
