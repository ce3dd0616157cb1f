//! In-memory aggregator for simulation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tallyflow_env::{AggregationAck, AggregationSubmission, Aggregator, TransportError};
use tracing::debug;

#[derive(Default)]
struct AggregatorState {
    /// Latest part per serial (last write wins)
    runs: BTreeMap<u64, AggregationSubmission>,
    /// Serial written most recently
    last_written: Option<u64>,
    /// Every accepted part, in arrival order
    history: Vec<AggregationSubmission>,
}

/// Aggregator that assigns serials on part 0 and keeps the latest part of
/// every run.
///
/// Serials start at 0 and increase by one per run. A later part replaces the
/// stored snapshot for its serial wholesale; parts are not merged and not
/// reordered.
#[derive(Default)]
pub struct SimAggregator {
    state: Mutex<AggregatorState>,
    next_serial: AtomicU64,
    outage: AtomicBool,
    fail_next: AtomicU32,
}

impl SimAggregator {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Makes every call fail with `Unavailable` until cleared.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }
    
    /// Forces the next `count` submissions to fail.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
    
    /// Latest stored snapshot for a serial.
    pub fn snapshot(&self, serial: u64) -> Option<AggregationSubmission> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).runs.get(&serial).cloned()
    }
    
    /// Every accepted part, in arrival order.
    pub fn history(&self) -> Vec<AggregationSubmission> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).history.clone()
    }
    
    fn check(&self) -> Result<(), TransportError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("aggregator unreachable"));
        }
        let forced = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(TransportError::delivery("injected aggregator failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Aggregator for SimAggregator {
    async fn submit(&self, submission: &AggregationSubmission) -> Result<AggregationAck, TransportError> {
        self.check()?;
        
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let serial = match (submission.election_part, submission.serial) {
            (0, _) => self.next_serial.fetch_add(1, Ordering::SeqCst),
            (_, Some(serial)) if state.runs.contains_key(&serial) => serial,
            (part, serial) => {
                return Err(TransportError::Rejected {
                    status: 400,
                    message: format!("part {} carries unknown serial {:?}", part, serial),
                })
            }
        };
        
        let mut stored = submission.clone();
        stored.serial = Some(serial);
        state.runs.insert(serial, stored.clone());
        state.last_written = Some(serial);
        state.history.push(stored);
        debug!("Aggregator stored part {} for serial {}", submission.election_part, serial);
        
        Ok(AggregationAck {
            message: Some(format!("part {} accepted", submission.election_part)),
            serial: Some(serial),
        })
    }
    
    async fn current(&self) -> Result<Option<AggregationSubmission>, TransportError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("aggregator unreachable"));
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.last_written.and_then(|serial| state.runs.get(&serial).cloned()))
    }
}
