//! Simulated vote sink with fault injection.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tallyflow_env::{Batch, FaultController, TransportError, VoteSink};
use tracing::debug;

/// Fault controller shared by a [`SimSink`] and the scenario driving it.
pub struct SimSinkController {
    /// Broker down: every send fails with `Unavailable`
    outage: AtomicBool,
    
    /// Probability of a delivery failure per send
    failure_rate: Mutex<f64>,
    
    /// Sends that must fail before the sink behaves again
    fail_next: AtomicU32,
    
    /// Deterministic draw source for `failure_rate`
    rng: Mutex<ChaCha8Rng>,
}

impl SimSinkController {
    pub fn new(seed: u64) -> Self {
        Self {
            outage: AtomicBool::new(false),
            failure_rate: Mutex::new(0.0),
            fail_next: AtomicU32::new(0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
    
    pub fn is_down(&self) -> bool {
        self.outage.load(Ordering::SeqCst)
    }
    
    /// Decides the fate of one send.
    fn check(&self) -> Result<(), TransportError> {
        if self.is_down() {
            return Err(TransportError::unavailable("broker unreachable"));
        }
        
        let forced = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(TransportError::delivery("injected failure"));
        }
        
        let rate = *self.failure_rate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rate > 0.0 && rng.gen_bool(rate) {
            return Err(TransportError::delivery("random delivery failure"));
        }
        Ok(())
    }
}

impl FaultController for SimSinkController {
    fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }
    
    fn set_failure_rate(&self, rate: f64) {
        *self.failure_rate.lock().unwrap_or_else(PoisonError::into_inner) = rate.clamp(0.0, 1.0);
    }
    
    fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
    
    fn heal_all(&self) {
        self.set_outage(false);
        self.set_failure_rate(0.0);
        self.fail_next(0);
    }
}

/// In-memory broker that records every delivered batch.
pub struct SimSink {
    controller: Arc<SimSinkController>,
    delivered: Mutex<Vec<Batch>>,
    connected: AtomicBool,
    sends: AtomicU64,
    reconnects: AtomicU64,
}

impl SimSink {
    pub fn new(controller: Arc<SimSinkController>) -> Self {
        Self {
            controller,
            delivered: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            sends: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }
    
    pub fn controller(&self) -> &Arc<SimSinkController> {
        &self.controller
    }
    
    /// Batches accepted so far, in arrival order.
    pub fn delivered(&self) -> Vec<Batch> {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
    
    /// Per-candidate totals across all delivered batches.
    pub fn tally(&self) -> BTreeMap<String, u64> {
        let mut tally = BTreeMap::new();
        for batch in self.delivered.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            for (candidate, count) in batch.tally() {
                *tally.entry(candidate).or_insert(0) += count;
            }
        }
        tally
    }
    
    /// Total send attempts, failed ones included.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }
    
    /// Times the sink reconnected after an outage.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoteSink for SimSink {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        
        if self.controller.is_down() {
            self.connected.store(false, Ordering::SeqCst);
        } else if !self.connected.swap(true, Ordering::SeqCst) {
            // Reconnect on the first send after an outage
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            debug!("Sim sink reconnected");
        }
        
        self.controller.check()?;
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).push(batch.clone());
        Ok(())
    }
    
    fn name(&self) -> &str {
        "sim-sink"
    }
}
