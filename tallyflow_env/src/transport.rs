//! Transport abstractions for TallyFlow.

use async_trait::async_trait;
use crate::error::TransportError;
use crate::types::{AggregationAck, AggregationSubmission, Batch};

/// Abstraction for the broker that receives vote batches.
///
/// # Implementations
///
/// - **Production**: `HttpSink` - POSTs JSON batches to a broker gateway
/// - **Simulation**: `SimSink` - in-memory with outage/loss injection
///
/// # Batch Flow
///
/// ```text
/// MicroBatcher               Sink                     Broker
///   |                          |                         |
///   |-- send(batch) ---------->|                         |
///   |                          |-- [connect/publish] --->|
///   |<-- Ok / Err -------------|                         |
///   |                                                    |
///   |-- Err => RetryStore::persist(batch)                |
/// ```
#[async_trait]
pub trait VoteSink: Send + Sync + 'static {
    /// Delivers one batch.
    ///
    /// # Returns
    /// * `Ok(())` - The broker accepted the batch
    /// * `Err(TransportError::Unavailable)` - No connection; the next call reconnects
    /// * `Err(_)` - Any other delivery failure
    async fn send(&self, batch: &Batch) -> Result<(), TransportError>;
    
    /// Short name used in log lines.
    fn name(&self) -> &str;
}

/// Abstraction for the external aggregator that keeps partial tallies.
#[async_trait]
pub trait Aggregator: Send + Sync + 'static {
    /// Submits one cumulative snapshot.
    ///
    /// On part 0 the acknowledgement carries the serial assigned to the run.
    async fn submit(
        &self,
        submission: &AggregationSubmission,
    ) -> Result<AggregationAck, TransportError>;
    
    /// Fetches the most recent snapshot, if any run has reported.
    async fn current(&self) -> Result<Option<AggregationSubmission>, TransportError>;
}

/// Marker trait for transport controllers in simulation.
///
/// Allows injecting faults like outages and random delivery failures.
pub trait FaultController: Send + Sync {
    /// Takes the sink down (`true`) or brings it back (`false`).
    fn set_outage(&self, down: bool);
    
    /// Sets the probability (0.0 - 1.0) that a send fails with a delivery error.
    fn set_failure_rate(&self, rate: f64);
    
    /// Forces the next `count` sends to fail.
    fn fail_next(&self, count: u32);
    
    /// Clears every injected fault.
    fn heal_all(&self);
}
