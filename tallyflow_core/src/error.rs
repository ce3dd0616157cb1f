//! Error types for the election engines and the ingestion pipeline.

use tallyflow_env::TransportError;
use thiserror::Error;

/// Errors that prevent a simulation run from starting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// Fatal: the caller must not start the run
    #[error("Insufficient population: {population} voters cannot cover {regions} regions")]
    InsufficientPopulation { population: u64, regions: usize },
    
    #[error("A run needs at least one region")]
    NoRegions,
    
    #[error("A run needs at least one party")]
    NoParties,
    
    /// Two parties share a name; their tallies would collide
    #[error("Party {0} is listed more than once")]
    DuplicateParty(String),
    
    #[error("Invalid turnout rate {0} (expected 0.0..=1.0)")]
    InvalidTurnout(f64),
}

/// Errors raised by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The sink could not be reached; the next send reconnects
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    
    /// A constructed batch was not delivered (it has been persisted)
    #[error("Delivery of batch {batch_id} failed: {reason}")]
    DeliveryFailure { batch_id: String, reason: String },
    
    /// The retry log cannot be written. Votes may be lost.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    
    #[error("Voter registry error: {0}")]
    Registry(String),
    
    #[error("Candidate roster error: {0}")]
    Roster(String),
}

impl PipelineError {
    /// Classifies a transport error for a given batch.
    pub fn from_transport(batch_id: &str, err: TransportError) -> Self {
        if err.is_unavailable() {
            Self::TransportUnavailable(err.to_string())
        } else {
            Self::DeliveryFailure {
                batch_id: batch_id.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Errors raised by the aggregation client.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Bounded retries exhausted; standings stay stale until a later part succeeds
    #[error("Aggregation submit failed after {attempts} attempts: {last_error}")]
    SubmitFailure { attempts: u32, last_error: String },
    
    /// Part 0 was acknowledged without a serial
    #[error("Aggregator acknowledged part 0 without assigning a serial")]
    MissingSerial,
    
    #[error("Standings query failed: {0}")]
    Query(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_transport_error_classification() {
        let err = PipelineError::from_transport("VOTE_1", TransportError::unavailable("refused"));
        assert!(matches!(err, PipelineError::TransportUnavailable(_)));
        
        let err = PipelineError::from_transport("VOTE_2", TransportError::delivery("nack"));
        match err {
            PipelineError::DeliveryFailure { batch_id, .. } => assert_eq!(batch_id, "VOTE_2"),
            other => panic!("unexpected {other:?}"),
        }
    }
    
    #[test]
    fn test_insufficient_population_message() {
        let err = SimulationError::InsufficientPopulation { population: 3, regions: 5 };
        assert_eq!(
            err.to_string(),
            "Insufficient population: 3 voters cannot cover 5 regions"
        );
    }
}
