//! Error types for the TallyFlow transport layer.

use thiserror::Error;

/// Errors that can occur while talking to the outside world.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the sink/aggregator could not be established.
    /// The next send attempts a fresh connection.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    
    /// The connection was up but the payload was not accepted
    #[error("Delivery failed: {0}")]
    Delivery(String),
    
    /// The remote side answered with a non-success status
    #[error("Rejected by remote (status {status}): {message}")]
    Rejected { status: u16, message: String },
    
    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    
    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl TransportError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
    
    /// Creates a delivery error.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
    
    /// True when the failure was at connection level rather than payload level.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_unavailable_classification() {
        assert!(TransportError::unavailable("refused").is_unavailable());
        assert!(TransportError::Timeout(5000).is_unavailable());
        assert!(!TransportError::delivery("nack").is_unavailable());
        assert!(!TransportError::Rejected { status: 500, message: String::new() }.is_unavailable());
    }
}
