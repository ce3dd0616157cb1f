//! Runtime configuration for the pipeline and the aggregation client.

use std::path::PathBuf;
use std::time::Duration;
use tallyflow_env::NodeId;

/// Configuration for the vote ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum events per batch before a size flush (default: 100)
    pub max_batch_size: usize,
    
    /// Maximum time a non-empty buffer waits before a timer flush (default: 1s)
    pub flush_interval: Duration,
    
    /// Upper bound on a single network send (default: 5s)
    pub send_timeout: Duration,
    
    /// Period of the retry sweeper (default: 10s)
    pub sweep_interval: Duration,
    
    /// Location of the durable retry log
    pub retry_log_path: PathBuf,
    
    /// Source node stamped on every batch (default: GROUP_1)
    pub source_node_id: NodeId,
    
    /// Event type stamped on every vote (default: election)
    pub event_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(1),
            send_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            retry_log_path: PathBuf::from("pending_batches.json"),
            source_node_id: NodeId::from_label("GROUP_1"),
            event_type: "election".to_string(),
        }
    }
}

/// Configuration for the aggregation client.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Attempts per part before giving up (default: 3)
    pub max_attempts: u32,
    
    /// Fixed delay between attempts (default: 2s)
    pub retry_delay: Duration,
    
    /// How long fetched standings are served from cache (default: 30s)
    pub standings_ttl: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            standings_ttl: Duration::from_secs(30),
        }
    }
}
