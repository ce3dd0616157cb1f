//! Wire types shared by the engines and the transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

/// Numeric value carried by every vote event.
pub const VOTE_VALUE: u32 = 1;

/// Unique identifier for an ingestion node (the batch "source node").
///
/// Uses UUID v4 for global uniqueness without coordination, but accepts
/// operator-chosen labels such as `GROUP_1` as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
    
    /// Creates a NodeId from an operator-chosen label.
    pub fn from_label(label: impl Into<String>) -> Self {
        Self(label.into())
    }
    
    /// Returns the label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admitted vote, the unit of ingestion.
///
/// The voter identifier is used for admission only and never leaves the
/// node: it is skipped on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteEvent {
    /// Admission key. Not serialized, so it is absent from broker payloads
    /// and from the retry log; events decoded from either (including batches
    /// replayed by the retry sweep) carry an empty `voter_id`. Dedup has
    /// already happened by then.
    #[serde(skip)]
    pub voter_id: String,
    
    /// Event category (e.g. `election`)
    #[serde(rename = "type")]
    pub kind: String,
    
    /// Candidate/party identifier
    #[serde(rename = "objectIdentifier")]
    pub object_identifier: String,
    
    /// Always [`VOTE_VALUE`]
    pub valor: u32,
    
    #[serde(rename = "eventDatetime")]
    pub event_datetime: DateTime<Utc>,
}

impl VoteEvent {
    /// Creates a vote event stamped with the given time.
    pub fn new(
        voter_id: impl Into<String>,
        kind: impl Into<String>,
        candidate_id: impl Into<String>,
        at: SystemTime,
    ) -> Self {
        Self {
            voter_id: voter_id.into(),
            kind: kind.into(),
            object_identifier: candidate_id.into(),
            valor: VOTE_VALUE,
            event_datetime: DateTime::<Utc>::from(at),
        }
    }
}

/// A group of vote events bundled for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "batchId")]
    pub batch_id: String,
    
    #[serde(rename = "sourceNodeId")]
    pub source_node_id: NodeId,
    
    #[serde(rename = "dataPoints")]
    pub data_points: Vec<VoteEvent>,
}

impl Batch {
    /// Creates a batch with a fresh `VOTE_xxxxxxxx` identifier.
    pub fn new(source_node_id: NodeId, data_points: Vec<VoteEvent>) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::with_id(format!("VOTE_{}", &id[..8]), source_node_id, data_points)
    }
    
    /// Creates a batch with an explicit identifier.
    pub fn with_id(
        batch_id: impl Into<String>,
        source_node_id: NodeId,
        data_points: Vec<VoteEvent>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            source_node_id,
            data_points,
        }
    }
    
    /// Number of vote events in the batch.
    pub fn len(&self) -> usize {
        self.data_points.len()
    }
    
    /// True if the batch carries no events.
    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }
    
    /// Per-candidate totals carried by this batch.
    pub fn tally(&self) -> BTreeMap<String, u64> {
        let mut tally = BTreeMap::new();
        for event in &self.data_points {
            *tally.entry(event.object_identifier.clone()).or_insert(0) += event.valor as u64;
        }
        tally
    }
}

/// Cumulative partial tally submitted to the aggregator.
///
/// Field names follow the aggregator's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSubmission {
    /// Part index, 0 for the first submission of a run
    #[serde(rename = "electionpart")]
    pub election_part: u64,
    
    /// Run serial; `null` on part 0, echoed back on later parts
    #[serde(rename = "serialeleicao")]
    pub serial: Option<u64>,
    
    #[serde(rename = "totalpopulacao")]
    pub total_population: u64,
    
    #[serde(rename = "totalvotos")]
    pub total_votes: u64,
    
    #[serde(rename = "votos_por_partido")]
    pub votes_by_party: BTreeMap<String, u64>,
    
    #[serde(rename = "ativaeleicao")]
    pub active: bool,
    
    #[serde(rename = "totalpossiveiseleitores")]
    pub total_possible_voters: u64,
}

/// Aggregator acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregationAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    
    #[serde(rename = "serialeleicao", default)]
    pub serial: Option<u64>,
}
