//! Dedup guard - idempotent vote admission.
//!
//! `admit(voter, candidate)` checks the candidate against a snapshot of the
//! known roster first (unknown candidates never touch the registry), then
//! performs the registry's atomic check-and-insert.

use crate::error::PipelineError;
use crate::registry::{MemoryRegistry, VoterRegistry};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Why an admission was refused. Neither reason is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateVote,
    InvalidCandidate,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

#[derive(Deserialize)]
struct CandidateRecord {
    id: serde_json::Value,
}

/// Snapshot of the candidates a vote may name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRoster {
    ids: HashSet<String>,
}

impl CandidateRoster {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
    
    /// Parses a candidate file: a JSON array of objects with an `id`
    /// (string or number). Other fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let records: Vec<CandidateRecord> = serde_json::from_str(json)
            .map_err(|e| PipelineError::Roster(format!("invalid candidate list: {}", e)))?;
        
        let ids = records
            .into_iter()
            .map(|record| match record.id {
                serde_json::Value::String(s) => Ok(s),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                other => Err(PipelineError::Roster(format!("unsupported candidate id {}", other))),
            })
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { ids })
    }
    
    /// Loads a candidate file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Roster(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
    
    pub fn contains(&self, candidate_id: &str) -> bool {
        self.ids.contains(candidate_id)
    }
    
    /// Candidate ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
    
    pub fn len(&self) -> usize {
        self.ids.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Rejects voters that already voted and candidates nobody knows.
pub struct DedupGuard {
    registry: Box<dyn VoterRegistry>,
    roster: RwLock<Arc<CandidateRoster>>,
}

impl DedupGuard {
    /// Creates a guard backed by an in-memory registry.
    pub fn new(roster: CandidateRoster) -> Self {
        Self::with_registry(roster, Box::new(MemoryRegistry::new()))
    }
    
    pub fn with_registry(roster: CandidateRoster, registry: Box<dyn VoterRegistry>) -> Self {
        Self {
            registry,
            roster: RwLock::new(Arc::new(roster)),
        }
    }
    
    /// Admits one vote.
    ///
    /// # Errors
    /// Only storage problems in the registry surface as `Err`; rejections are
    /// ordinary outcomes.
    pub fn admit(&self, voter_id: &str, candidate_id: &str) -> Result<Admission, PipelineError> {
        if !self.roster().contains(candidate_id) {
            return Ok(Admission::Rejected(RejectReason::InvalidCandidate));
        }
        
        let inserted = self
            .registry
            .insert_if_absent(voter_id)
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        
        Ok(if inserted {
            Admission::Accepted
        } else {
            Admission::Rejected(RejectReason::DuplicateVote)
        })
    }
    
    /// Current roster snapshot.
    pub fn roster(&self) -> Arc<CandidateRoster> {
        match self.roster.read() {
            Ok(roster) => Arc::clone(&roster),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
    
    /// Swaps in a fresh roster; the registry is untouched.
    pub fn replace_candidates(&self, roster: CandidateRoster) {
        match self.roster.write() {
            Ok(mut current) => *current = Arc::new(roster),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(roster),
        }
    }
    
    /// Number of voters admitted so far.
    pub fn admitted(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SledRegistry;
    use std::sync::Barrier;
    
    fn guard() -> DedupGuard {
        DedupGuard::new(CandidateRoster::from_ids(["13", "45"]))
    }
    
    #[test]
    fn test_admit_then_duplicate() {
        let guard = guard();
        assert_eq!(guard.admit("111", "13").unwrap(), Admission::Accepted);
        assert_eq!(
            guard.admit("111", "45").unwrap(),
            Admission::Rejected(RejectReason::DuplicateVote)
        );
        assert_eq!(guard.admitted(), 1);
    }
    
    #[test]
    fn test_invalid_candidate_leaves_registry_alone() {
        let guard = guard();
        assert_eq!(
            guard.admit("222", "99").unwrap(),
            Admission::Rejected(RejectReason::InvalidCandidate)
        );
        assert_eq!(guard.admitted(), 0);
        // The voter can still vote for a real candidate
        assert_eq!(guard.admit("222", "13").unwrap(), Admission::Accepted);
    }
    
    #[test]
    fn test_concurrent_admissions_accept_exactly_once() {
        for _ in 0..20 {
            let guard = guard();
            let barrier = Barrier::new(2);
            let outcomes: Vec<Admission> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            guard.admit("333", "13").unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            
            assert_eq!(outcomes.iter().filter(|a| a.is_accepted()).count(), 1);
            assert!(outcomes.contains(&Admission::Rejected(RejectReason::DuplicateVote)));
        }
    }
    
    #[test]
    fn test_concurrent_admissions_with_sled() {
        let guard = DedupGuard::with_registry(
            CandidateRoster::from_ids(["13"]),
            Box::new(SledRegistry::open_temp().unwrap()),
        );
        let accepted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| guard.admit("444", "13").unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(Admission::is_accepted)
                .count()
        });
        assert_eq!(accepted, 1);
    }
    
    #[test]
    fn test_roster_from_json_accepts_numeric_ids() {
        let roster = CandidateRoster::from_json(
            r#"[{"id": "PX", "nome": "Partido X"}, {"id": 22, "nome": "Partido Y"}]"#,
        ).unwrap();
        assert!(roster.contains("PX"));
        assert!(roster.contains("22"));
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.ids(), vec!["22", "PX"]);
    }
    
    #[test]
    fn test_roster_from_json_rejects_garbage() {
        assert!(matches!(
            CandidateRoster::from_json("{not json"),
            Err(PipelineError::Roster(_))
        ));
        assert!(CandidateRoster::from_json(r#"[{"id": null}]"#).is_err());
    }
    
    #[test]
    fn test_replace_candidates() {
        let guard = guard();
        guard.replace_candidates(CandidateRoster::from_ids(["77"]));
        assert_eq!(
            guard.admit("555", "13").unwrap(),
            Admission::Rejected(RejectReason::InvalidCandidate)
        );
        assert_eq!(guard.admit("555", "77").unwrap(), Admission::Accepted);
    }
    
    #[test]
    fn test_roster_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.json");
        std::fs::write(&path, r#"[{"id": "PX"}]"#).unwrap();
        let roster = CandidateRoster::load(&path).unwrap();
        assert!(roster.contains("PX"));
        assert!(CandidateRoster::load(dir.path().join("missing.json")).is_err());
    }
}
