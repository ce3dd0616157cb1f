//! The Oracle - ground truth for election scenarios.
//!
//! The Oracle records what the election model produced and checks it against
//! what actually reached the sink (plus what is still parked in the retry
//! log). Delivery must be lossless and duplicate-free: every admitted vote is
//! in exactly one place.

use serde::Serialize;
use std::collections::BTreeMap;
use tallyflow_core::{PendingBatch, RegionResult};
use tallyflow_env::Batch;

/// Ground-truth ledger for one run.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    electorate: u64,
    regions: usize,
    population: u64,
    effective_population: u64,
    expected: BTreeMap<String, u64>,
}

/// Where the votes of each candidate ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub expected: BTreeMap<String, u64>,
    pub delivered: BTreeMap<String, u64>,
    pub pending: BTreeMap<String, u64>,
}

impl Reconciliation {
    /// Candidates whose delivered + pending count differs from the truth,
    /// as `(candidate, expected, accounted)`.
    pub fn mismatches(&self) -> Vec<(String, u64, u64)> {
        let mut candidates: Vec<&String> = self.expected.keys().collect();
        candidates.extend(self.delivered.keys());
        candidates.extend(self.pending.keys());
        candidates.sort();
        candidates.dedup();
        
        candidates
            .into_iter()
            .filter_map(|c| {
                let expected = self.expected.get(c).copied().unwrap_or(0);
                let accounted = self.delivered.get(c).copied().unwrap_or(0)
                    + self.pending.get(c).copied().unwrap_or(0);
                (expected != accounted).then(|| (c.clone(), expected, accounted))
            })
            .collect()
    }
    
    /// No vote lost, none counted twice.
    pub fn is_exact(&self) -> bool {
        self.mismatches().is_empty()
    }
    
    /// Everything delivered, nothing left in the retry log.
    pub fn is_fully_delivered(&self) -> bool {
        self.is_exact() && self.pending.values().all(|&v| v == 0)
    }
}

impl Oracle {
    pub fn new(electorate: u64) -> Self {
        Self {
            electorate,
            ..Self::default()
        }
    }
    
    /// Records one region result.
    pub fn record_region(&mut self, result: &RegionResult) {
        self.regions += 1;
        self.population += result.population;
        self.effective_population += result.effective_population;
        for (party, count) in &result.votes_by_party {
            *self.expected.entry(party.clone()).or_insert(0) += count;
        }
    }
    
    pub fn expected(&self) -> &BTreeMap<String, u64> {
        &self.expected
    }
    
    pub fn expected_votes(&self) -> u64 {
        self.expected.values().sum()
    }
    
    /// Invariants of the generated election itself.
    pub fn check_model(&self, results: &[RegionResult]) -> Result<(), String> {
        for result in results {
            let total = result.total_votes();
            if total != result.effective_population {
                return Err(format!(
                    "{}: {} votes for an effective population of {}",
                    result.name, total, result.effective_population
                ));
            }
            if result.effective_population > result.population {
                return Err(format!(
                    "{}: effective population {} exceeds population {}",
                    result.name, result.effective_population, result.population
                ));
            }
        }
        if self.regions == results.len() && self.population != self.electorate {
            return Err(format!(
                "regions hold {} voters, electorate is {}",
                self.population, self.electorate
            ));
        }
        if self.expected_votes() != self.effective_population {
            return Err(format!(
                "{} votes recorded for {} effective voters",
                self.expected_votes(),
                self.effective_population
            ));
        }
        Ok(())
    }
    
    /// Accounts delivered and pending batches against the truth.
    pub fn reconcile(&self, delivered: &[Batch], pending: &[PendingBatch]) -> Reconciliation {
        Reconciliation {
            expected: self.expected.clone(),
            delivered: tally(delivered.iter()),
            pending: tally(pending.iter().map(|p| &p.batch)),
        }
    }
}

fn tally<'a>(batches: impl Iterator<Item = &'a Batch>) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for batch in batches {
        for (candidate, count) in batch.tally() {
            *totals.entry(candidate).or_insert(0) += count;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;
    use tallyflow_env::{NodeId, VoteEvent};
    
    fn region(name: &str, pairs: &[(&str, u64)]) -> RegionResult {
        let votes: BTreeMap<String, u64> = pairs.iter().map(|(p, v)| (p.to_string(), *v)).collect();
        let total = votes.values().sum();
        RegionResult {
            name: name.to_string(),
            population: total,
            effective_population: total,
            votes_by_party: votes,
            winner: None,
            winner_percentage: 0.0,
        }
    }
    
    fn batch(candidates: &[&str]) -> Batch {
        let events = candidates
            .iter()
            .map(|c| VoteEvent::new("v", "election", *c, UNIX_EPOCH))
            .collect();
        Batch::new(NodeId::from_label("GROUP_1"), events)
    }
    
    #[test]
    fn test_exact_reconciliation_across_sink_and_log() {
        let mut oracle = Oracle::new(3);
        let results = vec![region("R1", &[("P1", 2), ("P2", 1)])];
        oracle.record_region(&results[0]);
        oracle.check_model(&results).unwrap();
        
        let pending = vec![PendingBatch::new(batch(&["P1"]))];
        let rec = oracle.reconcile(&[batch(&["P1", "P2"])], &pending);
        assert!(rec.is_exact());
        assert!(!rec.is_fully_delivered());
    }
    
    #[test]
    fn test_duplicate_delivery_is_a_mismatch() {
        let mut oracle = Oracle::new(1);
        oracle.record_region(&region("R1", &[("P1", 1)]));
        
        let rec = oracle.reconcile(&[batch(&["P1"]), batch(&["P1"])], &[]);
        assert_eq!(rec.mismatches(), vec![("P1".to_string(), 1, 2)]);
    }
    
    #[test]
    fn test_model_check_catches_bad_totals() {
        let mut oracle = Oracle::new(10);
        let mut bad = region("R1", &[("P1", 4)]);
        bad.effective_population = 5;
        oracle.record_region(&bad);
        assert!(oracle.check_model(&[bad]).is_err());
    }
}
