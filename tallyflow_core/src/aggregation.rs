//! Aggregation protocol (client side) and the early-decision check.
//!
//! The client submits cumulative snapshots: every part carries the running
//! totals of all regions processed so far, so the aggregator can keep only
//! the latest part per serial. Part 0 goes out without a serial and the
//! aggregator's acknowledgement assigns one; every later part echoes it.

use crate::config::AggregationConfig;
use crate::distribution::RegionResult;
use crate::error::AggregationError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tallyflow_env::{AggregationAck, AggregationSubmission, Aggregator, ElectionContext};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// =============================================================================
// EARLY DECISION
// =============================================================================

/// Result of the early-decision check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    /// The leader cannot be overtaken by the remaining voters
    Decided { winner: String, margin: u64, remaining: u64 },
    /// The outcome can still change; `leader` is absent when nobody has votes
    Open { leader: Option<String>, margin: u64, remaining: u64 },
}

impl Decision {
    pub fn is_decided(&self) -> bool {
        matches!(self, Decision::Decided { .. })
    }
    
    pub fn winner(&self) -> Option<&str> {
        match self {
            Decision::Decided { winner, .. } => Some(winner),
            Decision::Open { .. } => None,
        }
    }
    
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Decided { remaining, .. } | Decision::Open { remaining, .. } => *remaining,
        }
    }
}

/// Worst-case call: decided only if every unprocessed voter siding with the
/// runner-up still could not close the gap.
///
/// `processed` is population processed, not votes cast.
pub fn early_decision(
    votes: &BTreeMap<String, u64>,
    total_electorate: u64,
    processed: u64,
) -> Decision {
    let remaining = total_electorate.saturating_sub(processed);
    
    let mut standings: Vec<(&String, u64)> = votes
        .iter()
        .filter(|(_, v)| **v > 0)
        .map(|(party, &v)| (party, v))
        .collect();
    // Stable sort: ties keep party-name order
    standings.sort_by(|a, b| b.1.cmp(&a.1));
    
    match standings.as_slice() {
        [] => Decision::Open { leader: None, margin: 0, remaining },
        [(party, v)] => {
            if *v > remaining || remaining == 0 {
                Decision::Decided { winner: (*party).clone(), margin: *v, remaining }
            } else {
                Decision::Open { leader: Some((*party).clone()), margin: *v, remaining }
            }
        }
        [(leader, first), (_, second), ..] => {
            let margin = first - second;
            if margin > remaining {
                Decision::Decided { winner: (*leader).clone(), margin, remaining }
            } else {
                Decision::Open { leader: Some((*leader).clone()), margin, remaining }
            }
        }
    }
}

// =============================================================================
// AGGREGATION CLIENT
// =============================================================================

/// Builds cumulative snapshots and delivers them with bounded retry.
pub struct AggregationClient<Ctx: ElectionContext, A: Aggregator + ?Sized> {
    ctx: Arc<Ctx>,
    aggregator: Arc<A>,
    config: AggregationConfig,
    total_electorate: u64,
    serial: Option<u64>,
    next_part: u64,
    population: u64,
    votes: u64,
    votes_by_party: BTreeMap<String, u64>,
    last_snapshot: Option<AggregationSubmission>,
}

impl<Ctx: ElectionContext, A: Aggregator + ?Sized> AggregationClient<Ctx, A> {
    pub fn new(ctx: Arc<Ctx>, aggregator: Arc<A>, config: AggregationConfig, total_electorate: u64) -> Self {
        Self {
            ctx,
            aggregator,
            config,
            total_electorate,
            serial: None,
            next_part: 0,
            population: 0,
            votes: 0,
            votes_by_party: BTreeMap::new(),
            last_snapshot: None,
        }
    }
    
    /// Serial assigned by the aggregator, once part 0 is acknowledged.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }
    
    /// Index the next submitted part will carry.
    pub fn next_part(&self) -> u64 {
        self.next_part
    }
    
    /// Last snapshot the aggregator acknowledged.
    pub fn last_snapshot(&self) -> Option<&AggregationSubmission> {
        self.last_snapshot.as_ref()
    }
    
    /// Decision over everything folded in so far.
    pub fn decision(&self) -> Decision {
        early_decision(&self.votes_by_party, self.total_electorate, self.population)
    }
    
    /// Folds a region into the running totals and submits the new snapshot.
    ///
    /// The region stays folded in even when submission fails, so a later
    /// part still carries it.
    ///
    /// # Errors
    /// `SubmitFailure` after `max_attempts` failed attempts, `MissingSerial`
    /// if part 0 is acknowledged without a serial.
    pub async fn submit_region(&mut self, result: &RegionResult) -> Result<AggregationAck, AggregationError> {
        self.population += result.population;
        self.votes += result.total_votes();
        for (party, count) in &result.votes_by_party {
            *self.votes_by_party.entry(party.clone()).or_insert(0) += count;
        }
        
        let snapshot = self.snapshot();
        let ack = self.deliver(&snapshot).await?;
        
        if snapshot.election_part == 0 {
            let serial = ack.serial.ok_or(AggregationError::MissingSerial)?;
            info!("Aggregator assigned serial {}", serial);
            self.serial = Some(serial);
        }
        
        debug!(
            "Part {} acknowledged ({} of {} voters processed)",
            snapshot.election_part, snapshot.total_population, self.total_electorate
        );
        self.next_part += 1;
        self.last_snapshot = Some(snapshot);
        Ok(ack)
    }
    
    fn snapshot(&self) -> AggregationSubmission {
        AggregationSubmission {
            election_part: self.next_part,
            serial: if self.next_part == 0 { None } else { self.serial },
            total_population: self.population,
            total_votes: self.votes,
            votes_by_party: self.votes_by_party.clone(),
            active: self.population < self.total_electorate,
            total_possible_voters: self.total_electorate,
        }
    }
    
    async fn deliver(&self, snapshot: &AggregationSubmission) -> Result<AggregationAck, AggregationError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        
        for attempt in 1..=attempts {
            match self.aggregator.submit(snapshot).await {
                Ok(ack) => return Ok(ack),
                Err(e) => {
                    warn!(
                        "Aggregation part {} attempt {}/{} failed: {}",
                        snapshot.election_part, attempt, attempts, e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        self.ctx.sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        
        Err(AggregationError::SubmitFailure { attempts, last_error })
    }
}

// =============================================================================
// STANDINGS VIEW
// =============================================================================

struct CachedStandings {
    fetched_at: Duration,
    snapshot: Option<AggregationSubmission>,
}

/// Read-through cache over the aggregator's current standings.
pub struct StandingsView<Ctx: ElectionContext, A: Aggregator + ?Sized> {
    ctx: Arc<Ctx>,
    aggregator: Arc<A>,
    ttl: Duration,
    cache: Mutex<Option<CachedStandings>>,
}

impl<Ctx: ElectionContext, A: Aggregator + ?Sized> StandingsView<Ctx, A> {
    pub fn new(ctx: Arc<Ctx>, aggregator: Arc<A>, ttl: Duration) -> Self {
        Self {
            ctx,
            aggregator,
            ttl,
            cache: Mutex::new(None),
        }
    }
    
    /// Current standings, served from cache while younger than the TTL.
    pub async fn standings(&self) -> Result<Option<AggregationSubmission>, AggregationError> {
        let mut cache = self.cache.lock().await;
        let now = self.ctx.now();
        
        if let Some(cached) = cache.as_ref() {
            if now.saturating_sub(cached.fetched_at) < self.ttl {
                return Ok(cached.snapshot.clone());
            }
        }
        
        let snapshot = self.aggregator.current().await?;
        *cache = Some(CachedStandings {
            fetched_at: now,
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }
    
    /// Early-decision check on the current standings.
    pub async fn decision(&self) -> Result<Option<Decision>, AggregationError> {
        Ok(self.standings().await?.map(|s| {
            early_decision(&s.votes_by_party, s.total_possible_voters, s.total_population)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryAggregator;
    use tallyflow_env::TokioContext;
    
    fn votes(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(p, v)| (p.to_string(), *v)).collect()
    }
    
    fn region(name: &str, population: u64, pairs: &[(&str, u64)]) -> RegionResult {
        RegionResult {
            name: name.to_string(),
            population,
            effective_population: pairs.iter().map(|(_, v)| v).sum(),
            votes_by_party: votes(pairs),
            winner: None,
            winner_percentage: 0.0,
        }
    }
    
    fn fast_config() -> AggregationConfig {
        AggregationConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
            standings_ttl: Duration::from_secs(30),
        }
    }
    
    #[test]
    fn test_margin_equal_to_remaining_is_open() {
        let decision = early_decision(&votes(&[("A", 40), ("B", 20)]), 100, 60);
        assert_eq!(
            decision,
            Decision::Open { leader: Some("A".into()), margin: 20, remaining: 40 }
        );
        // Boundary: margin == remaining must stay open
        let boundary = early_decision(&votes(&[("A", 60), ("B", 20)]), 100, 60);
        assert!(!boundary.is_decided());
    }
    
    #[test]
    fn test_margin_above_remaining_is_decided() {
        let decision = early_decision(&votes(&[("A", 55), ("B", 35)]), 100, 90);
        assert_eq!(
            decision,
            Decision::Decided { winner: "A".into(), margin: 20, remaining: 10 }
        );
        assert_eq!(decision.winner(), Some("A"));
    }
    
    #[test]
    fn test_single_party() {
        assert!(early_decision(&votes(&[("A", 41)]), 100, 60).is_decided());
        assert!(!early_decision(&votes(&[("A", 40)]), 100, 60).is_decided());
        // Nothing left to count
        assert!(early_decision(&votes(&[("A", 1), ("B", 0)]), 100, 100).is_decided());
    }
    
    #[test]
    fn test_no_votes_is_open() {
        let decision = early_decision(&votes(&[("A", 0)]), 100, 0);
        assert_eq!(decision, Decision::Open { leader: None, margin: 0, remaining: 100 });
    }
    
    #[test]
    fn test_processed_beyond_electorate_saturates() {
        let decision = early_decision(&votes(&[("A", 5), ("B", 5)]), 100, 120);
        assert_eq!(decision.remaining(), 0);
        assert!(!decision.is_decided());
    }
    
    #[tokio::test]
    async fn test_client_submits_cumulative_parts() {
        let aggregator = Arc::new(MemoryAggregator::new(7));
        let mut client = AggregationClient::new(
            TokioContext::shared(),
            Arc::clone(&aggregator),
            fast_config(),
            100,
        );
        
        client.submit_region(&region("R1", 60, &[("A", 30), ("B", 12)])).await.unwrap();
        assert_eq!(client.serial(), Some(7));
        client.submit_region(&region("R2", 40, &[("A", 10), ("B", 16)])).await.unwrap();
        
        let parts = aggregator.submissions();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].election_part, 0);
        assert_eq!(parts[0].serial, None);
        assert!(parts[0].active);
        
        assert_eq!(parts[1].election_part, 1);
        assert_eq!(parts[1].serial, Some(7));
        assert_eq!(parts[1].total_population, 100);
        assert_eq!(parts[1].total_votes, 68);
        assert_eq!(parts[1].votes_by_party, votes(&[("A", 40), ("B", 28)]));
        assert!(!parts[1].active);
        assert_eq!(parts[1].total_possible_voters, 100);
        assert_eq!(client.next_part(), 2);
    }
    
    #[tokio::test]
    async fn test_client_retries_then_fails() {
        let aggregator = Arc::new(MemoryAggregator::new(1));
        aggregator.fail_next(2);
        let mut client = AggregationClient::new(TokioContext::shared(), Arc::clone(&aggregator), fast_config(), 10);
        
        // Two failures then success: within the attempt budget
        client.submit_region(&region("R1", 5, &[("A", 3)])).await.unwrap();
        
        aggregator.fail_next(3);
        let err = client.submit_region(&region("R2", 5, &[("A", 3)])).await.unwrap_err();
        assert!(matches!(err, AggregationError::SubmitFailure { attempts: 3, .. }));
        assert_eq!(client.next_part(), 1);
        
        // The failed region is still carried by the next part
        client.submit_region(&region("R3", 0, &[])).await.unwrap();
        let last = client.last_snapshot().unwrap();
        assert_eq!(last.election_part, 1);
        assert_eq!(last.total_votes, 6);
    }
    
    #[tokio::test]
    async fn test_missing_serial_on_part_zero() {
        let aggregator = Arc::new(MemoryAggregator::without_serials());
        let mut client = AggregationClient::new(TokioContext::shared(), aggregator, fast_config(), 10);
        let err = client.submit_region(&region("R1", 5, &[("A", 3)])).await.unwrap_err();
        assert!(matches!(err, AggregationError::MissingSerial));
        assert_eq!(client.serial(), None);
    }
    
    #[tokio::test]
    async fn test_standings_are_cached_for_ttl() {
        let aggregator = Arc::new(MemoryAggregator::new(1));
        let ctx = TokioContext::shared();
        let view = StandingsView::new(Arc::clone(&ctx), Arc::clone(&aggregator), Duration::from_millis(200));
        assert_eq!(view.standings().await.unwrap(), None);
        
        let mut client = AggregationClient::new(Arc::clone(&ctx), Arc::clone(&aggregator), fast_config(), 100);
        client.submit_region(&region("R1", 90, &[("A", 55), ("B", 35)])).await.unwrap();
        
        // Still the cached empty answer
        assert_eq!(view.standings().await.unwrap(), None);
        
        ctx.sleep(Duration::from_millis(250)).await;
        let decision = view.decision().await.unwrap().unwrap();
        assert_eq!(decision.winner(), Some("A"));
        assert_eq!(aggregator.queries(), 2);
    }
}
