//! The "DISTRIBUTION" Engine - exact per-party vote counts for one region.
//!
//! # Pipeline
//!
//! ```text
//! bias × local influence × U[0.1, 4.0]      popularity weights
//!         │
//!         ▼
//! Dirichlet(popularity) × 100               vote shares (%)
//!         │  reconcile to exactly 100.00
//!         ▼
//! round(effective × share / 100)            raw counts
//!         │  + N(0, 0.15 × raw), floored at 0
//!         ▼
//! ±1 at shuffled parties                    sum == effective population
//! ```

use crate::bias::BiasVector;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Dirichlet, Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shares are reconciled in hundredths of a percent.
const FULL_SHARE_CENTS: i64 = 10_000;

/// Ranges of the regional draws.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub local_influence: (f64, f64),
    /// Chance that one party dominates the region
    pub dominant_probability: f64,
    pub dominant_boost: (f64, f64),
    pub popularity_factor: (f64, f64),
    /// Gaussian noise standard deviation, relative to the raw count
    pub noise_ratio: f64,
    /// Last-minute events (weather, scandals) shift turnout
    pub turnout_shock: (f64, f64),
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            local_influence: (0.7, 1.3),
            dominant_probability: 0.3,
            dominant_boost: (1.3, 1.8),
            popularity_factor: (0.1, 4.0),
            noise_ratio: 0.15,
            turnout_shock: (0.95, 1.05),
        }
    }
}

/// A region awaiting its vote draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub population: u64,
    /// One multiplicative factor per party
    pub local_influence: Vec<f64>,
}

/// Final tally of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    pub name: String,
    pub population: u64,
    /// Turnout-adjusted population; always the exact sum of the votes
    pub effective_population: u64,
    pub votes_by_party: BTreeMap<String, u64>,
    /// `None` when nobody voted
    pub winner: Option<String>,
    pub winner_percentage: f64,
}

impl RegionResult {
    /// Sum of all party votes.
    pub fn total_votes(&self) -> u64 {
        self.votes_by_party.values().sum()
    }
}

/// Turns a region plus the run bias into exact vote counts.
#[derive(Debug, Clone, Default)]
pub struct VoteDistributor {
    config: DistributionConfig,
}

impl VoteDistributor {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }
    
    /// Draws the local influence vector of a region.
    pub fn draw_region<R: Rng + ?Sized>(
        &self,
        name: impl Into<String>,
        population: u64,
        parties: usize,
        rng: &mut R,
    ) -> Region {
        let cfg = &self.config;
        let mut local_influence: Vec<f64> = (0..parties)
            .map(|_| rng.gen_range(cfg.local_influence.0..=cfg.local_influence.1))
            .collect();
        
        if parties > 0 && rng.gen_bool(cfg.dominant_probability) {
            let dominant = rng.gen_range(0..parties);
            local_influence[dominant] *= rng.gen_range(cfg.dominant_boost.0..=cfg.dominant_boost.1);
        }
        
        Region {
            name: name.into(),
            population,
            local_influence,
        }
    }
    
    /// Produces the region's tally. `parties`, the bias vector and the local
    /// influence vector must have the same length.
    pub fn distribute<R: Rng + ?Sized>(
        &self,
        region: &Region,
        bias: &BiasVector,
        parties: &[String],
        turnout: f64,
        rng: &mut R,
    ) -> RegionResult {
        debug_assert_eq!(bias.len(), parties.len());
        debug_assert_eq!(region.local_influence.len(), parties.len());
        let cfg = &self.config;
        
        let effective_population = self.effective_population(region.population, turnout, rng);
        
        // Local influence applies on top of the run bias
        let popularity: Vec<f64> = bias
            .weights()
            .iter()
            .zip(&region.local_influence)
            .map(|(b, local)| {
                b * local * rng.gen_range(cfg.popularity_factor.0..=cfg.popularity_factor.1)
            })
            .collect();
        
        let cents = self.share_cents(&popularity, rng);
        let raw = raw_counts(effective_population, &cents);
        let mut votes = self.add_noise(&raw, rng);
        reconcile_votes(&mut votes, effective_population, rng);
        
        build_result(region, effective_population, parties, &votes)
    }
    
    /// Pre-noise vote shares in percent, summing to exactly 100.00.
    pub fn vote_shares<R: Rng + ?Sized>(&self, popularity: &[f64], rng: &mut R) -> Vec<f64> {
        self.share_cents(popularity, rng)
            .into_iter()
            .map(|c| c as f64 / 100.0)
            .collect()
    }
    
    fn effective_population<R: Rng + ?Sized>(&self, population: u64, turnout: f64, rng: &mut R) -> u64 {
        let shock = rng.gen_range(self.config.turnout_shock.0..=self.config.turnout_shock.1);
        let effective = (population as f64 * turnout * shock).round();
        (effective.max(0.0) as u64).min(population)
    }
    
    fn share_cents<R: Rng + ?Sized>(&self, popularity: &[f64], rng: &mut R) -> Vec<i64> {
        let fractions = dirichlet_fractions(popularity, rng);
        let mut cents: Vec<i64> = fractions
            .iter()
            .map(|f| (f * FULL_SHARE_CENTS as f64).round() as i64)
            .collect();
        
        let residual = FULL_SHARE_CENTS - cents.iter().sum::<i64>();
        spread_residual(&mut cents, residual, rng);
        cents
    }
    
    fn add_noise<R: Rng + ?Sized>(&self, raw: &[u64], rng: &mut R) -> Vec<u64> {
        raw.iter()
            .map(|&count| {
                let mean = count as f64;
                match Normal::new(mean, mean * self.config.noise_ratio) {
                    Ok(normal) => normal.sample(rng).round().max(0.0) as u64,
                    Err(_) => count,
                }
            })
            .collect()
    }
}

/// Samples Dirichlet fractions, falling back to the normalised weights when
/// the draw degenerates (a lone party, or every gamma draw underflowing).
fn dirichlet_fractions<R: Rng + ?Sized>(popularity: &[f64], rng: &mut R) -> Vec<f64> {
    if popularity.len() == 1 {
        return vec![1.0];
    }
    
    if let Ok(dirichlet) = Dirichlet::new(popularity) {
        let sample: Vec<f64> = dirichlet.sample(rng);
        let total: f64 = sample.iter().sum();
        if total.is_finite() && total > 0.0 && sample.iter().all(|s| s.is_finite()) {
            return sample.into_iter().map(|s| s / total).collect();
        }
    }
    
    let total: f64 = popularity.iter().sum();
    if total > 0.0 {
        popularity.iter().map(|p| p / total).collect()
    } else {
        vec![1.0 / popularity.len() as f64; popularity.len()]
    }
}

/// Moves `residual` units (either sign) across shuffled slots, one unit per
/// slot per round, never taking a slot below zero.
fn spread_residual<R: Rng + ?Sized>(slots: &mut [i64], mut residual: i64, rng: &mut R) {
    let mut order: Vec<usize> = (0..slots.len()).collect();
    while residual != 0 {
        order.shuffle(rng);
        let mut moved = false;
        for &i in &order {
            if residual == 0 {
                break;
            }
            if residual > 0 {
                slots[i] += 1;
                residual -= 1;
                moved = true;
            } else if slots[i] > 0 {
                slots[i] -= 1;
                residual += 1;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

fn raw_counts(effective_population: u64, cents: &[i64]) -> Vec<u64> {
    cents
        .iter()
        .map(|&c| {
            let scaled = effective_population as u128 * c.max(0) as u128;
            ((scaled + FULL_SHARE_CENTS as u128 / 2) / FULL_SHARE_CENTS as u128) as u64
        })
        .collect()
}

/// Final pass: ±1 vote at shuffled parties until the total is exact.
fn reconcile_votes<R: Rng + ?Sized>(votes: &mut [u64], target: u64, rng: &mut R) {
    let current: u64 = votes.iter().sum();
    let mut slots: Vec<i64> = votes.iter().map(|&v| v as i64).collect();
    spread_residual(&mut slots, target as i64 - current as i64, rng);
    for (vote, slot) in votes.iter_mut().zip(slots) {
        *vote = slot as u64;
    }
}

fn build_result(
    region: &Region,
    effective_population: u64,
    parties: &[String],
    votes: &[u64],
) -> RegionResult {
    let total: u64 = votes.iter().sum();
    
    // First party in run order wins ties
    let (winner, winner_percentage) = match votes
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, u64)>, (i, &v)| match best {
            Some((_, top)) if top >= v => best,
            _ => Some((i, v)),
        }) {
        Some((i, v)) if total > 0 => {
            let pct = (v as f64 / total as f64 * 10_000.0).round() / 100.0;
            (Some(parties[i].clone()), pct)
        }
        _ => (None, 0.0),
    };
    
    RegionResult {
        name: region.name.clone(),
        population: region.population,
        effective_population,
        votes_by_party: parties.iter().cloned().zip(votes.iter().copied()).collect(),
        winner,
        winner_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    
    fn parties(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("P{}", i)).collect()
    }
    
    #[test]
    fn test_region_influence_ranges() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let distributor = VoteDistributor::default();
        for _ in 0..50 {
            let region = distributor.draw_region("R", 100, 4, &mut rng);
            assert_eq!(region.local_influence.len(), 4);
            // 0.7 floor, 1.3 × 1.8 ceiling with a dominant party
            assert!(region.local_influence.iter().all(|f| *f >= 0.7 && *f <= 1.3 * 1.8));
        }
    }
    
    #[test]
    fn test_votes_sum_to_effective_population() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let distributor = VoteDistributor::default();
        let names = parties(5);
        let bias = BiasVector::from_weights(vec![1.0, 2.5, 0.3, 1.1, 0.8]);
        
        for population in [0u64, 1, 17, 1_000, 250_000] {
            let region = distributor.draw_region("Region 1", population, 5, &mut rng);
            let result = distributor.distribute(&region, &bias, &names, 0.7, &mut rng);
            assert_eq!(result.total_votes(), result.effective_population);
            assert!(result.effective_population <= population);
        }
    }
    
    #[test]
    fn test_effective_population_tracks_turnout() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let distributor = VoteDistributor::default();
        let names = parties(2);
        let bias = BiasVector::from_weights(vec![1.0, 1.0]);
        let region = distributor.draw_region("R", 10_000, 2, &mut rng);
        let result = distributor.distribute(&region, &bias, &names, 0.7, &mut rng);
        
        // 0.7 × [0.95, 1.05]
        assert!((6_650..=7_350).contains(&result.effective_population));
    }
    
    #[test]
    fn test_full_turnout_is_clamped() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let distributor = VoteDistributor::default();
        let names = parties(3);
        let bias = BiasVector::from_weights(vec![1.0, 1.0, 1.0]);
        for _ in 0..20 {
            let region = distributor.draw_region("R", 500, 3, &mut rng);
            let result = distributor.distribute(&region, &bias, &names, 1.0, &mut rng);
            assert!(result.effective_population <= 500);
            assert_eq!(result.total_votes(), result.effective_population);
        }
    }
    
    #[test]
    fn test_vote_shares_sum_to_hundred() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let distributor = VoteDistributor::default();
        for weights in [vec![0.01, 0.02, 0.005], vec![3.0, 12.0], vec![0.5; 9]] {
            let shares = distributor.vote_shares(&weights, &mut rng);
            assert_eq!(shares.len(), weights.len());
            assert_abs_diff_eq!(shares.iter().sum::<f64>(), 100.0, epsilon = 0.01);
            assert!(shares.iter().all(|s| *s >= 0.0));
        }
    }
    
    #[test]
    fn test_single_party_takes_everything() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let distributor = VoteDistributor::default();
        let names = parties(1);
        let bias = BiasVector::from_weights(vec![1.0]);
        let region = distributor.draw_region("Solo", 1_000, 1, &mut rng);
        let result = distributor.distribute(&region, &bias, &names, 0.7, &mut rng);
        
        assert_eq!(result.votes_by_party["P0"], result.effective_population);
        assert_eq!(result.winner.as_deref(), Some("P0"));
        assert_abs_diff_eq!(result.winner_percentage, 100.0);
    }
    
    #[test]
    fn test_empty_region_has_no_winner() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let distributor = VoteDistributor::default();
        let names = parties(3);
        let bias = BiasVector::from_weights(vec![1.0, 1.0, 1.0]);
        let region = distributor.draw_region("Ghost town", 0, 3, &mut rng);
        let result = distributor.distribute(&region, &bias, &names, 0.7, &mut rng);
        
        assert_eq!(result.total_votes(), 0);
        assert!(result.winner.is_none());
        assert_eq!(result.winner_percentage, 0.0);
    }
    
    #[test]
    fn test_spread_residual_never_goes_negative() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut slots = vec![0, 3, 0, 1];
        spread_residual(&mut slots, -4, &mut rng);
        assert_eq!(slots, vec![0, 0, 0, 0]);
        
        let mut slots = vec![0, 0];
        spread_residual(&mut slots, 5, &mut rng);
        assert_eq!(slots.iter().sum::<i64>(), 5);
    }
    
    #[test]
    fn test_winner_is_argmax() {
        let region = Region { name: "R".into(), population: 10, local_influence: vec![1.0; 3] };
        let result = build_result(&region, 10, &parties(3), &[2, 5, 3]);
        assert_eq!(result.winner.as_deref(), Some("P1"));
        assert_abs_diff_eq!(result.winner_percentage, 50.0);
        
        // Ties go to the first party
        let result = build_result(&region, 10, &parties(3), &[4, 4, 2]);
        assert_eq!(result.winner.as_deref(), Some("P0"));
    }
}
