//! The "BIAS" Engine - run-level campaign effects.
//!
//! Every party starts from a base weight drawn uniformly from [0.1, 3.0]. Four
//! campaign effects may then fire, once each, in this fixed order on the same
//! vector:
//!
//! 1. **Momentum wave** (30%): one party ×[1.5, 2.5]
//! 2. **Spillover** (20%, only after momentum): a second party ×[1.1, 1.3]
//! 3. **Negative campaigning** (40%): 1-3 distinct parties ×[0.6, 0.9]
//! 4. **Late swing** (15%): 5-15% of one party's current weight moves to another
//!
//! The resulting [`BiasVector`] is read-only. Regional influence is applied on
//! top of it by the distributor and never replaces it.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Probabilities and ranges of the campaign effects.
#[derive(Debug, Clone)]
pub struct BiasConfig {
    pub base_weight: (f64, f64),
    pub momentum_probability: f64,
    pub momentum_factor: (f64, f64),
    pub spillover_probability: f64,
    pub spillover_factor: (f64, f64),
    pub negative_probability: f64,
    /// Upper bound on parties hit by one negative campaign
    pub negative_max_targets: usize,
    pub negative_factor: (f64, f64),
    pub late_swing_probability: f64,
    pub late_swing_fraction: (f64, f64),
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            base_weight: (0.1, 3.0),
            momentum_probability: 0.3,
            momentum_factor: (1.5, 2.5),
            spillover_probability: 0.2,
            spillover_factor: (1.1, 1.3),
            negative_probability: 0.4,
            negative_max_targets: 3,
            negative_factor: (0.6, 0.9),
            late_swing_probability: 0.15,
            late_swing_fraction: (0.05, 0.15),
        }
    }
}

/// Which effects fired during a run, for logs and exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignEffects {
    /// (party index, factor)
    pub momentum: Option<(usize, f64)>,
    pub spillover: Option<(usize, f64)>,
    pub negative: Vec<(usize, f64)>,
    /// (from, to, weight moved)
    pub late_swing: Option<(usize, usize, f64)>,
}

/// Per-party multiplicative weights for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasVector {
    weights: Vec<f64>,
    effects: CampaignEffects,
}

impl BiasVector {
    /// Wraps explicit weights (no effects recorded).
    pub fn from_weights(weights: Vec<f64>) -> Self {
        Self {
            weights,
            effects: CampaignEffects::default(),
        }
    }
    
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    
    pub fn effects(&self) -> &CampaignEffects {
        &self.effects
    }
    
    pub fn len(&self) -> usize {
        self.weights.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Draws the run-level bias vector.
#[derive(Debug, Clone, Default)]
pub struct BiasModel {
    config: BiasConfig,
}

impl BiasModel {
    pub fn new(config: BiasConfig) -> Self {
        Self { config }
    }
    
    /// Produces the bias vector for `parties` parties.
    pub fn draw<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> BiasVector {
        let cfg = &self.config;
        let mut weights: Vec<f64> = (0..parties)
            .map(|_| rng.gen_range(cfg.base_weight.0..=cfg.base_weight.1))
            .collect();
        let mut effects = CampaignEffects::default();
        
        if parties == 0 {
            return BiasVector { weights, effects };
        }
        
        // Momentum wave, possibly spilling over to a neighbour
        if rng.gen_bool(cfg.momentum_probability) {
            let leader = rng.gen_range(0..parties);
            let factor = rng.gen_range(cfg.momentum_factor.0..=cfg.momentum_factor.1);
            weights[leader] *= factor;
            effects.momentum = Some((leader, factor));
            
            if parties > 1 && rng.gen_bool(cfg.spillover_probability) {
                let second = distinct_index(parties, leader, rng);
                let factor = rng.gen_range(cfg.spillover_factor.0..=cfg.spillover_factor.1);
                weights[second] *= factor;
                effects.spillover = Some((second, factor));
            }
        }
        
        // Negative campaigning
        if rng.gen_bool(cfg.negative_probability) {
            let targets = rng.gen_range(1..=cfg.negative_max_targets.max(1)).min(parties);
            for target in index::sample(rng, parties, targets).into_iter() {
                let factor = rng.gen_range(cfg.negative_factor.0..=cfg.negative_factor.1);
                weights[target] *= factor;
                effects.negative.push((target, factor));
            }
        }
        
        // Late swing between two distinct parties
        if parties > 1 && rng.gen_bool(cfg.late_swing_probability) {
            let from = rng.gen_range(0..parties);
            let to = distinct_index(parties, from, rng);
            let fraction = rng.gen_range(cfg.late_swing_fraction.0..=cfg.late_swing_fraction.1);
            let moved = weights[from] * fraction;
            weights[from] -= moved;
            weights[to] += moved;
            effects.late_swing = Some((from, to, moved));
        }
        
        BiasVector { weights, effects }
    }
}

/// Uniform index in `0..len` different from `exclude`. Requires `len >= 2`.
fn distinct_index<R: Rng + ?Sized>(len: usize, exclude: usize, rng: &mut R) -> usize {
    let pick = rng.gen_range(0..len - 1);
    if pick >= exclude {
        pick + 1
    } else {
        pick
    }
}
