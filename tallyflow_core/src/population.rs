//! The "POPULATION" Engine - splits the electorate across regions.
//!
//! Regions fall into three size tiers:
//! - **Large**: ⌈20%⌉ of the regions share 50% of the electorate
//! - **Medium**: ⌈30%⌉ of the regions share 30%
//! - **Small**: the remaining regions share whatever is left
//!
//! Each region receives its tier's mean share scaled by a uniform factor in
//! [0.8, 1.2], never more than what the tier still has. The region allocated
//! last absorbs the remainder so the split is exact.

use crate::error::SimulationError;
use rand::seq::SliceRandom;
use rand::Rng;

/// Variance applied to each region's mean share.
const SHARE_VARIANCE: std::ops::RangeInclusive<f64> = 0.8..=1.2;

/// How many regions land in each size tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPlan {
    pub large: usize,
    pub medium: usize,
    pub small: usize,
}

impl TierPlan {
    /// Computes the tier sizes for `regions` regions.
    ///
    /// Counts are clamped so tiny runs (one or two regions) still add up.
    pub fn for_regions(regions: usize) -> Self {
        let large = ((regions * 2 + 9) / 10).min(regions);
        let medium = ((regions * 3 + 9) / 10).min(regions - large);
        Self {
            large,
            medium,
            small: regions - large - medium,
        }
    }
}

/// Splits a total electorate across regions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationAllocator;

impl PopulationAllocator {
    pub fn new() -> Self {
        Self
    }
    
    /// Returns one population per region, summing exactly to `total`.
    ///
    /// # Errors
    /// * `NoRegions` when `regions == 0`
    /// * `InsufficientPopulation` when `total < regions`
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        total: u64,
        regions: usize,
        rng: &mut R,
    ) -> Result<Vec<u64>, SimulationError> {
        if regions == 0 {
            return Err(SimulationError::NoRegions);
        }
        if total < regions as u64 {
            return Err(SimulationError::InsufficientPopulation {
                population: total,
                regions,
            });
        }
        
        let plan = TierPlan::for_regions(regions);
        // (region count, budget in tenths of the electorate)
        let tiers = [(plan.large, 5u64), (plan.medium, 3u64), (plan.small, 2u64)];
        let last_tier = tiers.iter().rposition(|(count, _)| *count > 0).unwrap_or(0);
        
        let mut populations = Vec::with_capacity(regions);
        let mut allocated = 0u64;
        
        for (index, &(count, tenths)) in tiers.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let absorbs_remainder = index == last_tier;
            let budget = if absorbs_remainder {
                total - allocated
            } else {
                ((total as u128 * tenths as u128) / 10) as u64
            };
            
            let shares = fill_tier(count, budget, absorbs_remainder, rng);
            allocated += shares.iter().sum::<u64>();
            populations.extend(shares);
        }
        
        debug_assert_eq!(allocated, total);
        
        // Tiers must not be positionally obvious
        populations.shuffle(rng);
        Ok(populations)
    }
}

fn fill_tier<R: Rng + ?Sized>(
    count: usize,
    budget: u64,
    absorbs_remainder: bool,
    rng: &mut R,
) -> Vec<u64> {
    let mean = budget / count as u64;
    let mut remaining = budget;
    let mut shares = Vec::with_capacity(count);
    
    for i in 0..count {
        if absorbs_remainder && i == count - 1 {
            shares.push(remaining);
            remaining = 0;
            continue;
        }
        let scaled = (mean as f64 * rng.gen_range(SHARE_VARIANCE)).floor() as u64;
        let share = scaled.min(remaining);
        shares.push(share);
        remaining -= share;
    }
    
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    
    #[test]
    fn test_tier_plan_counts() {
        assert_eq!(TierPlan::for_regions(10), TierPlan { large: 2, medium: 3, small: 5 });
        assert_eq!(TierPlan::for_regions(5), TierPlan { large: 1, medium: 2, small: 2 });
        assert_eq!(TierPlan::for_regions(2), TierPlan { large: 1, medium: 1, small: 0 });
        assert_eq!(TierPlan::for_regions(1), TierPlan { large: 1, medium: 0, small: 0 });
    }
    
    #[test]
    fn test_allocation_sums_exactly() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for (total, regions) in [(10_000u64, 5usize), (1_000_000, 27), (7, 7), (13, 2), (99, 1)] {
            let pops = PopulationAllocator::new().allocate(total, regions, &mut rng).unwrap();
            assert_eq!(pops.len(), regions);
            assert_eq!(pops.iter().sum::<u64>(), total, "total={total} regions={regions}");
        }
    }
    
    #[test]
    fn test_insufficient_population() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = PopulationAllocator::new().allocate(3, 5, &mut rng).unwrap_err();
        assert_eq!(err, SimulationError::InsufficientPopulation { population: 3, regions: 5 });
    }
    
    #[test]
    fn test_zero_regions_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            PopulationAllocator::new().allocate(100, 0, &mut rng).unwrap_err(),
            SimulationError::NoRegions
        );
    }
    
    #[test]
    fn test_large_tier_dominates() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut pops = PopulationAllocator::new().allocate(1_000_000, 10, &mut rng).unwrap();
        pops.sort_unstable_by(|a, b| b.cmp(a));
        
        // Two large regions hold roughly half the electorate
        let top_two: u64 = pops[..2].iter().sum();
        assert!(top_two > 350_000 && top_two <= 500_000, "top_two={top_two}");
    }
    
    #[test]
    fn test_seeded_allocation_is_reproducible() {
        let a = PopulationAllocator::new()
            .allocate(50_000, 12, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        let b = PopulationAllocator::new()
            .allocate(50_000, 12, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);
    }
}
