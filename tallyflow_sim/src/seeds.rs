//! Deterministic seed provider for simulation.

/// Derives independent seeds for each simulated subsystem from one master
/// seed.
///
/// Seeds are:
/// - Deterministic: the same master seed always yields the same seeds
/// - Isolated: adding a subsystem does not shift any other seed
pub struct SeedProvider {
    master_seed: u64,
}

/// Subsystems that draw their own randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// The election model (population, bias, regions)
    Election,
    /// Sink fault injection
    SinkFaults,
    /// Scenario choreography (the order in which replayers walk the regions)
    Choreography,
}

impl Subsystem {
    fn salt(&self) -> u64 {
        match self {
            Subsystem::Election => 0x9e3779b97f4a7c15,
            Subsystem::SinkFaults => 0x517cc1b727220a95,
            Subsystem::Choreography => 0x3c6ef372fe94f82b,
        }
    }
}

impl SeedProvider {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }
    
    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }
    
    /// Seed for one subsystem.
    pub fn seed_for(&self, subsystem: Subsystem) -> u64 {
        mix(self.master_seed ^ subsystem.salt())
    }
}

/// splitmix64 finaliser
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}
