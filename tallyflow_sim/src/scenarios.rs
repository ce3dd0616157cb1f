//! Fault scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: healthy sink, full run, exact delivery
    Baseline,
    
    /// DST-002: 30% of sends fail at random
    FlakySink,
    
    /// DST-003: broker down for the first half of the regions
    SinkOutage,
    
    /// DST-004: every voter votes again, concurrently, plus unknown candidates
    DuplicateStorm,
    
    /// DST-005: pipeline dies with batches in the retry log and restarts
    RestartRecovery,
    
    /// DST-006: partial submissions until the winner is mathematically decided
    EarlyCall,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::FlakySink,
            ScenarioId::SinkOutage,
            ScenarioId::DuplicateStorm,
            ScenarioId::RestartRecovery,
            ScenarioId::EarlyCall,
        ]
    }
    
    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::FlakySink => "flaky_sink",
            ScenarioId::SinkOutage => "sink_outage",
            ScenarioId::DuplicateStorm => "duplicate_storm",
            ScenarioId::RestartRecovery => "restart_recovery",
            ScenarioId::EarlyCall => "early_call",
        }
    }
    
    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Healthy sink: every generated vote delivered exactly once",
            ScenarioId::FlakySink => "30% random delivery failures, recovered by retry sweeps",
            ScenarioId::SinkOutage => "Broker outage for half the run, reconnect and drain the retry log",
            ScenarioId::DuplicateStorm => "Concurrent replays of every voter and unknown candidates",
            ScenarioId::RestartRecovery => "Pipeline restart with a populated retry log and durable registry",
            ScenarioId::EarlyCall => "Cumulative parts with aggregator faults, sound early decision",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "dst-001" => Ok(ScenarioId::Baseline),
            "flaky_sink" | "flakysink" | "dst-002" => Ok(ScenarioId::FlakySink),
            "sink_outage" | "sinkoutage" | "dst-003" => Ok(ScenarioId::SinkOutage),
            "duplicate_storm" | "duplicatestorm" | "dst-004" => Ok(ScenarioId::DuplicateStorm),
            "restart_recovery" | "restartrecovery" | "dst-005" => Ok(ScenarioId::RestartRecovery),
            "early_call" | "earlycall" | "dst-006" => Ok(ScenarioId::EarlyCall),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert_eq!("DST-004".parse::<ScenarioId>().unwrap(), ScenarioId::DuplicateStorm);
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
