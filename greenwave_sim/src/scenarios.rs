//! Scenario catalog for the deterministic simulator.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Detection and directive carried over a chain of parked relays
    RelayChain,

    /// Congestion on one lane forces a phase change
    RushHour,

    /// Controller switched off, vehicles proceed with caution
    Blackout,

    /// Reporter cut off from its relays, then reconnected
    PartitionHeal,

    /// Timer policy alternates the controlling group
    TimerCycle,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::RelayChain,
            ScenarioId::RushHour,
            ScenarioId::Blackout,
            ScenarioId::PartitionHeal,
            ScenarioId::TimerCycle,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::RelayChain => "relay_chain",
            ScenarioId::RushHour => "rush_hour",
            ScenarioId::Blackout => "blackout",
            ScenarioId::PartitionHeal => "partition_heal",
            ScenarioId::TimerCycle => "timer_cycle",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::RelayChain => "Reporter 80 m out, three parked relays, detection in and directive back",
            ScenarioId::RushHour => "12 vehicles on lane 1/0, threshold policy must turn it GREEN",
            ScenarioId::Blackout => "Signals off for 14 s, vehicles slow down and never stop",
            ScenarioId::PartitionHeal => "Reporter partitioned for 5 s, queued detections retried after heal",
            ScenarioId::TimerCycle => "Timer policy, routes 1-3 and 4-6 alternate every 10 s",
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
            "relay_chain" | "relaychain" => Ok(ScenarioId::RelayChain),
            "rush_hour" | "rushhour" => Ok(ScenarioId::RushHour),
            "blackout" => Ok(ScenarioId::Blackout),
            "partition_heal" | "partitionheal" => Ok(ScenarioId::PartitionHeal),
            "timer_cycle" | "timercycle" => Ok(ScenarioId::TimerCycle),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
