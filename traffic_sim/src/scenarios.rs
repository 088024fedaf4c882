//! Fault scenarios for the lock-step harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// No faults; the orchestrator mirrors both partitions every tick
    Baseline,

    /// Every unordered message is delivered twice
    DuplicateDelivery,

    /// Visible messages handed out in random order, each stored twice
    ReorderedDelivery,

    /// Worker deltas arrive one tick late
    LateDelivery,

    /// Malformed and unknown messages on every channel
    PoisonMessage,

    /// Workers start without a bundle and wait for `Initialize`
    ColdStart,

    /// Receive and publish calls fail for a few ticks
    TransientOutage,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::DuplicateDelivery,
            ScenarioId::ReorderedDelivery,
            ScenarioId::LateDelivery,
            ScenarioId::PoisonMessage,
            ScenarioId::ColdStart,
            ScenarioId::TransientOutage,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::DuplicateDelivery => "duplicate_delivery",
            ScenarioId::ReorderedDelivery => "reordered_delivery",
            ScenarioId::LateDelivery => "late_delivery",
            ScenarioId::PoisonMessage => "poison_message",
            ScenarioId::ColdStart => "cold_start",
            ScenarioId::TransientOutage => "transient_outage",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "No faults, orchestrator state equals worker partitions after every tick",
            ScenarioId::DuplicateDelivery => "Every tick and delta delivered twice, state still converges",
            ScenarioId::ReorderedDelivery => "Shuffled and duplicated delivery, per-entity state still converges",
            ScenarioId::LateDelivery => "Deltas delayed past the drain, applied late and counted",
            ScenarioId::PoisonMessage => "Garbage and unknown events discarded without stalling any loop",
            ScenarioId::ColdStart => "Workers bootstrap from Initialize, earlier ticks dropped",
            ScenarioId::TransientOutage => "Injected channel failures, loops back off and recover",
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
        match s.to_lowercase().replace('-', "_").as_str() {
            "baseline" => Ok(ScenarioId::Baseline),
            "duplicate_delivery" | "duplicates" => Ok(ScenarioId::DuplicateDelivery),
            "reordered_delivery" | "reordered" | "shuffle" => Ok(ScenarioId::ReorderedDelivery),
            "late_delivery" | "late" => Ok(ScenarioId::LateDelivery),
            "poison_message" | "poison" => Ok(ScenarioId::PoisonMessage),
            "cold_start" => Ok(ScenarioId::ColdStart),
            "transient_outage" | "outage" => Ok(ScenarioId::TransientOutage),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
