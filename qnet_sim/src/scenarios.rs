//! Reference protocols the simulator ships with.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// Charlie distributes a Bell pair, Alice encodes two bits, Bob decodes
    Superdense,

    /// Charlie distributes a Bell pair, Alice teleports her qubit to Bob
    Teleportation,

    /// 100 classical bits bounced over a 5 km link
    PingPong,

    /// Qubits sent over a long lossy fiber
    LossyLink,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Superdense,
            ScenarioId::Teleportation,
            ScenarioId::PingPong,
            ScenarioId::LossyLink,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Superdense => "superdense",
            ScenarioId::Teleportation => "teleportation",
            ScenarioId::PingPong => "ping_pong",
            ScenarioId::LossyLink => "lossy_link",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Superdense => "Superdense coding of two classical bits through one qubit",
            ScenarioId::Teleportation => "Teleport one qubit using a shared Bell pair and two classical bits",
            ScenarioId::PingPong => "50 classical round trips, verify accumulated link delay",
            ScenarioId::LossyLink => "32 qubits over 100 km of fiber, verify loss bookkeeping",
        }
    }

    /// Returns true if the scenario uses lossy devices.
    pub fn is_lossy(&self) -> bool {
        matches!(self, ScenarioId::LossyLink)
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
            "superdense" | "superdense_coding" => Ok(ScenarioId::Superdense),
            "teleportation" | "teleport" => Ok(ScenarioId::Teleportation),
            "ping_pong" | "pingpong" => Ok(ScenarioId::PingPong),
            "lossy_link" | "lossylink" | "lossy" => Ok(ScenarioId::LossyLink),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("PingPong".parse::<ScenarioId>().unwrap(), ScenarioId::PingPong);
        assert_eq!("teleport".parse::<ScenarioId>().unwrap(), ScenarioId::Teleportation);
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_only_lossy_link_is_lossy() {
        let lossy: Vec<ScenarioId> = ScenarioId::all().into_iter().filter(|s| s.is_lossy()).collect();
        assert_eq!(lossy, vec![ScenarioId::LossyLink]);
    }
}
