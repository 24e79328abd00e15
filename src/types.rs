//! Shared primitive types used across the decision pipeline.

use serde::{Deserialize, Serialize};

/// Trade direction for scoring, triggers and open positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    /// The opposing trade direction (Neutral opposes nothing)
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Why an engine produced its safe-default result instead of a real one.
///
/// Detection engines never fail on bad market data; they return a neutral
/// result and record the cause here so callers (and tests) can tell a genuine
/// neutral reading apart from a degraded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Window too short or empty for the requested calculation
    InsufficientData,
    /// A required indicator could not be computed from the window
    MissingIndicator(String),
    /// Recovered from an unexpected internal error
    InternalError(String),
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradedReason::InsufficientData => write!(f, "insufficient data"),
            DegradedReason::MissingIndicator(name) => write!(f, "missing indicator: {}", name),
            DegradedReason::InternalError(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
        assert_eq!(Direction::Neutral.opposite(), Direction::Neutral);
    }
}
