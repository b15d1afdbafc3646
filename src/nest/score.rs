//! Trial scoring.

use serde::{Deserialize, Serialize};

use crate::payload::ContentCategory;

/// Multiplier applied when a payload ran but left the sandbox unhealthy.
const PENALTY_MULTIPLIER: u32 = 10;

/// Score awarded to a trial run.
pub type TrialScore = u32;

/// State of a sandbox after a payload ran, probed once by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Running, and the heartbeat is present
    Healthy,
    /// The runtime no longer reports the instance as running
    Unresponsive,
    /// Running, but the heartbeat is gone
    NoHeartbeat,
}

impl Liveness {
    pub fn from_probes(responding: bool, has_heart: Option<bool>) -> Self {
        match (responding, has_heart) {
            (false, _) => Liveness::Unresponsive,
            (true, Some(true)) => Liveness::Healthy,
            (true, _) => Liveness::NoHeartbeat,
        }
    }
}

fn base_value(category: ContentCategory) -> u32 {
    match category {
        ContentCategory::Python => 6,
        ContentCategory::Bash => 2,
        ContentCategory::Other => 10,
    }
}

/// A failed execution scores nothing. A successful one that left the sandbox
/// dead or heartless scores ten times the base value.
pub fn score(executed: bool, liveness: Liveness, category: ContentCategory) -> TrialScore {
    if !executed {
        return 0;
    }
    let base = base_value(category);
    match liveness {
        Liveness::Healthy => base,
        Liveness::Unresponsive | Liveness::NoHeartbeat => base * PENALTY_MULTIPLIER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_scores_base_value() {
        assert_eq!(score(true, Liveness::Healthy, ContentCategory::Python), 6);
        assert_eq!(score(true, Liveness::Healthy, ContentCategory::Bash), 2);
        assert_eq!(score(true, Liveness::Healthy, ContentCategory::Other), 10);
    }

    #[test]
    fn test_unresponsive_is_penalized() {
        assert_eq!(score(true, Liveness::Unresponsive, ContentCategory::Python), 60);
        assert_eq!(score(true, Liveness::Unresponsive, ContentCategory::Bash), 20);
        assert_eq!(score(true, Liveness::NoHeartbeat, ContentCategory::Other), 100);
    }

    #[test]
    fn test_failed_execution_scores_zero() {
        for liveness in [
            Liveness::Healthy,
            Liveness::Unresponsive,
            Liveness::NoHeartbeat,
        ] {
            for category in [
                ContentCategory::Python,
                ContentCategory::Bash,
                ContentCategory::Other,
            ] {
                assert_eq!(score(false, liveness, category), 0);
            }
        }
    }

    #[test]
    fn test_liveness_from_probes() {
        assert_eq!(Liveness::from_probes(true, Some(true)), Liveness::Healthy);
        assert_eq!(Liveness::from_probes(true, Some(false)), Liveness::NoHeartbeat);
        assert_eq!(Liveness::from_probes(false, None), Liveness::Unresponsive);
        // A stale heartbeat on a dead instance still counts as unresponsive
        assert_eq!(Liveness::from_probes(false, Some(true)), Liveness::Unresponsive);
    }
}
