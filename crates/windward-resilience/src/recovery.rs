//! Progressive recovery escalation.
//!
//! Repeated recoveries within the reset window escalate SOFT_RESET →
//! MEDIUM_RESET → HARD_RESET → HUMAN_INTERVENTION and stay there; an hour
//! of quiet resets the ladder.

use serde::{Deserialize, Serialize};

use windward_core::constants::RECOVERY_RESET_SECS;
use windward_core::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryLevel {
    #[serde(rename = "SOFT_RESET")]
    SoftReset,
    #[serde(rename = "MEDIUM_RESET")]
    MediumReset,
    #[serde(rename = "HARD_RESET")]
    HardReset,
    #[serde(rename = "HUMAN_INTERVENTION")]
    HumanIntervention,
}

impl RecoveryLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryLevel::SoftReset => "SOFT_RESET",
            RecoveryLevel::MediumReset => "MEDIUM_RESET",
            RecoveryLevel::HardReset => "HARD_RESET",
            RecoveryLevel::HumanIntervention => "HUMAN_INTERVENTION",
        }
    }
}

/// The escalation ladder. Time flows in via the caller so the ladder stays
/// deterministic under test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryLadder {
    pub attempts: u32,
    pub last_recovery_time: Option<Timestamp>,
}

impl RecoveryLadder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted counters.
    pub fn from_state(attempts: u32, last_recovery_time: Option<Timestamp>) -> Self {
        Self { attempts, last_recovery_time }
    }

    /// True iff the quiet period has elapsed since the last recovery.
    pub fn should_reset(&self, now: Timestamp) -> bool {
        self.last_recovery_time
            .map(|t| now - t > RECOVERY_RESET_SECS)
            .unwrap_or(false)
    }

    /// Record one recovery at `now` and return the level to execute.
    pub fn determine_level(&mut self, now: Timestamp) -> RecoveryLevel {
        if self.should_reset(now) {
            self.attempts = 0;
        }
        self.attempts += 1;
        self.last_recovery_time = Some(now);
        match self.attempts {
            1 => RecoveryLevel::SoftReset,
            2 => RecoveryLevel::MediumReset,
            3 => RecoveryLevel::HardReset,
            _ => RecoveryLevel::HumanIntervention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_then_saturates() {
        let mut ladder = RecoveryLadder::new();
        let t0 = 1_000_000;
        assert_eq!(ladder.determine_level(t0), RecoveryLevel::SoftReset);
        assert_eq!(ladder.determine_level(t0 + 60), RecoveryLevel::MediumReset);
        assert_eq!(ladder.determine_level(t0 + 120), RecoveryLevel::HardReset);
        assert_eq!(ladder.determine_level(t0 + 180), RecoveryLevel::HumanIntervention);
        assert_eq!(
            ladder.determine_level(t0 + 240),
            RecoveryLevel::HumanIntervention,
            "no escalation past human intervention"
        );
    }

    #[test]
    fn quiet_hour_resets_the_ladder() {
        let mut ladder = RecoveryLadder::new();
        let t0 = 1_000_000;
        for i in 0..4 {
            ladder.determine_level(t0 + i * 10);
        }
        let later = t0 + 40 + RECOVERY_RESET_SECS + 1;
        assert_eq!(ladder.determine_level(later), RecoveryLevel::SoftReset);
    }

    #[test]
    fn exactly_at_the_window_does_not_reset() {
        let mut ladder = RecoveryLadder::new();
        let t0 = 500;
        ladder.determine_level(t0);
        assert_eq!(
            ladder.determine_level(t0 + RECOVERY_RESET_SECS),
            RecoveryLevel::MediumReset
        );
    }
}
