//! Session phase and diagnostics types shared by the orchestrator and its observers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The observable phase of an assignment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Selected,
    Assigning,
    WaitingForInsertion,
    Calibrating,
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Selected => "selected",
            Phase::Assigning => "assigning",
            Phase::WaitingForInsertion => "waiting for insertion",
            Phase::Calibrating => "calibrating",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the device said to the primary assign call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    /// Filament settings applied immediately.
    Configured,
    /// Applied once a spool is inserted into the (empty) slot.
    Staged,
    /// Applied once the spool currently in the slot is swapped out.
    StagedReplace,
    /// Not applied. Calibration is still attempted.
    Error,
}

impl AssignOutcome {
    pub fn is_staged(self) -> bool {
        matches!(self, AssignOutcome::Staged | AssignOutcome::StagedReplace)
    }
}

/// Why the calibration step did or did not send anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationOutcome {
    /// Spool is not in inventory, so there is nothing to look up.
    SkippedNotInventoried,
    SkippedNoProfile,
    SkippedNegativeIndex { cali_idx: i32 },
    Applied { cali_idx: i32 },
    /// The device answered but refused the profile.
    Rejected { cali_idx: i32 },
    Failed { reason: String },
}

/// Best-effort outcomes recorded over the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDiagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<AssignOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationOutcome>,

    /// `Some(false)` when a cancel was sent but the device did not confirm it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_acknowledged: Option<bool>,

    #[serde(default)]
    pub device_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_is_lowercase_words() {
        assert_eq!(Phase::WaitingForInsertion.to_string(), "waiting for insertion");
        assert_eq!(Phase::Completed.to_string(), "completed");
    }

    #[test]
    fn staged_outcomes() {
        assert!(AssignOutcome::Staged.is_staged());
        assert!(AssignOutcome::StagedReplace.is_staged());
        assert!(!AssignOutcome::Configured.is_staged());
        assert!(!AssignOutcome::Error.is_staged());
    }

    #[test]
    fn calibration_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&CalibrationOutcome::Applied { cali_idx: 3 }).unwrap();
        assert!(json.contains("\"status\":\"applied\""));
        assert!(json.contains("\"cali_idx\":3"));
    }
}
