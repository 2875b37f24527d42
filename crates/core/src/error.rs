//! Error types for the SpoolSync domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Device-layer failures have their own bounded-context error which the
//! session taxonomy wraps as `DeviceComm`.

use crate::session::Phase;
use crate::slot::SlotAddress;
use thiserror::Error;

/// The error taxonomy surfaced by the assignment orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Something required for the assignment is missing: no slot selected,
    /// no tag data, an uncatalogued spool, or an unresolvable device serial.
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("No printer selected")]
    NoDeviceSelected,

    #[error("Slot {0} has no bit position on any known topology")]
    UnaddressableSlot(SlotAddress),

    #[error("Device communication error: {0}")]
    DeviceComm(#[from] DeviceError),

    /// A completion event arrived that no waiting session is interested in.
    #[error("No waiting assignment matches the completion event for {serial} {slot}")]
    NoMatchingWait { serial: String, slot: SlotAddress },

    #[error("Cannot {action} while {phase}")]
    InvalidTransition { phase: Phase, action: &'static str },

    #[error("Session runtime has stopped")]
    RuntimeStopped,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("Request failed: {message} (status: {status_code})")]
    Http { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_displays_correctly() {
        let err = Error::DeviceComm(DeviceError::Http {
            status_code: 503,
            message: "printer offline".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("printer offline"));
    }

    #[test]
    fn unaddressable_slot_names_the_slot() {
        let err = Error::UnaddressableSlot(SlotAddress::new(7, 0));
        assert!(err.to_string().contains("Slot 1"));
    }

    #[test]
    fn invalid_transition_mentions_phase_and_action() {
        let err = Error::InvalidTransition {
            phase: Phase::WaitingForInsertion,
            action: "select a slot",
        };
        let msg = err.to_string();
        assert!(msg.contains("select a slot"));
        assert!(msg.contains("waiting for insertion"));
    }
}
