//! The assignment session owned by the orchestrator.

use chrono::{DateTime, Utc};
use spoolsync_core::{DeviceHandle, EventKey, Phase, SessionDiagnostics, SlotAddress, TagSnapshot};
use tokio::time::Instant;
use uuid::Uuid;

/// The slot/device pair a staged assignment is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingTarget {
    pub slot: SlotAddress,
    pub device: DeviceHandle,
    pub device_serial: String,
    /// Completion events older than this belong to someone else.
    pub since: DateTime<Utc>,
    /// The slot already holds a spool that must be swapped out.
    pub needs_replacement: bool,
    /// Monotonic entry time, for the insertion timeout.
    pub entered_at: Instant,
}

/// Session state. The waiting target only exists inside its variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Selected,
    Assigning,
    WaitingForInsertion(WaitingTarget),
    Calibrating,
    Completed,
    Failed,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::Selected => Phase::Selected,
            SessionState::Assigning => Phase::Assigning,
            SessionState::WaitingForInsertion(_) => Phase::WaitingForInsertion,
            SessionState::Calibrating => Phase::Calibrating,
            SessionState::Completed => Phase::Completed,
            SessionState::Failed => Phase::Failed,
        }
    }

    pub fn waiting_target(&self) -> Option<&WaitingTarget> {
        match self {
            SessionState::WaitingForInsertion(target) => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentSession {
    pub id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub selected: Option<SlotAddress>,
    pub snapshot: TagSnapshot,
    pub state: SessionState,
    /// Set once the session completes.
    pub summary: Option<String>,
    pub diagnostics: SessionDiagnostics,
    pub(crate) last_consumed: Option<EventKey>,
}

impl AssignmentSession {
    pub fn new(snapshot: TagSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            selected: None,
            snapshot,
            state: SessionState::Idle,
            summary: None,
            diagnostics: SessionDiagnostics::default(),
            last_consumed: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }
}
