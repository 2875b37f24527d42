//! Session events: what the presentation layer listens to.
//!
//! The orchestrator and the poller publish here; screens subscribe and
//! render. Nothing in the state machine depends on anyone listening.

use crate::session::Phase;
use crate::slot::SlotAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A new session was opened with a freshly captured snapshot
    SessionOpened {
        session_id: Uuid,
        has_tag: bool,
        in_inventory: bool,
        timestamp: DateTime<Utc>,
    },

    PhaseChanged {
        session_id: Uuid,
        from: Phase,
        to: Phase,
        timestamp: DateTime<Utc>,
    },

    /// The device needs a spool inserted (or swapped) before it can finish
    InsertionRequested {
        session_id: Uuid,
        slot: SlotAddress,
        needs_replacement: bool,
        prompt: String,
        timestamp: DateTime<Utc>,
    },

    /// The waiting slot's RFID reader is active (presentation-only)
    SlotReading {
        session_id: Uuid,
        slot: SlotAddress,
        timestamp: DateTime<Utc>,
    },

    /// Assignment finished; the screen should show the summary and leave
    Completed {
        session_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    Failed {
        session_id: Uuid,
        slot: SlotAddress,
        timestamp: DateTime<Utc>,
    },

    /// A staged assignment was cancelled, by the user or by a timeout
    Cancelled {
        session_id: Uuid,
        slot: SlotAddress,
        device_acknowledged: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for session events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
