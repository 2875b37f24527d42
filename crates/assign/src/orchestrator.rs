//! Assignment orchestrator: the session state machine.
//!
//! ```text
//!   Idle ──select──▶ Selected ──submit──▶ Assigning ──configured/error──▶ Calibrating ──▶ Completed
//!                                             │
//!                                             └──staged──▶ WaitingForInsertion ──completion ok──▶ Calibrating
//!                                                             │        │
//!                                                  cancel ◀───┘        └──completion failed──▶ Failed
//! ```
//!
//! Every transition is published on the [`EventBus`]. Device calls made on
//! the way (calibration, staging clear, cancel) are best-effort: their
//! failures land in the session diagnostics and never change the result.

use crate::session::{AssignmentSession, SessionState, WaitingTarget};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spoolsync_config::SessionConfig;
use spoolsync_core::tag;
use spoolsync_core::{
    AssignOutcome, CalibrationOutcome, Collaborators, CompletionEvent, DeviceHandle, Error,
    EventBus, Phase, Result, SessionDiagnostics, SessionEvent, SlotAddress, TagSnapshot,
    TrayCalibration,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Orchestrator policy knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub nozzle_diameter: String,
    /// Auto-cancel a staged assignment after this long. `None` waits forever.
    pub insertion_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            nozzle_diameter: config.nozzle_diameter.clone(),
            insertion_timeout: config.insertion_timeout(),
        }
    }
}

/// What a successful `submit()` led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Assigned (or failed to assign) and calibrated in one go.
    Completed { summary: String },
    /// The device staged the assignment; a spool must be inserted.
    Waiting { slot: SlotAddress, needs_replacement: bool },
    /// Submit while waiting acts as cancel.
    Cancelled(CancelOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub slot: SlotAddress,
    /// Whether the device confirmed the cancel. Local state is cleared either way.
    pub device_acknowledged: bool,
}

pub struct AssignmentOrchestrator {
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    session: AssignmentSession,
    events: Arc<EventBus>,
}

impl AssignmentOrchestrator {
    /// Create an orchestrator with an empty (no tag) session.
    pub fn new(
        collaborators: Collaborators,
        settings: OrchestratorSettings,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            collaborators,
            settings,
            session: AssignmentSession::new(TagSnapshot::empty()),
            events,
        }
    }

    /// Start a fresh session from whatever tag is currently staged.
    ///
    /// A session still waiting for insertion is cancelled on the device first.
    pub async fn open_session(&mut self) -> &TagSnapshot {
        if self.session.state.waiting_target().is_some() {
            info!(session_id = %self.session.id, "Reopening while waiting, cancelling staged assignment");
            let _ = self.cancel_wait().await;
        }

        let snapshot = tag::capture(
            self.collaborators.tags.as_ref(),
            self.collaborators.catalog.as_ref(),
        )
        .await;
        self.session = AssignmentSession::new(snapshot);

        info!(
            session_id = %self.session.id,
            tag_id = %self.session.snapshot.tag_id,
            in_inventory = self.session.snapshot.in_inventory,
            "Session opened"
        );
        self.events.publish(SessionEvent::SessionOpened {
            session_id: self.session.id,
            has_tag: !self.session.snapshot.is_empty(),
            in_inventory: self.session.snapshot.in_inventory,
            timestamp: Utc::now(),
        });

        &self.session.snapshot
    }

    /// Choose the target slot, replacing any previous choice.
    pub fn select(&mut self, slot: SlotAddress) -> Result<()> {
        match self.session.state {
            SessionState::Idle | SessionState::Selected | SessionState::Failed => {
                debug!(session_id = %self.session.id, slot = %slot, "Slot selected");
                self.session.selected = Some(slot);
                self.transition(SessionState::Selected);
                Ok(())
            }
            _ => Err(self.invalid("select a slot")),
        }
    }

    /// Assign the snapshot's spool to the selected slot.
    ///
    /// While waiting for insertion this cancels instead.
    pub async fn submit(&mut self) -> Result<SubmitOutcome> {
        match self.session.state {
            SessionState::Idle | SessionState::Selected | SessionState::Failed => {}
            SessionState::WaitingForInsertion(_) => {
                return self.cancel().await.map(SubmitOutcome::Cancelled);
            }
            _ => return Err(self.invalid("submit")),
        }

        let slot = self
            .session
            .selected
            .ok_or_else(|| Error::MissingData("no slot selected".into()))?;

        let snapshot = &self.session.snapshot;
        if snapshot.is_empty() {
            return Err(Error::MissingData("no tag data".into()));
        }
        if !snapshot.is_assignable() {
            return Err(Error::MissingData("spool is not in inventory".into()));
        }

        slot.bit_position()?;

        let device = self
            .collaborators
            .directory
            .selected_device()
            .await
            .ok_or(Error::NoDeviceSelected)?;
        let serial = match self.collaborators.directory.device_info(device).await {
            Ok(info) if !info.serial.is_empty() => info.serial,
            Ok(_) => return Err(Error::MissingData("printer has no serial".into())),
            Err(e) => {
                warn!(error = %e, "Printer lookup failed");
                return Err(Error::MissingData(format!("printer lookup failed: {e}")));
            }
        };

        self.transition(SessionState::Assigning);
        let spool_id = self.session.snapshot.spool_id.clone();
        info!(
            session_id = %self.session.id,
            serial = %serial,
            slot = %slot,
            spool_id = %spool_id,
            "Assigning spool to tray"
        );

        let outcome = match self
            .collaborators
            .link
            .assign_spool_to_tray(&serial, slot, &spool_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(serial = %serial, slot = %slot, error = %e, "Assign call failed");
                self.record_device_error(Error::DeviceComm(e));
                AssignOutcome::Error
            }
        };
        self.session.diagnostics.assign = Some(outcome);

        if outcome.is_staged() {
            let needs_replacement = outcome == AssignOutcome::StagedReplace;
            self.enter_waiting(slot, device, serial, needs_replacement);
            return Ok(SubmitOutcome::Waiting {
                slot,
                needs_replacement,
            });
        }

        if outcome == AssignOutcome::Error {
            warn!(slot = %slot, "Device did not apply the assignment, continuing with calibration");
        }
        self.calibrate(slot, &serial).await;
        let summary = self.finalize(slot).await;
        Ok(SubmitOutcome::Completed { summary })
    }

    /// Abandon a staged assignment. Only valid while waiting for insertion.
    pub async fn cancel(&mut self) -> Result<CancelOutcome> {
        if self.session.state.waiting_target().is_none() {
            return Err(self.invalid("cancel"));
        }
        self.cancel_wait().await
    }

    /// Timeout-driven cancel. Same effect as [`cancel`](Self::cancel).
    pub async fn expire_wait(&mut self) -> Result<CancelOutcome> {
        let Some(target) = self.session.state.waiting_target() else {
            return Err(self.invalid("expire the wait"));
        };
        info!(
            session_id = %self.session.id,
            slot = %target.slot,
            waited_secs = target.entered_at.elapsed().as_secs(),
            "Insertion timed out"
        );
        self.cancel_wait().await
    }

    /// Whether the configured insertion timeout has run out.
    pub fn wait_expired(&self) -> bool {
        match (
            self.session.state.waiting_target(),
            self.settings.insertion_timeout,
        ) {
            (Some(target), Some(timeout)) => target.entered_at.elapsed() >= timeout,
            _ => false,
        }
    }

    /// Feed a completion event from the device layer.
    ///
    /// Events that do not belong to the current wait are rejected with
    /// `NoMatchingWait` and leave the session untouched.
    pub async fn on_completion(&mut self, event: CompletionEvent) -> Result<Phase> {
        let no_match = || Error::NoMatchingWait {
            serial: event.device_serial.clone(),
            slot: event.slot,
        };

        let Some(target) = self.session.state.waiting_target() else {
            return Err(no_match());
        };
        if !event.matches(&target.device_serial, &target.slot) || event.event_time < target.since
        {
            return Err(no_match());
        }
        let key = event.key();
        if self.session.last_consumed.as_ref() == Some(&key) {
            debug!(serial = %event.device_serial, slot = %event.slot, "Dropping redelivered completion");
            return Err(no_match());
        }

        let slot = target.slot;
        let serial = target.device_serial.clone();
        self.session.last_consumed = Some(key);

        if !event.success {
            warn!(session_id = %self.session.id, serial = %serial, slot = %slot, "Staged assignment failed on the device");
            self.transition(SessionState::Failed);
            self.events.publish(SessionEvent::Failed {
                session_id: self.session.id,
                slot,
                timestamp: Utc::now(),
            });
            return Ok(Phase::Failed);
        }

        info!(session_id = %self.session.id, serial = %serial, slot = %slot, "Staged assignment completed");
        self.calibrate(slot, &serial).await;
        self.finalize(slot).await;
        Ok(Phase::Completed)
    }

    pub fn current_phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn selected_slot(&self) -> Option<SlotAddress> {
        self.session.selected
    }

    /// Completion message, only once the session has completed.
    pub fn status_summary(&self) -> Option<&str> {
        match self.session.state {
            SessionState::Completed => self.session.summary.as_deref(),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> &TagSnapshot {
        &self.session.snapshot
    }

    pub fn diagnostics(&self) -> &SessionDiagnostics {
        &self.session.diagnostics
    }

    pub fn waiting_target(&self) -> Option<&WaitingTarget> {
        self.session.state.waiting_target()
    }

    pub fn session(&self) -> &AssignmentSession {
        &self.session
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn enter_waiting(
        &mut self,
        slot: SlotAddress,
        device: DeviceHandle,
        device_serial: String,
        needs_replacement: bool,
    ) {
        let prompt = if needs_replacement {
            format!("Replace spool in {slot}...")
        } else {
            format!("Insert spool into {slot}...")
        };
        info!(session_id = %self.session.id, slot = %slot, needs_replacement, "Waiting for spool insertion");

        self.transition(SessionState::WaitingForInsertion(WaitingTarget {
            slot,
            device,
            device_serial,
            since: Utc::now(),
            needs_replacement,
            entered_at: Instant::now(),
        }));
        self.events.publish(SessionEvent::InsertionRequested {
            session_id: self.session.id,
            slot,
            needs_replacement,
            prompt,
            timestamp: Utc::now(),
        });
    }

    async fn cancel_wait(&mut self) -> Result<CancelOutcome> {
        let Some(target) = self.session.state.waiting_target().cloned() else {
            return Err(self.invalid("cancel"));
        };

        let device_acknowledged = match self
            .collaborators
            .link
            .cancel_staged_assignment(&target.device_serial, target.slot)
            .await
        {
            Ok(acked) => {
                if !acked {
                    warn!(serial = %target.device_serial, slot = %target.slot, "Device did not confirm cancel");
                }
                acked
            }
            Err(e) => {
                warn!(serial = %target.device_serial, slot = %target.slot, error = %e, "Cancel call failed");
                self.record_device_error(Error::DeviceComm(e));
                false
            }
        };
        self.session.diagnostics.cancel_acknowledged = Some(device_acknowledged);

        self.session.selected = None;
        self.transition(SessionState::Idle);
        self.events.publish(SessionEvent::Cancelled {
            session_id: self.session.id,
            slot: target.slot,
            device_acknowledged,
            timestamp: Utc::now(),
        });

        Ok(CancelOutcome {
            slot: target.slot,
            device_acknowledged,
        })
    }

    /// Apply the stored K-profile, if there is one. Never fails the session.
    async fn calibrate(&mut self, slot: SlotAddress, serial: &str) {
        self.transition(SessionState::Calibrating);

        let outcome = self.calibration_outcome(slot, serial).await;
        match &outcome {
            CalibrationOutcome::Applied { cali_idx } => {
                info!(slot = %slot, cali_idx, "Calibration applied");
            }
            other => debug!(slot = %slot, outcome = ?other, "Calibration not applied"),
        }
        self.session.diagnostics.calibration = Some(outcome);
    }

    async fn calibration_outcome(&mut self, slot: SlotAddress, serial: &str) -> CalibrationOutcome {
        if !self.session.snapshot.in_inventory {
            return CalibrationOutcome::SkippedNotInventoried;
        }
        let spool_id = self.session.snapshot.spool_id.clone();
        let filament_id = self.session.snapshot.slicer_filament_name.clone();

        let profile = match self
            .collaborators
            .catalog
            .calibration_for(&spool_id, serial)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => return CalibrationOutcome::SkippedNoProfile,
            Err(e) => {
                warn!(error = %e, "K-profile lookup failed");
                let reason = e.to_string();
                self.record_device_error(Error::DeviceComm(e));
                return CalibrationOutcome::Failed { reason };
            }
        };

        let cali_idx = profile.cali_idx;
        if cali_idx < 0 {
            return CalibrationOutcome::SkippedNegativeIndex { cali_idx };
        }

        let calibration = TrayCalibration {
            cali_idx,
            filament_id,
            nozzle_diameter: self.settings.nozzle_diameter.clone(),
        };
        match self
            .collaborators
            .link
            .set_tray_calibration(serial, slot, &calibration)
            .await
        {
            Ok(true) => CalibrationOutcome::Applied { cali_idx },
            Ok(false) => {
                warn!(slot = %slot, cali_idx, "Device rejected calibration");
                CalibrationOutcome::Rejected { cali_idx }
            }
            Err(e) => {
                warn!(slot = %slot, error = %e, "Calibration call failed");
                let reason = e.to_string();
                self.record_device_error(Error::DeviceComm(e));
                CalibrationOutcome::Failed { reason }
            }
        }
    }

    /// Clear staging, build the summary, and complete the session.
    async fn finalize(&mut self, slot: SlotAddress) -> String {
        if let Err(e) = self.collaborators.tags.clear_staging().await {
            warn!(error = %e, "Failed to clear tag staging");
            self.record_device_error(Error::DeviceComm(e));
        }

        let summary = completion_summary(slot, &self.session.snapshot);
        self.session.summary = Some(summary.clone());
        self.transition(SessionState::Completed);

        info!(
            session_id = %self.session.id,
            summary = %summary,
            open_ms = (Utc::now() - self.session.opened_at).num_milliseconds(),
            "Assignment completed"
        );
        self.events.publish(SessionEvent::Completed {
            session_id: self.session.id,
            summary: summary.clone(),
            timestamp: Utc::now(),
        });
        summary
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.session.phase();
        let to = next.phase();
        self.session.state = next;
        if from != to {
            debug!(session_id = %self.session.id, %from, %to, "Phase changed");
            self.events.publish(SessionEvent::PhaseChanged {
                session_id: self.session.id,
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            phase: self.session.phase(),
            action,
        }
    }

    fn record_device_error(&mut self, err: Error) {
        self.session.diagnostics.device_errors.push(err.to_string());
    }
}

/// `"Slot A3: Bambu PLA Basic Red"`; subtype left out when blank or "Unknown".
pub fn completion_summary(slot: SlotAddress, snapshot: &TagSnapshot) -> String {
    let mut parts = vec![snapshot.vendor.as_str(), snapshot.material.as_str()];
    if let Some(subtype) = snapshot.meaningful_subtype() {
        parts.push(subtype);
    }
    parts.push(snapshot.color_name.as_str());
    format!("Slot {}: {}", slot, parts.join(" "))
}
