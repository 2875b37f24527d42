//! In-memory printer, inventory, and tag reader.
//!
//! Behaves like a single printer with an inventory behind it: staged
//! assignments are remembered until [`SimulatedDevice::insert_spool`] turns
//! them into completion events, which the next poll hands out once.
//! Cancels drop staged assignments. Every command the orchestrator sends is
//! recorded for inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spoolsync_core::{
    AssignOutcome, CompletionEvent, DeviceDirectory, DeviceError, DeviceHandle, DeviceInfo,
    DeviceLink, KProfile, ReadingMask, SlotAddress, SpoolCatalog, SpoolRecord, StagedTag,
    TagFields, TagSource, TrayCalibration,
};
use std::sync::Mutex;
use tracing::{debug, info};

/// A command the simulated printer received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Assign {
        serial: String,
        slot: SlotAddress,
        spool_id: String,
    },
    CancelStaged {
        serial: String,
        slot: SlotAddress,
    },
    SetCalibration {
        serial: String,
        slot: SlotAddress,
        calibration: TrayCalibration,
    },
    ClearStaging,
}

#[derive(Debug)]
struct SimState {
    printer: DeviceInfo,
    online: bool,
    spools: Vec<SpoolRecord>,
    profiles: Vec<(String, KProfile)>,
    staged_tag: Option<StagedTag>,
    assign_outcome: AssignOutcome,
    pending: Vec<(SlotAddress, String)>,
    completions: Vec<CompletionEvent>,
    reading_bits: u32,
    calls: Vec<DeviceCall>,
}

pub struct SimulatedDevice {
    state: Mutex<SimState>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new("SIM-0001")
    }
}

impl SimulatedDevice {
    /// One online single-nozzle printer with an empty inventory.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SimState {
                printer: DeviceInfo {
                    serial: serial.into(),
                    name: "Simulated printer".into(),
                    is_dual_nozzle: false,
                },
                online: true,
                spools: Vec::new(),
                profiles: Vec::new(),
                staged_tag: None,
                assign_outcome: AssignOutcome::Configured,
                pending: Vec::new(),
                completions: Vec::new(),
                reading_bits: 0,
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn serial(&self) -> String {
        self.state().printer.serial.clone()
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn add_spool(&self, record: SpoolRecord) {
        self.state().spools.push(record);
    }

    pub fn add_k_profile(&self, spool_id: impl Into<String>, profile: KProfile) {
        self.state().profiles.push((spool_id.into(), profile));
    }

    /// Put a tag on the reader, as if it had just been scanned.
    pub fn stage_tag(&self, tag_id: impl Into<String>, fields: TagFields) {
        self.state().staged_tag = Some(StagedTag {
            tag_id: tag_id.into(),
            fields,
        });
    }

    pub fn set_assign_outcome(&self, outcome: AssignOutcome) {
        self.state().assign_outcome = outcome;
    }

    /// Mark a slot's RFID reader as active or idle.
    pub fn set_reading(&self, slot: SlotAddress, reading: bool) {
        let Ok(bit) = slot.bit_position() else {
            return;
        };
        let mut state = self.state();
        if reading {
            state.reading_bits |= 1 << bit;
        } else {
            state.reading_bits &= !(1 << bit);
        }
    }

    /// The user put a spool into `slot`.
    ///
    /// Resolves a staged assignment on that slot into a completion event.
    /// Returns `false` if nothing was staged there.
    pub fn insert_spool(&self, slot: SlotAddress, success: bool) -> bool {
        let mut state = self.state();
        let Some(index) = state.pending.iter().position(|(s, _)| *s == slot) else {
            debug!(slot = %slot, "Spool inserted with nothing staged");
            return false;
        };
        let (_, spool_id) = state.pending.remove(index);
        let event = CompletionEvent {
            device_serial: state.printer.serial.clone(),
            slot,
            spool_id,
            success,
            event_time: Utc::now(),
        };
        info!(slot = %slot, success, "Simulated staged assignment finished");
        state.completions.push(event);
        true
    }

    /// Slots with a staged assignment still waiting for a spool.
    pub fn pending_slots(&self) -> Vec<SlotAddress> {
        self.state().pending.iter().map(|(s, _)| *s).collect()
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl DeviceDirectory for SimulatedDevice {
    async fn selected_device(&self) -> Option<DeviceHandle> {
        self.state().online.then_some(DeviceHandle(0))
    }

    async fn device_info(&self, device: DeviceHandle) -> Result<DeviceInfo, DeviceError> {
        let state = self.state();
        if device.0 != 0 || !state.online {
            return Err(DeviceError::NotFound(format!("printer #{}", device.0)));
        }
        Ok(state.printer.clone())
    }
}

#[async_trait]
impl SpoolCatalog for SimulatedDevice {
    async fn lookup_by_tag(&self, tag_id: &str) -> Result<Option<SpoolRecord>, DeviceError> {
        Ok(self
            .state()
            .spools
            .iter()
            .find(|s| s.tag_id == tag_id)
            .cloned())
    }

    async fn calibration_for(
        &self,
        spool_id: &str,
        printer_serial: &str,
    ) -> Result<Option<KProfile>, DeviceError> {
        Ok(self
            .state()
            .profiles
            .iter()
            .find(|(id, p)| id == spool_id && p.printer_serial == printer_serial)
            .map(|(_, p)| p.clone()))
    }
}

#[async_trait]
impl TagSource for SimulatedDevice {
    async fn staged_tag(&self) -> Option<StagedTag> {
        self.state().staged_tag.clone()
    }

    async fn clear_staging(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.staged_tag = None;
        state.calls.push(DeviceCall::ClearStaging);
        Ok(())
    }
}

#[async_trait]
impl DeviceLink for SimulatedDevice {
    async fn assign_spool_to_tray(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        spool_id: &str,
    ) -> Result<AssignOutcome, DeviceError> {
        let mut state = self.state();
        if !state.online {
            return Err(DeviceError::Network("printer offline".into()));
        }
        state.calls.push(DeviceCall::Assign {
            serial: device_serial.into(),
            slot,
            spool_id: spool_id.into(),
        });

        let outcome = state.assign_outcome;
        if outcome.is_staged() {
            state.pending.retain(|(s, _)| *s != slot);
            state.pending.push((slot, spool_id.to_string()));
        }
        Ok(outcome)
    }

    async fn cancel_staged_assignment(
        &self,
        device_serial: &str,
        slot: SlotAddress,
    ) -> Result<bool, DeviceError> {
        let mut state = self.state();
        state.calls.push(DeviceCall::CancelStaged {
            serial: device_serial.into(),
            slot,
        });
        let before = state.pending.len();
        state.pending.retain(|(s, _)| *s != slot);
        Ok(state.pending.len() < before)
    }

    async fn set_tray_calibration(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        calibration: &TrayCalibration,
    ) -> Result<bool, DeviceError> {
        self.state().calls.push(DeviceCall::SetCalibration {
            serial: device_serial.into(),
            slot,
            calibration: calibration.clone(),
        });
        Ok(true)
    }

    /// Drains the queue: events at or after `since` are handed out once,
    /// older ones are discarded.
    async fn poll_completion_events(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletionEvent>, DeviceError> {
        let drained = std::mem::take(&mut self.state().completions);
        Ok(drained
            .into_iter()
            .filter(|e| e.event_time >= since)
            .collect())
    }

    async fn tray_reading_mask(&self, _device: DeviceHandle) -> Result<ReadingMask, DeviceError> {
        Ok(ReadingMask::Known(self.state().reading_bits))
    }
}
