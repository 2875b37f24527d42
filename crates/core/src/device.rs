//! Collaborator traits: everything the orchestrator needs from the outside.
//!
//! The orchestrator never talks to a printer, an inventory or an NFC reader
//! directly. It goes through these traits, which lets the same state machine
//! run against the HTTP backend, an in-memory simulator, or a test script.

use crate::error::DeviceError;
use crate::slot::{ReadingMask, SlotAddress};
use crate::tag::{SpoolRecord, StagedTag};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use crate::session::AssignOutcome;

/// Opaque reference to a printer known to the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_dual_nozzle: bool,
}

/// A pressure-advance calibration stored for a (spool, printer) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KProfile {
    pub printer_serial: String,
    /// Index into the printer's calibration table; negative means "none".
    pub cali_idx: i32,
    #[serde(default)]
    pub k_value: String,
    #[serde(default)]
    pub name: String,
    /// Extruder the profile was measured on, `None` for single-nozzle printers.
    #[serde(default)]
    pub extruder: Option<u8>,
}

/// Parameters of a `set_tray_calibration` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrayCalibration {
    pub cali_idx: i32,
    /// Slicer filament preset id (e.g. "GFA00").
    pub filament_id: String,
    pub nozzle_diameter: String,
}

/// Produced by the device layer when a staged assignment finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub device_serial: String,
    pub slot: SlotAddress,
    #[serde(default)]
    pub spool_id: String,
    pub success: bool,
    pub event_time: DateTime<Utc>,
}

impl CompletionEvent {
    pub fn matches(&self, device_serial: &str, slot: &SlotAddress) -> bool {
        self.device_serial == device_serial && self.slot == *slot
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            device_serial: self.device_serial.clone(),
            slot: self.slot,
            event_time: self.event_time,
        }
    }
}

/// Identity of a completion event, used to drop redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub device_serial: String,
    pub slot: SlotAddress,
    pub event_time: DateTime<Utc>,
}

/// Which printer the user is working with.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn selected_device(&self) -> Option<DeviceHandle>;

    async fn device_info(&self, device: DeviceHandle) -> Result<DeviceInfo, DeviceError>;
}

/// Spool inventory and the calibrations stored against it.
#[async_trait]
pub trait SpoolCatalog: Send + Sync {
    async fn lookup_by_tag(&self, tag_id: &str) -> Result<Option<SpoolRecord>, DeviceError>;

    async fn has_tag(&self, tag_id: &str) -> Result<bool, DeviceError> {
        Ok(self
            .lookup_by_tag(tag_id)
            .await?
            .is_some_and(|r| r.is_valid()))
    }

    async fn calibration_for(
        &self,
        spool_id: &str,
        printer_serial: &str,
    ) -> Result<Option<KProfile>, DeviceError>;
}

/// The scanned-tag staging area (NFC reader side).
#[async_trait]
pub trait TagSource: Send + Sync {
    /// The scanned tag staged for assignment, if any.
    ///
    /// Id and fields come from the same read, so they always describe
    /// one scan.
    async fn staged_tag(&self) -> Option<StagedTag>;

    /// Drop the staged tag once it has been assigned.
    async fn clear_staging(&self) -> Result<(), DeviceError>;
}

/// Commands and queries against the printer itself.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn assign_spool_to_tray(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        spool_id: &str,
    ) -> Result<AssignOutcome, DeviceError>;

    /// Returns whether the device confirmed the cancel.
    async fn cancel_staged_assignment(
        &self,
        device_serial: &str,
        slot: SlotAddress,
    ) -> Result<bool, DeviceError>;

    /// Returns whether the device accepted the calibration.
    async fn set_tray_calibration(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        calibration: &TrayCalibration,
    ) -> Result<bool, DeviceError>;

    /// Drain completion events that happened at or after `since`.
    async fn poll_completion_events(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletionEvent>, DeviceError>;

    async fn tray_reading_mask(&self, device: DeviceHandle) -> Result<ReadingMask, DeviceError>;
}

/// The full set of collaborators an orchestrator is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn DeviceDirectory>,
    pub catalog: Arc<dyn SpoolCatalog>,
    pub tags: Arc<dyn TagSource>,
    pub link: Arc<dyn DeviceLink>,
}

impl Collaborators {
    /// Wire every collaborator to one object implementing all four traits.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: DeviceDirectory + SpoolCatalog + TagSource + DeviceLink + 'static,
    {
        Self {
            directory: backend.clone(),
            catalog: backend.clone(),
            tags: backend.clone(),
            link: backend,
        }
    }
}
