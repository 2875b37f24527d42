//! Shared test helpers for orchestrator and poller tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spoolsync_core::{
    AssignOutcome, Collaborators, CompletionEvent, DeviceDirectory, DeviceError, DeviceHandle,
    DeviceInfo, DeviceLink, KProfile, ReadingMask, SlotAddress, SpoolCatalog, SpoolRecord,
    StagedTag, TagFields, TagSource, TrayCalibration,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A device call the scripted device saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Assign { serial: String, slot: SlotAddress, spool_id: String },
    Cancel { serial: String, slot: SlotAddress },
    Calibrate { serial: String, slot: SlotAddress, calibration: TrayCalibration },
    Poll { since: DateTime<Utc> },
    ReadingMask,
    ClearStaging,
}

/// A scripted stand-in for every collaborator at once.
///
/// Poll results are served from a queue; an exhausted queue yields no events.
pub struct ScriptedDevice {
    pub device: Mutex<Option<DeviceHandle>>,
    pub serial: Mutex<String>,
    pub record: Mutex<Option<SpoolRecord>>,
    pub profile: Mutex<Option<KProfile>>,
    pub tag_id: Mutex<Option<String>>,
    pub staging: Mutex<bool>,
    pub assign: Mutex<Result<AssignOutcome, DeviceError>>,
    pub cancel: Mutex<Result<bool, DeviceError>>,
    pub calibrate: Mutex<Result<bool, DeviceError>>,
    pub polls: Mutex<VecDeque<Result<Vec<CompletionEvent>, DeviceError>>>,
    pub mask: Mutex<ReadingMask>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedDevice {
    /// An inventoried spool staged on printer "P1" with a happy device.
    pub fn new() -> Self {
        Self {
            device: Mutex::new(Some(DeviceHandle(0))),
            serial: Mutex::new("P1".into()),
            record: Mutex::new(Some(spool_record())),
            profile: Mutex::new(None),
            tag_id: Mutex::new(Some("04AABB".into())),
            staging: Mutex::new(true),
            assign: Mutex::new(Ok(AssignOutcome::Configured)),
            cancel: Mutex::new(Ok(true)),
            calibrate: Mutex::new(Ok(true)),
            polls: Mutex::new(VecDeque::new()),
            mask: Mutex::new(ReadingMask::Unknown),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_assign(self, outcome: AssignOutcome) -> Self {
        *self.assign.lock().unwrap() = Ok(outcome);
        self
    }

    pub fn with_profile(self, cali_idx: i32) -> Self {
        *self.profile.lock().unwrap() = Some(KProfile {
            printer_serial: "P1".into(),
            cali_idx,
            k_value: "0.020".into(),
            name: "Bambu PLA Basic".into(),
            extruder: None,
        });
        self
    }

    pub fn uninventoried(self) -> Self {
        *self.record.lock().unwrap() = None;
        self
    }

    pub fn push_poll(&self, result: Result<Vec<CompletionEvent>, DeviceError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators::from_backend(self.clone())
    }

    fn record_call(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn spool_record() -> SpoolRecord {
    SpoolRecord {
        id: "spool-42".into(),
        tag_id: "04AABB".into(),
        brand: "Bambu".into(),
        material: "PLA".into(),
        subtype: "Basic".into(),
        color_name: "Red".into(),
        color_rgba: 0xFF0000FF,
        label_weight: 1000,
        slicer_filament: "GFA00".into(),
        tag_type: "bambu".into(),
    }
}

pub fn completion(serial: &str, slot: SlotAddress, success: bool) -> CompletionEvent {
    CompletionEvent {
        device_serial: serial.into(),
        slot,
        spool_id: "spool-42".into(),
        success,
        event_time: Utc::now(),
    }
}

#[async_trait]
impl DeviceDirectory for ScriptedDevice {
    async fn selected_device(&self) -> Option<DeviceHandle> {
        *self.device.lock().unwrap()
    }

    async fn device_info(&self, _device: DeviceHandle) -> Result<DeviceInfo, DeviceError> {
        Ok(DeviceInfo {
            serial: self.serial.lock().unwrap().clone(),
            name: "Workshop X1C".into(),
            is_dual_nozzle: false,
        })
    }
}

#[async_trait]
impl SpoolCatalog for ScriptedDevice {
    async fn lookup_by_tag(&self, _tag_id: &str) -> Result<Option<SpoolRecord>, DeviceError> {
        Ok(self.record.lock().unwrap().clone())
    }

    async fn calibration_for(
        &self,
        _spool_id: &str,
        _printer_serial: &str,
    ) -> Result<Option<KProfile>, DeviceError> {
        Ok(self.profile.lock().unwrap().clone())
    }
}

#[async_trait]
impl TagSource for ScriptedDevice {
    async fn staged_tag(&self) -> Option<StagedTag> {
        if !*self.staging.lock().unwrap() {
            return None;
        }
        let tag_id = self.tag_id.lock().unwrap().clone()?;
        Some(StagedTag {
            tag_id,
            fields: TagFields {
                vendor: Some("Generic".into()),
                material: Some("PETG".into()),
                ..Default::default()
            },
        })
    }

    async fn clear_staging(&self) -> Result<(), DeviceError> {
        self.record_call(Call::ClearStaging);
        *self.staging.lock().unwrap() = false;
        Ok(())
    }
}

#[async_trait]
impl DeviceLink for ScriptedDevice {
    async fn assign_spool_to_tray(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        spool_id: &str,
    ) -> Result<AssignOutcome, DeviceError> {
        self.record_call(Call::Assign {
            serial: device_serial.into(),
            slot,
            spool_id: spool_id.into(),
        });
        self.assign.lock().unwrap().clone()
    }

    async fn cancel_staged_assignment(
        &self,
        device_serial: &str,
        slot: SlotAddress,
    ) -> Result<bool, DeviceError> {
        self.record_call(Call::Cancel {
            serial: device_serial.into(),
            slot,
        });
        self.cancel.lock().unwrap().clone()
    }

    async fn set_tray_calibration(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        calibration: &TrayCalibration,
    ) -> Result<bool, DeviceError> {
        self.record_call(Call::Calibrate {
            serial: device_serial.into(),
            slot,
            calibration: calibration.clone(),
        });
        self.calibrate.lock().unwrap().clone()
    }

    async fn poll_completion_events(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletionEvent>, DeviceError> {
        self.record_call(Call::Poll { since });
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn tray_reading_mask(&self, _device: DeviceHandle) -> Result<ReadingMask, DeviceError> {
        self.record_call(Call::ReadingMask);
        Ok(*self.mask.lock().unwrap())
    }
}
