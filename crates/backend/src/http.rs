//! HTTP backend: talks to the printer bridge REST API.
//!
//! One client implements every collaborator trait. Printers are addressed
//! by their index in `GET /api/printers`, which the backend keeps stable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use spoolsync_config::BackendConfig;
use spoolsync_core::{
    AssignOutcome, CompletionEvent, DeviceDirectory, DeviceError, DeviceHandle, DeviceInfo,
    DeviceLink, KProfile, ReadingMask, SlotAddress, SpoolCatalog, SpoolRecord, StagedTag,
    TagFields, TagSource, TrayCalibration,
};
use tracing::{debug, info, warn};

/// REST client for the printer bridge and spool inventory.
pub struct HttpBackend {
    base_url: String,
    printer_serial: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DeviceError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            printer_serial: config.printer_serial.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tray_url(&self, serial: &str, slot: SlotAddress, action: &str) -> String {
        format!(
            "{}/api/printers/{}/ams/{}/tray/{}/{}",
            self.base_url, serial, slot.unit_id, slot.tray_index, action
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DeviceError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(DeviceError::NotFound(url.to_string()));
        }
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Backend returned error");
            return Err(DeviceError::Http {
                status_code: status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| DeviceError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    async fn post(
        &self,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, DeviceError> {
        debug!(url = %url, "POST");
        let request = self.client.post(url);
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))
    }

    async fn printers(&self) -> Result<Vec<ApiPrinter>, DeviceError> {
        self.get_json(&format!("{}/api/printers", self.base_url))
            .await
    }

    async fn printer(&self, device: DeviceHandle) -> Result<ApiPrinter, DeviceError> {
        self.printers()
            .await?
            .into_iter()
            .nth(device.0)
            .ok_or_else(|| DeviceError::NotFound(format!("printer #{}", device.0)))
    }

    async fn display_status(&self) -> Result<ApiDisplayStatus, DeviceError> {
        self.get_json(&format!("{}/api/display/status", self.base_url))
            .await
    }

    /// Display status, or "nothing staged" when the backend is unreachable.
    async fn display_status_or_idle(&self) -> ApiDisplayStatus {
        match self.display_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Display status unavailable");
                ApiDisplayStatus::default()
            }
        }
    }
}

#[async_trait]
impl DeviceDirectory for HttpBackend {
    async fn selected_device(&self) -> Option<DeviceHandle> {
        let printers = match self.printers().await {
            Ok(printers) => printers,
            Err(e) => {
                warn!(error = %e, "Failed to list printers");
                return None;
            }
        };

        let index = match &self.printer_serial {
            Some(serial) => printers.iter().position(|p| &p.serial == serial),
            None => printers.iter().position(|p| p.connected),
        };
        if index.is_none() {
            debug!(configured = ?self.printer_serial, count = printers.len(), "No printer to select");
        }
        index.map(DeviceHandle)
    }

    async fn device_info(&self, device: DeviceHandle) -> Result<DeviceInfo, DeviceError> {
        let printer = self.printer(device).await?;
        let is_dual_nozzle = printer.ams_units.iter().any(|u| u.extruder == Some(1));
        Ok(DeviceInfo {
            serial: printer.serial,
            name: printer.name.unwrap_or_default(),
            is_dual_nozzle,
        })
    }
}

#[async_trait]
impl SpoolCatalog for HttpBackend {
    async fn lookup_by_tag(&self, tag_id: &str) -> Result<Option<SpoolRecord>, DeviceError> {
        let spools: Vec<ApiSpool> = self
            .get_json(&format!("{}/api/spools", self.base_url))
            .await?;

        Ok(spools
            .into_iter()
            .find(|s| s.tag_id.as_deref() == Some(tag_id))
            .map(ApiSpool::into_record))
    }

    async fn calibration_for(
        &self,
        spool_id: &str,
        printer_serial: &str,
    ) -> Result<Option<KProfile>, DeviceError> {
        let profiles: Vec<ApiKProfile> = self
            .get_json(&format!("{}/api/spools/{}/k-profiles", self.base_url, spool_id))
            .await?;

        debug!(spool_id = %spool_id, count = profiles.len(), "Fetched K-profiles");
        Ok(profiles
            .into_iter()
            .find(|p| p.printer_serial.as_deref() == Some(printer_serial))
            .map(ApiKProfile::into_profile))
    }
}

#[async_trait]
impl TagSource for HttpBackend {
    async fn staged_tag(&self) -> Option<StagedTag> {
        self.display_status_or_idle().await.into_staged_tag()
    }

    async fn clear_staging(&self) -> Result<(), DeviceError> {
        let response = self
            .post(&format!("{}/api/staging/clear", self.base_url), None)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Http {
                status_code: status.as_u16(),
                message: "staging clear rejected".into(),
            });
        }
        info!("Staging cleared");
        Ok(())
    }
}

#[async_trait]
impl DeviceLink for HttpBackend {
    async fn assign_spool_to_tray(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        spool_id: &str,
    ) -> Result<AssignOutcome, DeviceError> {
        let url = self.tray_url(device_serial, slot, "assign");
        let response = self
            .post(&url, Some(serde_json::json!({ "spool_id": spool_id })))
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, slot = %slot, body = %body, "Assign rejected");
            return Ok(AssignOutcome::Error);
        }

        let body: ApiAssignResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::InvalidResponse(format!("Failed to parse assign response: {e}")))?;
        let outcome = body.outcome();
        info!(serial = %device_serial, slot = %slot, outcome = ?outcome, "Assign response");
        Ok(outcome)
    }

    async fn cancel_staged_assignment(
        &self,
        device_serial: &str,
        slot: SlotAddress,
    ) -> Result<bool, DeviceError> {
        let url = self.tray_url(device_serial, slot, "cancel-staged");
        let response = self.post(&url, None).await?;
        Ok(response.status().as_u16() == 204)
    }

    async fn set_tray_calibration(
        &self,
        device_serial: &str,
        slot: SlotAddress,
        calibration: &TrayCalibration,
    ) -> Result<bool, DeviceError> {
        let url = self.tray_url(device_serial, slot, "calibration");
        let body = serde_json::json!({
            "cali_idx": calibration.cali_idx,
            "filament_id": calibration.filament_id,
            "nozzle_diameter": calibration.nozzle_diameter,
        });
        let response = self.post(&url, Some(body)).await?;
        Ok(matches!(response.status().as_u16(), 200 | 204))
    }

    async fn poll_completion_events(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletionEvent>, DeviceError> {
        let url = format!(
            "{}/api/printers/assignment-completions?since={:.6}",
            self.base_url,
            unix_seconds(since)
        );
        let events: Vec<ApiCompletion> = self.get_json(&url).await?;
        if !events.is_empty() {
            info!(count = events.len(), "Assignment completions received");
        }
        Ok(events.into_iter().filter_map(ApiCompletion::into_event).collect())
    }

    async fn tray_reading_mask(&self, device: DeviceHandle) -> Result<ReadingMask, DeviceError> {
        let printer = self.printer(device).await?;
        Ok(ReadingMask::from_raw(printer.tray_reading_bits.unwrap_or(-1)))
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ApiPrinter {
    serial: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    tray_reading_bits: Option<i64>,
    #[serde(default)]
    ams_units: Vec<ApiAmsUnit>,
}

#[derive(Debug, Deserialize)]
struct ApiAmsUnit {
    #[serde(default)]
    extruder: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiSpool {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    tag_id: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    color_name: Option<String>,
    #[serde(default)]
    rgba: Option<String>,
    #[serde(default)]
    label_weight: Option<u32>,
    #[serde(default)]
    slicer_filament: Option<String>,
    #[serde(default)]
    tag_type: Option<String>,
}

impl ApiSpool {
    fn into_record(self) -> SpoolRecord {
        SpoolRecord {
            id: self.id.unwrap_or_default(),
            tag_id: self.tag_id.unwrap_or_default(),
            brand: self.brand.unwrap_or_default(),
            material: self.material.unwrap_or_default(),
            subtype: self.subtype.unwrap_or_default(),
            color_name: self.color_name.unwrap_or_default(),
            color_rgba: self.rgba.as_deref().map(parse_rgba).unwrap_or_default(),
            label_weight: self.label_weight.unwrap_or_default(),
            slicer_filament: self.slicer_filament.unwrap_or_default(),
            tag_type: self.tag_type.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiKProfile {
    #[serde(default)]
    printer_serial: Option<String>,
    #[serde(default)]
    extruder: Option<i32>,
    #[serde(default)]
    k_value: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cali_idx: Option<i32>,
}

impl ApiKProfile {
    fn into_profile(self) -> KProfile {
        KProfile {
            printer_serial: self.printer_serial.unwrap_or_default(),
            cali_idx: self.cali_idx.unwrap_or(-1),
            k_value: self.k_value.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            extruder: self.extruder.and_then(|e| u8::try_from(e).ok()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiDisplayStatus {
    #[serde(default)]
    staging_remaining: f64,
    #[serde(default)]
    tag_data: Option<ApiTagData>,
}

impl ApiDisplayStatus {
    /// Staged tag from one status response. `None` once the staging window ran out.
    fn into_staged_tag(self) -> Option<StagedTag> {
        if self.staging_remaining <= 0.0 {
            return None;
        }
        let mut data = self.tag_data?;
        let tag_id = data.uid.take().filter(|uid| !uid.is_empty())?;
        Some(StagedTag {
            tag_id,
            fields: data.into_fields(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiTagData {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    color_name: Option<String>,
    #[serde(default)]
    color_rgba: Option<f64>,
    #[serde(default)]
    spool_weight: Option<f64>,
    #[serde(default)]
    tag_type: Option<String>,
    #[serde(default)]
    slicer_filament: Option<String>,
}

impl ApiTagData {
    fn into_fields(self) -> TagFields {
        TagFields {
            vendor: self.vendor,
            material: self.material,
            subtype: self.subtype,
            color_name: self.color_name,
            color_rgba: self.color_rgba.map(|c| c as u32),
            spool_weight: self.spool_weight.map(|w| w as u32),
            slicer_filament: self.slicer_filament,
            tag_type: self.tag_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiAssignResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    needs_replacement: bool,
}

impl ApiAssignResponse {
    fn outcome(&self) -> AssignOutcome {
        match self.status.as_deref() {
            Some("configured") => AssignOutcome::Configured,
            Some("staged") if self.needs_replacement => AssignOutcome::StagedReplace,
            Some("staged") => AssignOutcome::Staged,
            _ => AssignOutcome::Error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCompletion {
    timestamp: f64,
    serial: String,
    ams_id: i64,
    tray_id: i64,
    #[serde(default)]
    spool_id: Option<String>,
    #[serde(default)]
    success: bool,
}

impl ApiCompletion {
    fn into_event(self) -> Option<CompletionEvent> {
        let (Ok(unit_id), Ok(tray_index)) = (u8::try_from(self.ams_id), u8::try_from(self.tray_id))
        else {
            warn!(ams_id = self.ams_id, tray_id = self.tray_id, "Completion for out-of-range slot");
            return None;
        };
        let event_time = DateTime::from_timestamp_micros((self.timestamp * 1e6).round() as i64)?;
        Some(CompletionEvent {
            device_serial: self.serial,
            slot: SlotAddress::new(unit_id, tray_index),
            spool_id: self.spool_id.unwrap_or_default(),
            success: self.success,
            event_time,
        })
    }
}

/// Seconds since the epoch with microsecond precision.
fn unix_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1e6
}

/// Parse an inventory colour: `RRGGBB` gets full alpha, `RRGGBBAA` is kept.
/// Anything unparseable is black-transparent.
pub fn parse_rgba(hex: &str) -> u32 {
    let hex = hex.trim().trim_start_matches('#');
    let padded;
    let hex = if hex.len() == 6 {
        padded = format!("{hex}FF");
        padded.as_str()
    } else {
        hex
    };
    u32::from_str_radix(hex, 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_gets_full_alpha() {
        assert_eq!(parse_rgba("FF0000"), 0xFF0000FF);
        assert_eq!(parse_rgba("#00ff00"), 0x00FF00FF);
    }

    #[test]
    fn rgba_kept_as_is() {
        assert_eq!(parse_rgba("11223344"), 0x11223344);
    }

    #[test]
    fn garbage_colour_is_zero() {
        assert_eq!(parse_rgba("teal"), 0);
        assert_eq!(parse_rgba(""), 0);
    }

    #[test]
    fn assign_response_mapping() {
        let parse = |json: &str| serde_json::from_str::<ApiAssignResponse>(json).unwrap().outcome();
        assert_eq!(parse(r#"{"status":"configured"}"#), AssignOutcome::Configured);
        assert_eq!(
            parse(r#"{"status":"staged","needs_replacement":false}"#),
            AssignOutcome::Staged
        );
        assert_eq!(
            parse(r#"{"status":"staged","needs_replacement":true}"#),
            AssignOutcome::StagedReplace
        );
        assert_eq!(parse(r#"{"status":"queued"}"#), AssignOutcome::Error);
        assert_eq!(parse(r#"{}"#), AssignOutcome::Error);
    }

    #[test]
    fn completion_timestamp_keeps_microseconds() {
        let completion: ApiCompletion = serde_json::from_str(
            r#"{"timestamp":1718000000.123456,"serial":"01P","ams_id":128,"tray_id":0,"spool_id":"7","success":true}"#,
        )
        .unwrap();
        let event = completion.into_event().unwrap();
        assert_eq!(event.slot, SlotAddress::new(128, 0));
        assert_eq!(event.event_time.timestamp(), 1_718_000_000);
        assert_eq!(event.event_time.timestamp_subsec_micros(), 123_456);
        assert!(event.success);
    }

    #[test]
    fn completion_with_bad_slot_is_dropped() {
        let completion: ApiCompletion = serde_json::from_str(
            r#"{"timestamp":1.0,"serial":"01P","ams_id":-1,"tray_id":0,"success":true}"#,
        )
        .unwrap();
        assert!(completion.into_event().is_none());
    }

    #[test]
    fn staged_tag_needs_time_left_and_a_uid() {
        let parse = |json: &str| {
            serde_json::from_str::<ApiDisplayStatus>(json)
                .unwrap()
                .into_staged_tag()
        };
        let staged = parse(
            r#"{"staging_remaining":12.5,"tag_data":{"uid":"04AB","vendor":"Bambu","spool_weight":1000.0}}"#,
        )
        .unwrap();
        assert_eq!(staged.tag_id, "04AB");
        assert_eq!(staged.fields.vendor.as_deref(), Some("Bambu"));
        assert_eq!(staged.fields.spool_weight, Some(1000));

        assert!(parse(r#"{"staging_remaining":0,"tag_data":{"uid":"04AB"}}"#).is_none());
        assert!(parse(r#"{"staging_remaining":5,"tag_data":{"uid":""}}"#).is_none());
        assert!(parse(r#"{"staging_remaining":5}"#).is_none());
    }

    #[test]
    fn spool_nulls_become_empty() {
        let spool: ApiSpool = serde_json::from_str(
            r#"{"id":"12","tag_id":"04AB","brand":null,"material":"PLA","rgba":"112233","label_weight":null}"#,
        )
        .unwrap();
        let record = spool.into_record();
        assert_eq!(record.id, "12");
        assert_eq!(record.brand, "");
        assert_eq!(record.color_rgba, 0x112233FF);
        assert_eq!(record.label_weight, 0);
    }

    #[test]
    fn unix_seconds_roundtrip() {
        let time = DateTime::from_timestamp_micros(1_718_000_000_250_000).unwrap();
        assert_eq!(format!("{:.6}", unix_seconds(time)), "1718000000.250000");
    }
}
