//! `spoolsync simulate`: Run a full session against an in-memory printer.
//!
//! Seeds a simulated printer with one inventoried spool, a K-profile and a
//! scanned tag, then inserts the spool on its own once the session asks.

use super::session;
use clap::ValueEnum;
use spoolsync_backend::SimulatedDevice;
use spoolsync_config::AppConfig;
use spoolsync_core::{
    AssignOutcome, Collaborators, EventBus, KProfile, SessionEvent, SlotAddress, SpoolRecord,
    TagFields,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const DEMO_TAG: &str = "04A1B2C3";
const DEMO_SPOOL: &str = "42";

/// How the simulated printer answers the assign call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    Configured,
    Staged,
    StagedReplace,
    Error,
}

impl From<Outcome> for AssignOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Configured => AssignOutcome::Configured,
            Outcome::Staged => AssignOutcome::Staged,
            Outcome::StagedReplace => AssignOutcome::StagedReplace,
            Outcome::Error => AssignOutcome::Error,
        }
    }
}

pub async fn run(
    slot: SlotAddress,
    outcome: Outcome,
    fail: bool,
    insert_after_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let device = Arc::new(seeded_device(outcome.into()));

    println!("🧵 Simulating assignment to {slot} ({outcome:?})");
    println!("==============================");

    let events = Arc::new(EventBus::default());
    let inserter = tokio::spawn(insert_when_asked(
        device.clone(),
        events.subscribe(),
        Duration::from_millis(insert_after_ms),
        !fail,
    ));

    let phase = session::drive(
        Collaborators::from_backend(device.clone()),
        &config,
        events,
        slot,
    )
    .await?;
    inserter.abort();

    println!("\n  Printer received:");
    for call in device.calls() {
        println!("    {call:?}");
    }
    println!("  Final phase:  {phase}");
    Ok(())
}

fn seeded_device(outcome: AssignOutcome) -> SimulatedDevice {
    let device = SimulatedDevice::default();
    device.add_spool(SpoolRecord {
        id: DEMO_SPOOL.into(),
        tag_id: DEMO_TAG.into(),
        brand: "Bambu".into(),
        material: "PLA".into(),
        subtype: "Basic".into(),
        color_name: "Jade White".into(),
        color_rgba: 0xFFFFFFFF,
        label_weight: 1000,
        slicer_filament: "GFA00".into(),
        tag_type: "bambu".into(),
    });
    device.add_k_profile(
        DEMO_SPOOL,
        KProfile {
            printer_serial: device.serial(),
            cali_idx: 3,
            k_value: "0.020".into(),
            name: "Bambu PLA Basic".into(),
            extruder: None,
        },
    );
    device.stage_tag(
        DEMO_TAG,
        TagFields {
            vendor: Some("Bambu".into()),
            material: Some("PLA".into()),
            subtype: Some("Basic".into()),
            color_name: Some("Jade White".into()),
            ..TagFields::default()
        },
    );
    device.set_assign_outcome(outcome);
    device
}

/// Put a spool in the requested slot after `delay`, with the reader lit meanwhile.
async fn insert_when_asked(
    device: Arc<SimulatedDevice>,
    mut rx: tokio::sync::broadcast::Receiver<Arc<SessionEvent>>,
    delay: Duration,
    success: bool,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let SessionEvent::InsertionRequested { slot, .. } = event.as_ref() {
                    device.set_reading(*slot, true);
                    tokio::time::sleep(delay).await;
                    device.insert_spool(*slot, success);
                    device.set_reading(*slot, false);
                    return;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}
