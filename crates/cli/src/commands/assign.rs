//! `spoolsync assign`: Assign the scanned spool to a slot via the backend.

use super::session;
use spoolsync_backend::HttpBackend;
use spoolsync_config::AppConfig;
use spoolsync_core::{Collaborators, EventBus, Phase, SlotAddress};
use std::sync::Arc;

pub async fn run(slot: SlotAddress) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backend = Arc::new(HttpBackend::new(&config.backend)?);

    println!("🧵 Assigning to {slot} via {}", backend.base_url());
    println!("==============================");

    let phase = session::drive(
        Collaborators::from_backend(backend),
        &config,
        Arc::new(EventBus::default()),
        slot,
    )
    .await?;

    if phase == Phase::Failed {
        return Err(format!("Assignment to {slot} failed").into());
    }
    Ok(())
}
