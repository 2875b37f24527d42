//! `spoolsync status`: Show config and what the backend currently reports.

use spoolsync_backend::HttpBackend;
use spoolsync_config::AppConfig;
use spoolsync_core::{DeviceDirectory, TagSource};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🧵 SpoolSync Status");
    println!("===================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Backend:      {}", config.backend.base_url);
    println!(
        "  Printer:      {}",
        config.backend.printer_serial.as_deref().unwrap_or("first connected")
    );
    println!("  Poll every:   {} ms", config.poller.interval_ms);
    println!("  Nozzle:       {} mm", config.session.nozzle_diameter);
    match config.session.insertion_timeout_secs {
        Some(secs) => println!("  Insert wait:  {secs} s"),
        None => println!("  Insert wait:  until cancelled"),
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `spoolsync init` first");
    }

    let backend = HttpBackend::new(&config.backend)?;
    match backend.selected_device().await {
        Some(handle) => match backend.device_info(handle).await {
            Ok(info) => println!(
                "  ✅ Printer:   {} ({}){}",
                info.name,
                info.serial,
                if info.is_dual_nozzle { ", dual nozzle" } else { "" }
            ),
            Err(e) => println!("  ⚠️  Printer lookup failed: {e}"),
        },
        None => println!("  ⚠️  No printer connected"),
    }

    if let Some(staged) = backend.staged_tag().await {
        println!("  ✅ Tag staged: {}", staged.tag_id);
    } else {
        println!("  ⚠️  No tag staged — scan a spool first");
    }

    Ok(())
}
