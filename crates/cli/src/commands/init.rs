//! `spoolsync init`: Write a default config file.

use spoolsync_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🧵 SpoolSync — Setup");
    println!("====================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("⚠️  Config already exists, leaving it alone: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Wrote default config: {}", config_path.display());
    }

    println!("\nNext steps:");
    println!("  1. Point backend.base_url at your inventory server");
    println!("  2. Optionally pin backend.printer_serial");
    println!("  3. Run `spoolsync status` to check the connection");

    Ok(())
}
