//! Configuration loading, validation, and management for SpoolSync.
//!
//! Loads configuration from `~/.spoolsync/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.spoolsync/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend (printer bridge + inventory) connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Completion poller cadence
    #[serde(default)]
    pub poller: PollerConfig,

    /// Assignment session policy
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Printer to assign to. When unset, the first connected printer is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_serial: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:3000".into()
}
fn default_request_timeout() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            printer_serial: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// How often to check for completion events while waiting for insertion
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Nozzle diameter sent with tray calibrations
    #[serde(default = "default_nozzle_diameter")]
    pub nozzle_diameter: String,

    /// Auto-cancel a staged assignment after this many seconds.
    /// Unset = wait until the user cancels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion_timeout_secs: Option<u64>,
}

fn default_nozzle_diameter() -> String {
    "0.4".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nozzle_diameter: default_nozzle_diameter(),
            insertion_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn insertion_timeout(&self) -> Option<Duration> {
        self.insertion_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.spoolsync/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `SPOOLSYNC_BACKEND_URL`
    /// - `SPOOLSYNC_PRINTER`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(url) = std::env::var("SPOOLSYNC_BACKEND_URL") {
            config.backend.base_url = url;
        }

        if let Ok(serial) = std::env::var("SPOOLSYNC_PRINTER") {
            config.backend.printer_serial = Some(serial);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".spoolsync")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.backend.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "backend.base_url must be an http(s) URL, got '{url}'"
            )));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.request_timeout_secs must be > 0".into(),
            ));
        }

        if self.poller.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poller.interval_ms must be > 0".into(),
            ));
        }

        match self.session.nozzle_diameter.parse::<f32>() {
            Ok(d) if d > 0.0 => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "session.nozzle_diameter must be a positive number, got '{}'",
                    self.session.nozzle_diameter
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
