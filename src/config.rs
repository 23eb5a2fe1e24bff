//! Session configuration.
//!
//! Loaded from `config.toml` under the platform config directory; every
//! field has a default so a missing or partial file never blocks startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables shared by publishers and browsers.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct SessionConfig {
    /// Human-readable name the publisher announces itself under.
    pub service_name: String,

    /// How long a dropped peer's controllers stay visible (Connecting)
    /// before they are removed from the roster.
    pub grace_period_ms: u64,

    /// Listening port for the reliable control channel; 0 picks one.
    pub tcp_port: u16,

    /// Listening port for the unreliable input channel; 0 picks one.
    pub udp_port: u16,

    /// Capacity of the session event channel handed to the caller.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_name: "padlink".to_string(),
            grace_period_ms: 12_000,
            tcp_port: 0,
            udp_port: 0,
            event_buffer: 100,
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("padlink").join("config.toml"))
    }

    /// Loads the configuration file, falling back to defaults when the file
    /// is missing or unreadable. Parse errors are logged, never fatal.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_path() else {
            warn!("no config directory available, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!("loaded configuration from {}", path.display());
                    config
                }
                Err(error) => {
                    warn!("invalid configuration in {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(error) => {
                debug!("no configuration at {} ({error}), using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Writes the configuration back out, creating parent directories.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory available",
            ));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        fs::write(path, contents)
    }
}
