// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Daemon settings, backend tool locations, call timeouts and the fan to
//! sensor mapping live in TOML. Default path: `/etc/fancurve/config.toml`

use crate::backend::{asusctl, dell};
use crate::hwmon::HWMON_ROOT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fancurve/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/fancurve.sock";

/// Default directory for remembered curves and saved profiles.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/fancurve";

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Interval for profile-change checks and static duty refresh.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Where the active curve store and saved profiles are kept.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Whether to hand fans back to firmware control on daemon exit.
    #[serde(default = "default_true")]
    pub restore_on_exit: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            restore_on_exit: true,
        }
    }
}

/// Upper bounds for backend calls, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Detection, profile and curve reads.
    pub query_secs: u64,
    /// Switching custom curves on or off.
    pub enable_secs: u64,
    /// Curve writes.
    pub write_secs: u64,
    /// Full-speed fan tests.
    pub test_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_secs: 2,
            enable_secs: 5,
            write_secs: 10,
            test_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn enable(&self) -> Duration {
        Duration::from_secs(self.enable_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }
}

/// Where each backend finds its tool or device files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub asusctl_path: String,
    pub i8kctl_path: String,
    pub hwmon_root: PathBuf,
    pub modules_path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            asusctl_path: asusctl::DEFAULT_PROGRAM.to_string(),
            i8kctl_path: dell::DEFAULT_PROGRAM.to_string(),
            hwmon_root: PathBuf::from(HWMON_ROOT),
            modules_path: PathBuf::from(dell::DEFAULT_MODULES_PATH),
        }
    }
}

/// Which temperature drives which fan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Fan name -> hwmon sensor id (e.g. `CPU = "hwmon2/temp1"`).
    #[serde(default)]
    pub fan_sensors: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.timeouts.write(), Duration::from_secs(10));
        assert_eq!(config.backend.asusctl_path, "asusctl");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[daemon]
state_dir = "/tmp/fancurve"

[timeouts]
query_secs = 3

[telemetry.fan_sensors]
CPU = "hwmon2/temp1"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.daemon.state_dir, PathBuf::from("/tmp/fancurve"));
        assert!(config.daemon.restore_on_exit);
        assert_eq!(config.timeouts.query(), Duration::from_secs(3));
        assert_eq!(config.timeouts.test(), Duration::from_secs(5));
        assert_eq!(config.telemetry.fan_sensors["CPU"], "hwmon2/temp1");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[daemon\npoll_interval_ms = ").unwrap();
        assert_eq!(
            load_config(&path).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = Config::default();
        config.daemon.poll_interval_ms = 500;
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap().daemon.poll_interval_ms, 500);
    }
}
