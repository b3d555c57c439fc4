//! Agent settings loading and management
//!
//! Settings are loaded from `~/.config/leadtrail/config.toml`. These are the
//! host-side knobs of the agent (logging, transport limits, where durable
//! identity lives). The per-site tracker configuration served by the collection
//! API lives in [`crate::client_config`].
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/leadtrail/` (~/.config/leadtrail/)
//! - Data: `$XDG_DATA_HOME/leadtrail/` (~/.local/share/leadtrail/)
//! - State/Logs: `$XDG_STATE_HOME/leadtrail/` (~/.local/state/leadtrail/)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main settings struct
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Delivery transport limits
    #[serde(default)]
    pub transport: TransportConfig,

    /// Identity storage location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Delivery transport configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Largest body the beacon tier accepts before deferring to fetch
    #[serde(default = "default_beacon_max_bytes")]
    pub beacon_max_bytes: usize,

    /// Batches the beacon worker may hold before refusing new ones
    #[serde(default = "default_beacon_capacity")]
    pub beacon_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            beacon_max_bytes: default_beacon_max_bytes(),
            beacon_capacity: default_beacon_capacity(),
        }
    }
}

impl TransportConfig {
    /// Validate limits, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "transport.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.beacon_capacity == 0 {
            return Err(Error::Config(
                "transport.beacon_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_beacon_max_bytes() -> usize {
    // navigator.sendBeacon refuses payloads above 64 KiB
    64 * 1024
}

fn default_beacon_capacity() -> usize {
    64
}

/// Identity storage configuration
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override directory for durable identity files
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.transport.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/leadtrail/config.toml` (~/.config/leadtrail/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("leadtrail").join("config.toml")
    }

    /// Returns the data directory path (durable visitor identity)
    ///
    /// `$XDG_DATA_HOME/leadtrail/` (~/.local/share/leadtrail/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("leadtrail")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/leadtrail/` (~/.local/state/leadtrail/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("leadtrail")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("leadtrail.log")
    }

    /// Directory holding durable identity files, honoring `[storage] data_dir`
    pub fn identity_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("identity"))
    }
}
