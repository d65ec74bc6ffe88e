//! Configuration management for aroma
//!
//! Config files are stored in platform-appropriate locations:
//! - Linux: ~/.config/aroma/
//! - macOS: ~/Library/Application Support/aroma/
//!
//! The fan pin mapping is fixed for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    NoDirFound,

    #[error("Invalid fan mapping: {0}")]
    InvalidFans(String),

    #[error("Invalid setting: {0}")]
    InvalidValue(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gpio: GpioConfig,

    /// Fan id to GPIO pin mapping, in display order
    #[serde(default = "default_fans")]
    pub fans: Vec<FanPinConfig>,
}

/// Server-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Status broadcast interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Log file path; falls back to the platform cache directory
    pub log_file: Option<PathBuf>,
}

/// Which GPIO driver to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    /// In-memory pins, for machines without GPIO
    #[default]
    Mock,
    /// Linux sysfs interface
    Sysfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default)]
    pub backend: GpioBackend,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

/// One fan channel and its BCM pin number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanPinConfig {
    pub id: u32,
    pub pin: u8,
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    crate::DEFAULT_PORT
}
fn default_tick_interval() -> u64 {
    1000
}
fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

/// Board wiring: fans 0-3 on BCM 19, 13, 12, 18
pub fn default_fans() -> Vec<FanPinConfig> {
    [19, 13, 12, 18]
        .into_iter()
        .enumerate()
        .map(|(id, pin)| FanPinConfig { id: id as u32, pin })
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            tick_interval_ms: default_tick_interval(),
            log_file: None,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::default(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gpio: GpioConfig::default(),
            fans: default_fans(),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("aroma"))
            .ok_or(ConfigError::NoDirFound)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load config from specific path
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject empty mappings, duplicated ids or pins, and a zero tick interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("tick_interval_ms must be positive".to_string()));
        }

        if self.fans.is_empty() {
            return Err(ConfigError::InvalidFans("no fans configured".to_string()));
        }

        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for fan in &self.fans {
            if !ids.insert(fan.id) {
                return Err(ConfigError::InvalidFans(format!("duplicate fan id {}", fan.id)));
            }
            if !pins.insert(fan.pin) {
                return Err(ConfigError::InvalidFans(format!("GPIO {} used twice", fan.pin)));
            }
        }
        Ok(())
    }

    /// Default log file location
    pub fn default_log_file() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("aroma").join("aroma.log"))
            .unwrap_or_else(|| PathBuf::from("/tmp/aroma.log"))
    }
}
