//! GPIO capability used to drive the fan pins
//!
//! The controller only ever talks to `dyn Gpio`, so the backend can be swapped:
//! - `MockGpio`: in-memory pin levels, for development hosts and tests
//! - `SysfsGpio`: Linux `/sys/class/gpio` interface on the board itself

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GpioBackend, GpioConfig};

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO I/O failed on pin {pin}: {source}")]
    Io {
        pin: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("Pin {0} is not configured as an output")]
    NotConfigured(u8),

    #[error("Simulated write failure on pin {0}")]
    Simulated(u8),
}

/// Logic level of an output pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    fn as_sysfs(self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

/// Minimal hardware surface: make a pin an output and drive it.
///
/// Writes are synchronous and expected to return promptly.
pub trait Gpio: Send + Sync {
    /// Configure `pin` as an output driven low
    fn configure_output(&self, pin: u8) -> Result<(), GpioError>;

    /// Drive `pin` to `level`
    fn set_pin(&self, pin: u8, level: Level) -> Result<(), GpioError>;
}

/// Build the backend selected in configuration
pub fn from_config(config: &GpioConfig) -> Arc<dyn Gpio> {
    match config.backend {
        GpioBackend::Mock => Arc::new(MockGpio::new()),
        GpioBackend::Sysfs => Arc::new(SysfsGpio::new(config.sysfs_root.clone())),
    }
}

/// In-memory GPIO that remembers the last level written to each pin
#[derive(Debug, Default)]
pub struct MockGpio {
    levels: Mutex<HashMap<u8, Level>>,
    fail_writes: AtomicBool,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `pin`, `None` if the pin was never configured
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pin)
            .copied()
    }

    /// Make every subsequent `set_pin` fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Gpio for MockGpio {
    fn configure_output(&self, pin: u8) -> Result<(), GpioError> {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pin, Level::Low);
        tracing::debug!("mock gpio: pin {} configured as output", pin);
        Ok(())
    }

    fn set_pin(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GpioError::Simulated(pin));
        }

        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        match levels.get_mut(&pin) {
            Some(current) => {
                *current = level;
                tracing::debug!("mock gpio: pin {} -> {:?}", pin, level);
                Ok(())
            }
            None => Err(GpioError::NotConfigured(pin)),
        }
    }
}

/// Linux sysfs GPIO driver
///
/// Uses the legacy `export` / `gpioN/direction` / `gpioN/value` files, which are
/// still available on Raspberry Pi OS and need no extra kernel bindings.
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn write(&self, pin: u8, path: PathBuf, contents: &str) -> Result<(), GpioError> {
        fs::write(&path, contents).map_err(|source| GpioError::Io { pin, source })
    }
}

impl Gpio for SysfsGpio {
    fn configure_output(&self, pin: u8) -> Result<(), GpioError> {
        if !self.pin_dir(pin).exists() {
            self.write(pin, self.root.join("export"), &pin.to_string())?;
        }
        // "low" sets the direction and the initial level in one write
        self.write(pin, self.pin_dir(pin).join("direction"), "low")
    }

    fn set_pin(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let value = self.pin_dir(pin).join("value");
        if !value.exists() {
            return Err(GpioError::NotConfigured(pin));
        }
        self.write(pin, value, level.as_sysfs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_requires_configuration() {
        let gpio = MockGpio::new();
        assert!(matches!(
            gpio.set_pin(12, Level::High),
            Err(GpioError::NotConfigured(12))
        ));

        gpio.configure_output(12).unwrap();
        assert_eq!(gpio.level(12), Some(Level::Low));

        gpio.set_pin(12, Level::High).unwrap();
        assert_eq!(gpio.level(12), Some(Level::High));
    }

    #[test]
    fn test_mock_simulated_failure() {
        let gpio = MockGpio::new();
        gpio.configure_output(13).unwrap();
        gpio.set_fail_writes(true);

        assert!(gpio.set_pin(13, Level::High).is_err());
        assert_eq!(gpio.level(13), Some(Level::Low));

        gpio.set_fail_writes(false);
        assert!(gpio.set_pin(13, Level::High).is_ok());
    }

    #[test]
    fn test_sysfs_writes_files() {
        let root = std::env::temp_dir().join(format!("aroma-gpio-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&root).unwrap();

        // Fake the kernel: exporting would create gpio18/, so create it up front
        fs::create_dir_all(root.join("gpio18")).unwrap();
        fs::write(root.join("gpio18").join("value"), "0").unwrap();

        let gpio = SysfsGpio::new(&root);
        gpio.configure_output(18).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio18/direction")).unwrap(), "low");

        gpio.set_pin(18, Level::High).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio18/value")).unwrap(), "1");

        assert!(matches!(
            gpio.set_pin(19, Level::High),
            Err(GpioError::NotConfigured(19))
        ));

        fs::remove_dir_all(&root).unwrap();
    }
}
