//! # Emulator Configuration
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [emulator]
//! module = "target/debug/libteensy_firmware.so"
//! sd_root = "/tmp/sdcard"
//! loop_pacing_us = 16666
//! teardown_grace_ms = 250
//!
//! [pins]
//! backlight = 9
//! button = 17
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every field is optional; a missing section falls back to its defaults.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the emulator, its wiring and its logging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmulatorConfig {
    #[serde(default)]
    pub emulator: RuntimeConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Module runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Firmware module loaded at startup.
    #[serde(default)]
    pub module: Option<String>,
    /// Host directory backing the emulated SD card.
    #[serde(default)]
    pub sd_root: Option<String>,
    /// Idle sleep after every `loop()` call of the driver thread.
    #[serde(default = "default_loop_pacing_us")]
    pub loop_pacing_us: u64,
    /// How long teardown waits for each timer or driver thread to exit.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module: None,
            sd_root: None,
            loop_pacing_us: default_loop_pacing_us(),
            teardown_grace_ms: default_teardown_grace_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn loop_pacing(&self) -> Duration {
        Duration::from_micros(self.loop_pacing_us)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

/// Pins the console shell wires to its own controls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PinConfig {
    #[serde(default = "default_backlight_pin")]
    pub backlight: i32,
    #[serde(default = "default_button_pin")]
    pub button: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            backlight: default_backlight_pin(),
            button: default_button_pin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

impl EmulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emulator.loop_pacing_us == 0 {
            return Err(ConfigError::Invalid(
                "emulator.loop_pacing_us must be > 0".to_string(),
            ));
        }
        self.logging.max_level()?;
        Ok(())
    }
}

// Default value functions
fn default_loop_pacing_us() -> u64 { 16_666 }
fn default_teardown_grace_ms() -> u64 { 250 }
fn default_backlight_pin() -> i32 { 9 }
fn default_button_pin() -> i32 { 17 }
fn default_log_level() -> String { "info".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<EmulatorConfig, ConfigError> {
    let config: EmulatorConfig = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Config file '{}' rejected: {}", path, e);
        return Err(e);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: EmulatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.emulator.loop_pacing_us, 16_666);
        assert_eq!(config.emulator.teardown_grace(), Duration::from_millis(250));
        assert_eq!(config.pins.backlight, 9);
        assert_eq!(config.pins.button, 17);
        assert!(config.emulator.module.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: EmulatorConfig = toml::from_str(
            r#"
            [emulator]
            sd_root = "/tmp/sd"
            loop_pacing_us = 1000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.emulator.sd_root.as_deref(), Some("/tmp/sd"));
        assert_eq!(config.emulator.loop_pacing(), Duration::from_millis(1));
        assert_eq!(config.logging.max_level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(config.pins.button, 17);
    }

    #[test]
    fn test_validate_rejects_zero_pacing_and_bad_level() {
        let mut config = EmulatorConfig::default();
        config.emulator.loop_pacing_us = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EmulatorConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
