//! Configuration for grblink
//!
//! Provides configuration file handling, environment overrides, and validation.
//! Supports JSON and TOML file formats, stored by default in the platform
//! config directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, baud rate, read deadline)
//! - Session policy (retries, homing attempts, timeouts)
//! - Motion adapter defaults (feed rates, homing on connect)
//! - Metadata magic
//! - Logging

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Port name that selects the built-in simulator
pub const MOCK_PORT: &str = "mock";

/// Environment variable naming the serial port
pub const ENV_PORT: &str = "GRBL_PORT";

/// Environment variable setting the log verbosity
pub const ENV_VERBOSE: &str = "GRBL_VERBOSE";

/// Environment variable choosing soft (1) or hard (0) relative moves
pub const ENV_SOFT_RELATIVE: &str = "GRBL_SOFT_RELATIVE";

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial device, or `mock` for the simulator. No default: it must be given.
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read deadline in milliseconds
    pub timeout_ms: u64,
    /// Keep DTR low on open
    pub suppress_reset: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            timeout_ms: 150,
            suppress_reset: true,
        }
    }
}

impl ConnectionSettings {
    /// True when the configured port selects the simulator
    pub fn is_mock(&self) -> bool {
        self.port.as_deref() == Some(MOCK_PORT)
    }
}

/// Controller session policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Probe for a controller stuck in reset on connect
    pub probe_reset: bool,
    /// Soft reset the controller on connect
    pub reset_on_open: bool,
    /// Attempts for status queries, moves and recovery
    pub retries: u32,
    /// `$H` attempts
    pub homing_attempts: u32,
    pub cancel_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub idle_poll_interval_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            probe_reset: true,
            reset_on_open: false,
            retries: 3,
            homing_attempts: 8,
            cancel_timeout_ms: 500,
            stop_timeout_ms: 5_000,
            idle_poll_interval_ms: 100,
            idle_timeout_ms: 120_000,
        }
    }
}

/// Motion adapter defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Feed rate for moves, mm/min
    pub feed_rate: u32,
    /// Feed rate for jogs, mm/min
    pub jog_rate: u32,
    /// Home when connecting
    pub home_on_connect: bool,
    /// Skip homing if the controller is already Idle
    pub lazy_homing: bool,
    /// Relative moves are sent as absolute targets
    pub soft_relative: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            feed_rate: 1000,
            jog_rate: 1000,
            home_on_connect: true,
            lazy_homing: true,
            soft_relative: true,
        }
    }
}

/// Identity metadata settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Marker written next to the model; each part at most 99
    pub magic: [u8; 3],
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self { magic: [12, 9, 68] }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 0 is info, 1 debug, 2 and above trace
    pub verbosity: u8,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

/// Complete driver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Session policy
    pub session: SessionSettings,
    /// Motion adapter defaults
    pub motion: MotionSettings,
    /// Metadata settings
    pub metadata: MetadataSettings,
    /// Logging
    pub logging: LoggingSettings,
}

#[derive(Clone, Copy)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("none").to_string()).into()),
    }
}

fn parse_flag(key: &str, value: &str) -> SettingsResult<bool> {
    match value.trim().parse::<i64>() {
        Ok(n) => Ok(n != 0),
        Err(_) => Err(SettingsError::invalid(key, format!("expected an integer, got '{}'", value))),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/grblink/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("grblink").join("config.toml"))
            .ok_or_else(|| SettingsError::ConfigDirectory("no config directory on this platform".to_string()))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise the defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Apply `GRBL_PORT`, `GRBL_VERBOSE` and `GRBL_SOFT_RELATIVE` from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> SettingsResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT).filter(|p| !p.is_empty()) {
            self.connection.port = Some(port);
        }
        if let Some(verbose) = lookup(ENV_VERBOSE) {
            self.logging.verbosity = verbose.trim().parse().map_err(|_| {
                SettingsError::invalid(ENV_VERBOSE, format!("expected 0-255, got '{}'", verbose))
            })?;
        }
        if let Some(soft) = lookup(ENV_SOFT_RELATIVE) {
            self.motion.soft_relative = parse_flag(ENV_SOFT_RELATIVE, &soft)?;
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> SettingsResult<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.port.as_deref() == Some("") {
            return Err(SettingsError::invalid("connection.port", "must not be empty"));
        }
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.timeout_ms == 0 {
            return Err(SettingsError::invalid("connection.timeout_ms", "must be > 0"));
        }

        if self.session.retries == 0 {
            return Err(SettingsError::invalid("session.retries", "must be > 0"));
        }
        if self.session.homing_attempts == 0 {
            return Err(SettingsError::invalid("session.homing_attempts", "must be > 0"));
        }
        if self.session.idle_poll_interval_ms == 0 {
            return Err(SettingsError::invalid("session.idle_poll_interval_ms", "must be > 0"));
        }

        if self.motion.feed_rate == 0 || self.motion.jog_rate == 0 {
            return Err(SettingsError::invalid("motion", "feed rates must be > 0"));
        }

        if let Some(v) = self.metadata.magic.iter().find(|v| **v > 99) {
            return Err(ConfigError::ValueOutOfRange {
                key: "metadata.magic".to_string(),
                value: v.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Serial port, failing if none was configured
    pub fn require_port(&self) -> SettingsResult<&str> {
        self.connection.port.as_deref().ok_or_else(|| {
            SettingsError::invalid(
                "connection.port",
                format!("no serial port configured (set {} or pass --port)", ENV_PORT),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.connection.port, None);
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.session.retries, 3);
        assert_eq!(config.session.homing_attempts, 8);
        assert!(config.motion.soft_relative);
        assert_eq!(config.metadata.magic, [12, 9, 68]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new();
        config
            .apply_env_overrides(env(&[
                ("GRBL_PORT", "/dev/ttyUSB1"),
                ("GRBL_VERBOSE", "2"),
                ("GRBL_SOFT_RELATIVE", "0"),
            ]))
            .unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.logging.verbosity, 2);
        assert!(!config.motion.soft_relative);
    }

    #[test]
    fn test_env_overrides_absent() {
        let mut config = Config::new();
        config.apply_env_overrides(env(&[])).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::new();
        let err = config
            .apply_env_overrides(env(&[("GRBL_SOFT_RELATIVE", "yes")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidSetting { .. }));

        let err = config
            .apply_env_overrides(env(&[("GRBL_VERBOSE", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("GRBL_VERBOSE"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::new();
        config.metadata.magic = [12, 100, 68];
        assert!(matches!(
            config.validate().unwrap_err(),
            SettingsError::Config(ConfigError::ValueOutOfRange { .. })
        ));

        let mut config = Config::new();
        config.session.retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.connection.port = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_port() {
        let mut config = Config::new();
        assert!(config.require_port().is_err());
        config.connection.port = Some(MOCK_PORT.to_string());
        assert_eq!(config.require_port().unwrap(), "mock");
        assert!(config.connection.is_mock());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyACM0"

            [session]
            retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.session.retries, 5);
        assert_eq!(config.session.homing_attempts, 8);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Config::new()
            .save_to_file(Path::new("config.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::UnsupportedFormat(_))
        ));
    }
}
