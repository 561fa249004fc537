//! grblink Settings Crate
//!
//! Handles driver configuration: file persistence, environment overrides
//! and validation.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, LoggingSettings, MetadataSettings, MotionSettings,
    SessionSettings, ENV_PORT, ENV_SOFT_RELATIVE, ENV_VERBOSE, MOCK_PORT,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
