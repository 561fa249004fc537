//! Firmware implementations
//!
//! Only GRBL 1.1 is supported.

pub mod grbl;
pub mod settings;

pub use settings::{BuildInfo, BuildOption, FirmwareSetting, FirmwareSettings, StartupLine};
