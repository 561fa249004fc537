//! Firmware settings dump
//!
//! Holds the `$n=value` lines returned by `$$`, keyed by setting number,
//! plus the decoded `$I` build info and `$N` startup blocks.

use grblink_core::ControllerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::firmware::grbl::{error_decoder, response_parser};

/// A firmware setting parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareSetting {
    /// Setting number (`$22` is 22)
    pub number: u16,
    /// Value as reported
    pub value: String,
    /// Description, when the number is a known GRBL 1.1 setting
    pub description: Option<String>,
}

impl FirmwareSetting {
    /// Value parsed as a number
    pub fn numeric(&self) -> Option<f64> {
        self.value.parse().ok()
    }
}

/// All settings reported by one `$$` dump
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmwareSettings {
    settings: BTreeMap<u16, FirmwareSetting>,
}

impl FirmwareSettings {
    /// Create an empty settings set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the data lines of a `$$` transaction
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self, ControllerError> {
        let mut out = Self::new();
        for line in lines {
            let line: &str = line.as_ref();
            let (number, value) = response_parser::parse_setting(line)
                .ok_or_else(|| ControllerError::malformed(line, "expected $n=value"))?;
            out.add_setting(FirmwareSetting {
                number,
                value,
                description: error_decoder::describe_setting(number).map(str::to_string),
            });
        }
        Ok(out)
    }

    /// Add a setting
    pub fn add_setting(&mut self, setting: FirmwareSetting) {
        self.settings.insert(setting.number, setting);
    }

    /// Get a setting by number
    pub fn get(&self, number: u16) -> Option<&FirmwareSetting> {
        self.settings.get(&number)
    }

    /// Iterate in setting-number order
    pub fn iter(&self) -> impl Iterator<Item = &FirmwareSetting> {
        self.settings.values()
    }

    /// Number of settings
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// True when no setting was reported
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// True when `$22` reports homing enabled
    pub fn homing_enabled(&self) -> bool {
        self.get(22).and_then(FirmwareSetting::numeric) == Some(1.0)
    }
}

/// One compile-time option letter from `[OPT:...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOption {
    /// Letter as reported
    pub code: char,
    /// Option name, `None` for letters this decoder does not know
    pub name: Option<String>,
}

/// Decoded `$I` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Version string from `[VER:...]`, trailing build-info text included
    pub version: String,
    /// Enabled compile-time options
    pub options: Vec<BuildOption>,
    /// Planner block buffer size
    pub planner_blocks: Option<u32>,
    /// Serial RX buffer size in bytes
    pub rx_buffer: Option<u32>,
    /// Lines that are neither `VER` nor `OPT`
    pub other: Vec<String>,
}

impl BuildInfo {
    /// Parse the unbracketed data lines of a `$I` transaction
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self, ControllerError> {
        let mut info = Self::default();
        for line in lines {
            let line: &str = line.as_ref();
            if let Some(version) = line.strip_prefix("VER:") {
                info.version = version.to_string();
            } else if let Some(opt) = line.strip_prefix("OPT:") {
                let mut fields = opt.split(',');
                let letters = fields.next().unwrap_or_default();
                info.options = letters
                    .chars()
                    .map(|code| BuildOption {
                        code,
                        name: error_decoder::decode_build_option(code).map(str::to_string),
                    })
                    .collect();
                let mut sizes = fields.map(|f| {
                    f.trim()
                        .parse::<u32>()
                        .map_err(|_| ControllerError::malformed(line, "bad buffer size"))
                });
                info.planner_blocks = sizes.next().transpose()?;
                info.rx_buffer = sizes.next().transpose()?;
            } else {
                info.other.push(line.to_string());
            }
        }
        if info.version.is_empty() {
            return Err(ControllerError::malformed("$I", "no VER line"));
        }
        Ok(info)
    }

    /// Names of the recognised options
    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.options.iter().filter_map(|o| o.name.as_deref())
    }

    /// True if option letter `code` is enabled
    pub fn has_option(&self, code: char) -> bool {
        self.options.iter().any(|o| o.code == code)
    }
}

/// A `$Nx=line` startup block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupLine {
    /// Slot number
    pub index: u8,
    /// Stored G-code block, empty when unused
    pub block: String,
}

impl StartupLine {
    /// Parse the data lines of a `$N` transaction
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Self>, ControllerError> {
        lines
            .iter()
            .map(|line| {
                let line: &str = line.as_ref();
                line.strip_prefix("$N")
                    .and_then(|rest| rest.split_once('='))
                    .and_then(|(index, block)| {
                        Some(StartupLine {
                            index: index.parse().ok()?,
                            block: block.to_string(),
                        })
                    })
                    .ok_or_else(|| ControllerError::malformed(line, "expected $Nx=line"))
            })
            .collect()
    }

    /// True when the slot holds no block
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}
