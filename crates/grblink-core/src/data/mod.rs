//! Data models for positions, status, and controller identity
//!
//! This module provides:
//! - Axis identifiers for the three linear axes GRBL drives
//! - Sparse axis positions (any subset of X, Y, Z) in millimeters
//! - Controller status snapshots produced by status polling
//! - The identity record stored in the controller's fixture offsets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ControllerError;

/// Linear machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
}

impl Axis {
    /// All axes in wire order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Upper-case G-code word letter for this axis
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    /// Resolve an axis from its letter, either case
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_lowercase())
    }
}

impl FromStr for Axis {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                Axis::from_letter(c).ok_or_else(|| ControllerError::invalid("axis", s))
            }
            _ => Err(ControllerError::invalid("axis", s)),
        }
    }
}

/// Position over a subset of axes, in millimeters
///
/// Axes that are absent are "unspecified": a move leaves them where they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisPosition {
    axes: BTreeMap<Axis, f64>,
}

impl AxisPosition {
    /// Create an empty position (no axis specified)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fully specified XYZ position
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self::new().with(Axis::X, x).with(Axis::Y, y).with(Axis::Z, z)
    }

    /// Builder-style setter
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    /// Set one axis
    pub fn set(&mut self, axis: Axis, value: f64) {
        debug_assert!(value.is_finite(), "axis {axis} must be finite: {value}");
        self.axes.insert(axis, value);
    }

    /// Value of one axis, if specified
    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.axes.get(&axis).copied()
    }

    /// Iterate over specified axes in X, Y, Z order
    pub fn iter(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        self.axes.iter().map(|(a, v)| (*a, *v))
    }

    /// Number of specified axes
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// True when no axis is specified
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Add `delta` to this position for every axis `delta` specifies.
    ///
    /// The result only carries the axes present in `delta`; fails if this
    /// position does not know one of them.
    pub fn offset_by(&self, delta: &AxisPosition) -> Result<AxisPosition, ControllerError> {
        let mut out = AxisPosition::new();
        for (axis, d) in delta.iter() {
            let base = self.get(axis).ok_or_else(|| {
                ControllerError::invalid("position", format!("axis {axis} is not known"))
            })?;
            out.set(axis, base + d);
        }
        Ok(out)
    }
}

impl fmt::Display for AxisPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (axis, v) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}:{:.3}", axis.letter(), v)?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(Axis, f64)> for AxisPosition {
    fn from_iter<I: IntoIterator<Item = (Axis, f64)>>(iter: I) -> Self {
        let mut pos = AxisPosition::new();
        for (axis, v) in iter {
            pos.set(axis, v);
        }
        pos
    }
}

/// Snapshot produced by a status query
///
/// `state` is the controller's motion-state token (Idle, Jog, Run, Alarm, ...).
/// Only `Idle` carries meaning for the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Motion-state token as reported
    pub state: String,
    /// Machine position
    pub mpos: AxisPosition,
    /// Remaining report fields (`FS:0,0`, `WCO:...`), unparsed
    pub telemetry: Vec<String>,
}

impl ControllerStatus {
    /// The only state that means "motion complete"
    pub const IDLE: &'static str = "Idle";

    /// True when the controller reports `Idle`
    pub fn is_idle(&self) -> bool {
        self.state == Self::IDLE
    }

    /// Look up a telemetry field by prefix, e.g. `"FS"`
    pub fn telemetry_field(&self, name: &str) -> Option<&str> {
        self.telemetry.iter().find_map(|field| {
            field
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.state, self.mpos)
    }
}

/// Identity record stored on the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Unit serial number, at most six characters
    pub serial_number: String,
    /// Model string, at most six characters
    pub model: String,
}

impl MetadataRecord {
    /// Maximum length of either field
    pub const FIELD_LEN: usize = 6;

    /// Create a record
    pub fn new(serial_number: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model={} sn={}", self.model, self.serial_number)
    }
}
