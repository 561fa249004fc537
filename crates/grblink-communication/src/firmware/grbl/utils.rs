//! GRBL Protocol Utilities
//!
//! Command formatting helpers and the single-byte realtime commands.

use grblink_core::{AxisPosition, ControllerError};

/// Realtime command bytes. These bypass the line buffer and get no reply.
pub mod realtime {
    /// Request a status report
    pub const STATUS_QUERY: u8 = b'?';
    /// Cycle start / resume from feed hold
    pub const CYCLE_START: u8 = b'~';
    /// Feed hold
    pub const FEED_HOLD: u8 = b'!';
    /// Soft reset (ctrl-x)
    pub const SOFT_RESET: u8 = 0x18;
    /// Cancel the active jog and flush the jog buffer
    pub const JOG_CANCEL: u8 = 0x85;
}

/// Distance mode for a motion command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    /// `G90`
    Absolute,
    /// `G91`
    Relative,
}

impl DistanceMode {
    /// The G-code word selecting this mode
    pub fn gcode(self) -> &'static str {
        match self {
            DistanceMode::Absolute => "G90",
            DistanceMode::Relative => "G91",
        }
    }
}

/// Format a coordinate with three decimals, the precision GRBL reports
pub fn format_axis(value: f64) -> String {
    format!("{:.3}", value)
}

/// Format every specified axis as ` X1.000 Y2.000`
pub fn format_axes(pos: &AxisPosition) -> String {
    pos.iter()
        .map(|(axis, v)| format!(" {}{}", axis.letter(), format_axis(v)))
        .collect()
}

/// Build the body of a `$J=` jog command, e.g. `G90 X1.000 Y2.000 F1000`.
pub fn jog_body(
    mode: DistanceMode,
    pos: &AxisPosition,
    feed_rate: u32,
) -> Result<String, ControllerError> {
    if pos.is_empty() {
        return Err(ControllerError::invalid("position", "no axis specified"));
    }
    if feed_rate == 0 {
        return Err(ControllerError::invalid("feed_rate", "must be positive"));
    }
    if let Some((axis, v)) = pos.iter().find(|(_, v)| !v.is_finite()) {
        return Err(ControllerError::invalid("position", format!("{} is {}", axis, v)));
    }
    Ok(format!("{}{} F{}", mode.gcode(), format_axes(pos), feed_rate))
}

/// Check if GRBL reports an alarm-like state
pub fn is_error_state(state: &str) -> bool {
    matches!(state, "Alarm" | "Check" | "Door")
}

/// Check if GRBL is moving
pub fn is_running_state(state: &str) -> bool {
    matches!(state, "Run" | "Jog" | "Home")
}
