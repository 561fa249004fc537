//! Byte transport to the controller
//!
//! A [`Transport`] moves raw bytes and newline-terminated lines; it knows
//! nothing about GRBL beyond the emergency-stop marker it watches for while
//! draining input.

pub mod serial;

use grblink_core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use serial::{list_ports, SerialPortInfo, SerialTransport};

/// Default baud rate for GRBL 1.1
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default per-read deadline
pub const DEFAULT_TIMEOUT_MS: u64 = 150;

/// Read deadline used while draining input
pub const FLUSH_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Substring GRBL prints while the emergency stop is latched
pub const ESTOP_MARKER: &str = "Estop is activated";

/// Line-oriented byte channel to the controller
pub trait Transport: Send {
    /// Read one line without its terminator.
    ///
    /// Returns `Ok(None)` if nothing arrived before `timeout`. A partial line
    /// still pending at the deadline is returned as-is.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Write bytes and flush them to the device
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Discard everything pending in both directions.
    ///
    /// Fails with `EmergencyStop` if the drained input contains [`ESTOP_MARKER`].
    fn flush_input_discard(&mut self) -> Result<()>;

    /// Deadline used for single-line reads such as status replies
    fn default_timeout(&self) -> Duration;

    /// Device name for logging
    fn name(&self) -> &str;

    /// Release the device; later calls fail with `Closed`
    fn close(&mut self) -> Result<()>;
}

/// Serial connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read deadline in milliseconds
    pub timeout_ms: u64,
    /// Keep DTR low on open so the board is not reset by the open itself
    pub suppress_reset: bool,
}

impl ConnectionParams {
    /// Parameters for `port` with GRBL defaults
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Per-read deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            suppress_reset: true,
        }
    }
}
