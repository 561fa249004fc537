//! Serial port transport
//!
//! Opens the controller's USB/RS-232 device with the `serialport` crate and
//! splits the incoming byte stream into lines.
//!
//! Supports:
//! - Port enumeration and discovery
//! - 8N1 framing at a configurable baud rate
//! - Per-read deadlines
//! - Suppressing the reset-on-open most GRBL boards perform

use grblink_core::{ConnectionError, ControllerError, Error, Result};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{ConnectionParams, Transport, ESTOP_MARKER, FLUSH_READ_TIMEOUT};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like CNC controllers
///
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo {
                port_name: port.port_name.clone(),
                description: get_port_description(port),
                manufacturer: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
            }
            info
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(num) = port_name.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Keep the board from resetting when the port opens.
///
/// Opening a tty with HUPCL set toggles DTR, which most Arduino-style GRBL
/// boards wire to reset. Leaving DTR deasserted on open avoids the edge.
#[cfg(unix)]
fn suppress_reset_on_open(builder: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
    builder.dtr_on_open(false)
}

#[cfg(not(unix))]
fn suppress_reset_on_open(builder: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
    builder
}

/// Accumulates bytes and hands out complete lines
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, trimmed
    pub(crate) fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode(&raw))
    }

    /// Whatever is left, even without a terminator
    pub(crate) fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode(&raw))
    }

    /// True if `marker` appears anywhere in the pending bytes
    pub(crate) fn contains(&self, marker: &str) -> bool {
        let marker = marker.as_bytes();
        !marker.is_empty() && self.pending.windows(marker.len()).any(|w| w == marker)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    buffer: LineBuffer,
    timeout: Duration,
}

impl SerialTransport {
    /// Open the device described by `params`
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        if params.baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "baud rate must be positive".to_string(),
            }
            .into());
        }

        let mut builder = serialport::new(&params.port, params.baud_rate)
            .timeout(params.timeout())
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);
        if params.suppress_reset {
            builder = suppress_reset_on_open(builder);
        }

        let port = builder.open().map_err(|e| {
            warn!("Failed to open serial port {}: {}", params.port, e);
            ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(port = %params.port, baud = params.baud_rate, "Serial port opened");

        Ok(Self {
            name: params.port.clone(),
            port: Some(port),
            buffer: LineBuffer::default(),
            timeout: params.timeout(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| ControllerError::Closed.into())
    }

    /// Read whatever arrives within `timeout` into the line buffer.
    /// Returns the number of bytes read.
    fn fill(&mut self, timeout: Duration) -> Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout).map_err(serial_error)?;
        let mut chunk = [0u8; 256];
        match port.read(&mut chunk) {
            Ok(n) => {
                trace!(bytes = n, "rx");
                self.buffer.extend(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn serial_error(e: serialport::Error) -> Error {
    ConnectionError::SerialError {
        reason: e.to_string(),
    }
    .into()
}

impl Transport for SerialTransport {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.buffer.take_line() {
                return Ok(Some(line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.buffer.take_partial());
            }
            self.fill(remaining)?;
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn flush_input_discard(&mut self) -> Result<()> {
        self.port()?
            .clear(serialport::ClearBuffer::All)
            .map_err(serial_error)?;
        self.buffer.clear();

        // Drain anything still in flight, bailing out as soon as an estop shows up
        while self.fill(FLUSH_READ_TIMEOUT)? > 0 {
            if self.buffer.contains(ESTOP_MARKER) {
                let raw = self.buffer.take_partial().unwrap_or_default();
                return Err(ControllerError::EmergencyStop { raw }.into());
            }
        }

        if let Some(text) = self.buffer.take_partial() {
            debug!(discarded = %text, "Flushed input");
        }
        Ok(())
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.name, "Serial port closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cnc_ports() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14101"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_line_buffer_splits_lines() {
        let mut buf = LineBuffer::default();
        buf.extend(b"ok\r\n<Idle|MPos:0.000,0.000,0.000>\r\nGrb");
        assert_eq!(buf.take_line().as_deref(), Some("ok"));
        assert_eq!(
            buf.take_line().as_deref(),
            Some("<Idle|MPos:0.000,0.000,0.000>")
        );
        assert_eq!(buf.take_line(), None);
        buf.extend(b"l 1.1f ['$' for help]\r\n");
        assert_eq!(buf.take_line().as_deref(), Some("Grbl 1.1f ['$' for help]"));
    }

    #[test]
    fn test_line_buffer_partial() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.take_partial(), None);
        buf.extend(b"\r\n");
        assert_eq!(buf.take_line().as_deref(), Some(""));
        buf.extend(b"[MSG:Estop is act");
        assert_eq!(buf.take_partial().as_deref(), Some("[MSG:Estop is act"));
        assert_eq!(buf.take_partial(), None);
    }

    #[test]
    fn test_line_buffer_finds_marker_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.extend(b"ok\r\n[MSG:Estop is ");
        assert!(!buf.contains(ESTOP_MARKER));
        buf.extend(b"activated]\r\n");
        assert!(buf.contains(ESTOP_MARKER));
        assert!(!buf.contains(""));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let params = ConnectionParams::new("/dev/grblink-does-not-exist");
        let err = SerialTransport::open(&params).err().unwrap();
        assert!(err.is_connection_error());
    }
}
