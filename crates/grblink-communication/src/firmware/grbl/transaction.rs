//! GRBL transaction engine over a byte transport.
//!
//! Writes one command, then reads lines until `ok` or `error:<n>` or the
//! deadline. Data lines in between are the reply.

use grblink_core::{ControllerError, Result};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::link::{Command, GrblLink};
use super::response_parser::{self, LineKind};
use super::utils::realtime;
use crate::communication::Transport;

/// How long a reset takes to produce its first line
pub const RESET_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Window in which the banner must follow
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(1);

/// Substring of the startup banner
pub const BANNER_MARKER: &str = "Grbl";

/// [`GrblLink`] over any [`Transport`]
pub struct SerialLink<T: Transport> {
    transport: T,
    closed: bool,
}

impl<T: Transport> SerialLink<T> {
    /// Wrap an open transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            closed: false,
        }
    }

    /// Access the transport, e.g. to inspect a test double
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ControllerError::Closed.into());
        }
        Ok(())
    }

    /// Read the next non-empty line before `deadline`
    fn next_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.transport.read_line(remaining)? {
                Some(line) if line.is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

fn timeout_error(command: &str, timeout: Duration) -> ControllerError {
    ControllerError::Timeout {
        command: command.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

impl<T: Transport> GrblLink for SerialLink<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    fn send(&mut self, command: &Command) -> Result<Vec<String>> {
        self.ensure_open()?;
        debug!(cmd = %command, "tx");
        let mut wire = command.line.clone().into_bytes();
        wire.push(b'\r');
        self.transport.write(&wire)?;

        let timeout = command
            .timeout
            .unwrap_or_else(|| self.transport.default_timeout());
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let line = self
                .next_line(deadline)?
                .ok_or_else(|| timeout_error(&command.line, timeout))?;
            trace!(line = %line, "rx");
            match response_parser::classify_line(&line) {
                LineKind::Ok => break,
                LineKind::Error { code, message } => {
                    debug!(cmd = %command, code, "Command rejected");
                    return Err(ControllerError::Protocol {
                        command: command.line.clone(),
                        code,
                        message,
                    }
                    .into());
                }
                LineKind::Data(data) => lines.push(command.frame(&data)?),
            }
        }
        Ok(command.check_shape(lines)?)
    }

    fn write_realtime(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        trace!(bytes = ?bytes, "tx realtime");
        self.transport.write(bytes)
    }

    fn query_status(&mut self) -> Result<String> {
        self.ensure_open()?;
        self.transport.write(&[realtime::STATUS_QUERY])?;
        let timeout = self.transport.default_timeout();
        let line = self
            .next_line(Instant::now() + timeout)?
            .ok_or_else(|| timeout_error("?", timeout))?;
        trace!(line = %line, "status");
        Ok(response_parser::unwrap_angled(&line)?.to_string())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.transport.flush_input_discard()
    }

    fn in_reset(&mut self) -> Result<bool> {
        self.ensure_open()?;
        self.transport.write(&[realtime::STATUS_QUERY])?;
        let timeout = self.transport.default_timeout();
        let reply = self.transport.read_line(timeout)?.unwrap_or_default();
        let looks_like_status = reply.len() > 4 && reply.contains('<') && reply.contains('>');
        debug!(reply = %reply, in_reset = !looks_like_status, "Reset probe");
        Ok(!looks_like_status)
    }

    fn reset_recover(&mut self) -> Result<()> {
        self.ensure_open()?;
        let first = self
            .next_line(Instant::now() + RESET_SETTLE_TIMEOUT)?
            .ok_or_else(|| ControllerError::CommsCritical {
                operation: "reset recovery".to_string(),
                attempts: 1,
                reason: "controller produced no output after reset".to_string(),
            })?;

        let deadline = Instant::now() + BANNER_TIMEOUT;
        let mut line = Some(first);
        while let Some(current) = line {
            if current.contains(BANNER_MARKER) {
                info!(banner = %current, "Controller restarted");
                return Ok(());
            }
            line = self.next_line(deadline)?;
        }
        Err(ControllerError::CommsCritical {
            operation: "reset recovery".to_string(),
            attempts: 1,
            reason: "startup banner not seen".to_string(),
        }
        .into())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}
