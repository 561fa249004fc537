//! Command model and the link abstraction the controller session drives.
//!
//! A [`GrblLink`] executes one [`Command`] at a time and returns its data
//! lines. [`SerialLink`](super::transaction::SerialLink) does this over a real
//! transport; [`SimulatedLink`](super::simulator::SimulatedLink) answers from an
//! in-memory model. Everything above this trait is shared.

use grblink_core::{ControllerError, Result};
use std::fmt;
use std::time::Duration;

use super::response_parser;
use super::utils::realtime;

/// Deadline for a homing cycle
pub const HOMING_TIMEOUT: Duration = Duration::from_secs(120);

/// How many data lines a command must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any number
    Lines,
    /// Exactly this many
    Exactly(usize),
}

impl Expect {
    /// Commands that answer with a bare `ok`
    pub const NONE: Expect = Expect::Exactly(0);
    /// Commands that answer with a single line
    pub const ONE: Expect = Expect::Exactly(1);
}

/// Post-processing applied to each data line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Keep lines as received
    Raw,
    /// Strip `[` and `]`
    Bracketed,
}

/// One line-mode command and what its reply must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Text sent to the controller, without terminator
    pub line: String,
    /// Expected number of data lines
    pub expect: Expect,
    /// Framing of the data lines
    pub framing: Framing,
    /// Overrides the link's default deadline
    pub timeout: Option<Duration>,
}

impl Command {
    /// A command accepting any number of raw data lines
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            expect: Expect::Lines,
            framing: Framing::Raw,
            timeout: None,
        }
    }

    /// Require a number of data lines
    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    /// Strip brackets from every data line
    pub fn bracketed(mut self) -> Self {
        self.framing = Framing::Bracketed;
        self
    }

    /// Use a longer or shorter deadline than the link default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply the framing to one data line
    pub fn frame(&self, line: &str) -> std::result::Result<String, ControllerError> {
        match self.framing {
            Framing::Raw => Ok(line.to_string()),
            Framing::Bracketed => response_parser::unwrap_bracketed(line).map(str::to_string),
        }
    }

    /// Enforce the expected line count on a completed reply
    pub fn check_shape(&self, lines: Vec<String>) -> std::result::Result<Vec<String>, ControllerError> {
        match self.expect {
            Expect::Exactly(n) if lines.len() != n => Err(ControllerError::malformed(
                lines.join(" | "),
                format!(
                    "'{}' expected {} line(s), got {}",
                    self.line,
                    n,
                    lines.len()
                ),
            )),
            _ => Ok(lines),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}

/// A GRBL connection able to run one transaction at a time.
///
/// Callers hold `&mut self` for the whole transaction; the controller session
/// wraps the link in a mutex so transactions never interleave on the wire.
pub trait GrblLink: Send {
    /// Device name for logging
    fn name(&self) -> &str;

    /// Send a line-mode command and collect its data lines up to the terminator
    fn send(&mut self, command: &Command) -> Result<Vec<String>>;

    /// Send realtime bytes; no reply is read
    fn write_realtime(&mut self, bytes: &[u8]) -> Result<()>;

    /// Send `?` and return the status report with its `<` `>` removed
    fn query_status(&mut self) -> Result<String>;

    /// Discard pending input, failing on an emergency stop marker
    fn flush(&mut self) -> Result<()>;

    /// Probe with `?`: true unless the reply looks like a status report
    fn in_reset(&mut self) -> Result<bool>;

    /// Wait for the controller to come back from a reset and print its banner
    fn reset_recover(&mut self) -> Result<()>;

    /// Release the link
    fn close(&mut self) -> Result<()>;

    /// `$J=<body>`, answered by a bare `ok`
    fn jog(&mut self, body: &str) -> Result<()> {
        self.send(&Command::new(format!("$J={}", body)).expect(Expect::NONE))
            .map(|_| ())
    }

    /// `$H`; any `ALARM` line in the reply is a homing failure
    fn home(&mut self) -> Result<()> {
        let lines = self.send(&Command::new("$H").timeout(HOMING_TIMEOUT))?;
        match lines.iter().find(|l| l.to_ascii_uppercase().contains("ALARM")) {
            Some(alarm) => {
                let reason = match response_parser::parse_alarm(alarm) {
                    Some(code) => super::error_decoder::format_alarm(code),
                    None => alarm.clone(),
                };
                Err(ControllerError::HomingFailed {
                    attempts: 1,
                    reason,
                }
                .into())
            }
            None => Ok(()),
        }
    }

    /// `$X`, clear an alarm lock. GRBL may answer with a `[MSG:...]` line.
    fn unlock(&mut self) -> Result<()> {
        self.send(&Command::new("$X")).map(|_| ())
    }

    /// `$$`, raw setting lines
    fn settings(&mut self) -> Result<Vec<String>> {
        self.send(&Command::new("$$"))
    }

    /// `$#`, coordinate system lines without brackets
    fn coordinate_systems(&mut self) -> Result<Vec<String>> {
        self.send(&Command::new("$#").bracketed())
    }

    /// `$I`, build info lines without brackets
    fn build_info(&mut self) -> Result<Vec<String>> {
        self.send(&Command::new("$I").bracketed())
    }

    /// `$N`, the stored startup blocks as reported
    fn startup_lines(&mut self) -> Result<Vec<String>> {
        self.send(&Command::new("$N"))
    }

    /// `$G`, the parser state without brackets
    fn parser_state(&mut self) -> Result<String> {
        let mut lines = self.send(&Command::new("$G").bracketed().expect(Expect::ONE))?;
        Ok(lines.remove(0))
    }

    /// `$`, the help line without brackets
    fn help(&mut self) -> Result<String> {
        let mut lines = self.send(&Command::new("$").bracketed().expect(Expect::ONE))?;
        Ok(lines.remove(0))
    }

    /// Realtime jog cancel
    fn cancel_jog(&mut self) -> Result<()> {
        self.write_realtime(&[realtime::JOG_CANCEL])
    }

    /// Realtime cycle start / resume
    fn resume(&mut self) -> Result<()> {
        self.write_realtime(&[realtime::CYCLE_START])
    }

    /// Realtime feed hold
    fn feed_hold(&mut self) -> Result<()> {
        self.write_realtime(&[realtime::FEED_HOLD])
    }

    /// Realtime soft reset
    fn soft_reset(&mut self) -> Result<()> {
        self.write_realtime(&[realtime::SOFT_RESET])
    }
}
