//! In-memory GRBL controller for tests and hardware-free runs.
//!
//! [`SimulatedLink`] implements [`GrblLink`] by interpreting commands against a
//! small machine model: a state token, a machine position and six fixture
//! offsets. Fixture offsets are stored as `f32`, as the firmware does, so the
//! rounding seen on real hardware shows up here too.
//!
//! A [`SimulatorHandle`] shares the model with the test: it can inject faults
//! through a [`FaultPlan`] and inspect counters and the wire log.

use grblink_core::{thread_safe, Axis, AxisPosition, ControllerError, Result, ThreadSafe};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

use super::link::{Command, GrblLink};
use super::response_parser::{self, LineKind};
use super::utils::{format_axis, realtime, DistanceMode};
use crate::communication::ESTOP_MARKER;

/// Machine state as the simulator models it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedState {
    /// Just reset; nothing is answered until recovery
    Reset,
    /// Idle
    Idle,
    /// Jogging
    Jog,
    /// Feed hold
    Hold,
    /// Alarm lock
    Alarm,
}

impl fmt::Display for SimulatedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            SimulatedState::Reset => "Reset",
            SimulatedState::Idle => "Idle",
            SimulatedState::Jog => "Jog",
            SimulatedState::Hold => "Hold",
            SimulatedState::Alarm => "Alarm",
        };
        write!(f, "{}", token)
    }
}

/// Which status queries time out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFault {
    /// Answer every query
    #[default]
    None,
    /// Time out the next `n` queries
    Next(u32),
    /// Time out every query
    Always,
}

/// Faults injected into the simulator
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Status query timeouts
    pub status_timeouts: StatusFault,
    /// Number of homing cycles that end in `ALARM:9`
    pub homing_alarms: u32,
    /// Number of jog commands that time out
    pub jog_timeouts: u32,
    /// Delay between reply lines of one transaction
    pub transaction_delay: Duration,
    /// Stay in `Jog` after a jog until it is cancelled
    pub hold_jogs: bool,
    /// Report a latched emergency stop when input is flushed
    pub emergency_stop: bool,
}

/// Counters kept by the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// `?` queries received
    pub status_queries: u32,
    /// `$H` commands received
    pub homing_cycles: u32,
    /// `~` bytes received
    pub resumes: u32,
    /// Input flushes
    pub flushes: u32,
    /// Jog cancel bytes received
    pub jog_cancels: u32,
    /// Soft reset bytes received
    pub resets: u32,
}

/// Simulator timing and identity
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Name reported by the link
    pub name: String,
    /// Delay before each reply
    pub latency: Duration,
    /// Time a reset takes to complete
    pub reset_settle: Duration,
    /// Whether the controller starts out in reset
    pub start_in_reset: bool,
}

impl SimulatorConfig {
    /// No delays, starts idle
    pub fn instant() -> Self {
        Self {
            latency: Duration::ZERO,
            reset_settle: Duration::ZERO,
            start_in_reset: false,
            ..Self::default()
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            latency: Duration::from_millis(50),
            reset_settle: Duration::from_millis(1400),
            start_in_reset: true,
        }
    }
}

const FIXTURE_SLOTS: usize = 6;

struct SimulatorState {
    state: SimulatedState,
    mpos: AxisPosition,
    offsets: [[f32; 3]; FIXTURE_SLOTS],
    faults: FaultPlan,
    stats: SimulatorStats,
    commands: Vec<String>,
    wire: Vec<String>,
    closed: bool,
}

/// Outcome of interpreting one command
struct Reply {
    lines: Vec<String>,
    terminator: String,
}

impl Reply {
    fn ok(lines: Vec<String>) -> Self {
        Self {
            lines,
            terminator: "ok".to_string(),
        }
    }

    fn error(code: u32) -> Self {
        Self {
            lines: Vec::new(),
            terminator: format!("error:{}", code),
        }
    }
}

fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
        Axis::Z => 2,
    }
}

fn timeout(command: &str) -> ControllerError {
    ControllerError::Timeout {
        command: command.to_string(),
        timeout_ms: 0,
    }
}

/// Parse the `X.. Y.. Z..` words of a command; unknown words fail
fn parse_words(words: &[&str]) -> Option<(AxisPosition, Vec<(char, f64)>)> {
    let mut pos = AxisPosition::new();
    let mut other = Vec::new();
    for word in words {
        let mut chars = word.chars();
        let letter = chars.next()?;
        let value: f64 = chars.as_str().parse().ok()?;
        match Axis::from_letter(letter) {
            Some(axis) => pos.set(axis, value),
            None => other.push((letter.to_ascii_uppercase(), value)),
        }
    }
    Some((pos, other))
}

impl SimulatorState {
    fn new(config: &SimulatorConfig) -> Self {
        Self {
            state: if config.start_in_reset {
                SimulatedState::Reset
            } else {
                SimulatedState::Idle
            },
            mpos: AxisPosition::xyz(0.0, 0.0, 0.0),
            offsets: [[0.0; 3]; FIXTURE_SLOTS],
            faults: FaultPlan::default(),
            stats: SimulatorStats::default(),
            commands: Vec::new(),
            wire: Vec::new(),
            closed: false,
        }
    }

    fn execute(&mut self, line: &str) -> Result<Reply> {
        if self.state == SimulatedState::Reset {
            return Err(timeout(line).into());
        }
        let reply = match line {
            "$H" => self.home(),
            "$X" => {
                if self.state == SimulatedState::Alarm {
                    self.state = SimulatedState::Idle;
                }
                Reply::ok(vec!["[MSG:Caution: Unlocked]".to_string()])
            }
            "$$" => Reply::ok(
                [
                    "$0=10", "$1=25", "$10=1", "$13=0", "$20=0", "$21=0", "$22=1", "$23=0",
                    "$27=1.000", "$110=500.000", "$111=500.000", "$112=500.000",
                    "$130=200.000", "$131=200.000", "$132=200.000",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            "$#" => Reply::ok(self.coordinate_report()),
            "$I" => Reply::ok(vec![
                "[VER:1.1f.20170801:]".to_string(),
                "[OPT:V,15,128]".to_string(),
            ]),
            "$N" => Reply::ok(vec!["$N0=G21 G90".to_string(), "$N1=".to_string()]),
            "$G" => Reply::ok(vec![
                "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]".to_string(),
            ]),
            "$" => Reply::ok(vec!["[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $SLP $C $X $H ~ ! ? ctrl-x]".to_string()]),
            _ => {
                if let Some(body) = line.strip_prefix("$J=") {
                    if self.faults.jog_timeouts > 0 {
                        self.faults.jog_timeouts -= 1;
                        return Err(timeout(line).into());
                    }
                    self.jog(body)
                } else if let Some(rest) = line.strip_prefix("G10 L2 ") {
                    self.set_fixture_offset(rest)
                } else if line.starts_with("$J") {
                    Reply::error(16)
                } else {
                    Reply::error(20)
                }
            }
        };
        Ok(reply)
    }

    fn home(&mut self) -> Reply {
        self.stats.homing_cycles += 1;
        if self.faults.homing_alarms > 0 {
            self.faults.homing_alarms -= 1;
            self.state = SimulatedState::Alarm;
            return Reply::ok(vec!["ALARM:9".to_string()]);
        }
        self.mpos = AxisPosition::xyz(0.0, 0.0, 0.0);
        self.state = SimulatedState::Idle;
        Reply::ok(Vec::new())
    }

    fn jog(&mut self, body: &str) -> Reply {
        if self.state == SimulatedState::Alarm {
            return Reply::error(9);
        }
        let mut mode = DistanceMode::Absolute;
        let mut words = Vec::new();
        for token in body.split_whitespace() {
            match token {
                "G90" => mode = DistanceMode::Absolute,
                "G91" => mode = DistanceMode::Relative,
                other => words.push(other),
            }
        }
        let Some((target, other)) = parse_words(&words) else {
            return Reply::error(16);
        };
        if target.is_empty() {
            return Reply::error(26);
        }
        match other.as_slice() {
            [('F', feed)] if *feed > 0.0 => {}
            [] => return Reply::error(22),
            _ => return Reply::error(16),
        }

        for (axis, v) in target.iter() {
            let current = self.mpos.get(axis).unwrap_or(0.0);
            let next = match mode {
                DistanceMode::Absolute => v,
                DistanceMode::Relative => current + v,
            };
            self.mpos.set(axis, next);
        }
        self.state = if self.faults.hold_jogs {
            SimulatedState::Jog
        } else {
            SimulatedState::Idle
        };
        Reply::ok(Vec::new())
    }

    fn set_fixture_offset(&mut self, rest: &str) -> Reply {
        let words: Vec<&str> = rest.split_whitespace().collect();
        let Some((pos, other)) = parse_words(&words) else {
            return Reply::error(2);
        };
        let slot = match other.as_slice() {
            [('P', p)] if (1.0..=FIXTURE_SLOTS as f64).contains(p) && p.fract() == 0.0 => {
                *p as usize - 1
            }
            _ => return Reply::error(28),
        };
        for (axis, v) in pos.iter() {
            self.offsets[slot][axis_index(axis)] = v as f32;
        }
        Reply::ok(Vec::new())
    }

    fn coordinate_report(&self) -> Vec<String> {
        let fmt3 = |v: [f32; 3]| {
            v.iter()
                .map(|c| format_axis(*c as f64))
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut lines: Vec<String> = self
            .offsets
            .iter()
            .enumerate()
            .map(|(i, slot)| format!("[G{}:{}]", 54 + i, fmt3(*slot)))
            .collect();
        lines.push("[G28:0.000,0.000,0.000]".to_string());
        lines.push("[G30:0.000,0.000,0.000]".to_string());
        lines.push("[G92:0.000,0.000,0.000]".to_string());
        lines.push("[TLO:0.000]".to_string());
        lines.push("[PRB:0.000,0.000,0.000:0]".to_string());
        lines
    }

    fn status_report(&self) -> String {
        let coords: Vec<String> = Axis::ALL
            .iter()
            .map(|a| format_axis(self.mpos.get(*a).unwrap_or(0.0)))
            .collect();
        format!("{}|MPos:{}|FS:0,0", self.state, coords.join(","))
    }

    fn realtime(&mut self, byte: u8) {
        match byte {
            realtime::JOG_CANCEL => {
                self.stats.jog_cancels += 1;
                if self.state == SimulatedState::Jog {
                    self.state = SimulatedState::Idle;
                }
            }
            realtime::CYCLE_START => {
                self.stats.resumes += 1;
                if self.state == SimulatedState::Hold {
                    self.state = SimulatedState::Idle;
                }
            }
            realtime::FEED_HOLD => {
                if self.state == SimulatedState::Jog {
                    self.state = SimulatedState::Hold;
                }
            }
            realtime::SOFT_RESET => {
                self.stats.resets += 1;
                self.state = SimulatedState::Reset;
            }
            other => trace!(byte = other, "Ignoring realtime byte"),
        }
    }
}

/// Simulated controller link
pub struct SimulatedLink {
    config: SimulatorConfig,
    shared: ThreadSafe<SimulatorState>,
}

impl SimulatedLink {
    /// Create a simulator
    pub fn new(config: SimulatorConfig) -> Self {
        let shared = thread_safe(SimulatorState::new(&config));
        Self { config, shared }
    }

    /// Handle sharing this simulator's model
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            shared: self.shared.clone(),
        }
    }

    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn ensure_open(state: &SimulatorState) -> Result<()> {
        if state.closed {
            return Err(ControllerError::Closed.into());
        }
        Ok(())
    }
}

impl GrblLink for SimulatedLink {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send(&mut self, command: &Command) -> Result<Vec<String>> {
        let (reply, delay) = {
            let mut sim = self.shared.lock();
            Self::ensure_open(&sim)?;
            sim.wire.push(format!("tx:{}", command.line));
            sim.commands.push(command.line.clone());
            let reply = sim.execute(&command.line)?;
            (reply, sim.faults.transaction_delay)
        };
        self.pause(self.config.latency);

        let mut lines = Vec::with_capacity(reply.lines.len());
        for line in &reply.lines {
            self.shared.lock().wire.push(format!("rx:{}", line));
            self.pause(delay);
            lines.push(command.frame(line)?);
        }
        self.shared
            .lock()
            .wire
            .push(format!("rx:{}", reply.terminator));

        match response_parser::classify_line(&reply.terminator) {
            LineKind::Error { code, message } => Err(ControllerError::Protocol {
                command: command.line.clone(),
                code,
                message,
            }
            .into()),
            _ => Ok(command.check_shape(lines)?),
        }
    }

    fn write_realtime(&mut self, bytes: &[u8]) -> Result<()> {
        let mut sim = self.shared.lock();
        Self::ensure_open(&sim)?;
        for byte in bytes {
            sim.realtime(*byte);
        }
        Ok(())
    }

    fn query_status(&mut self) -> Result<String> {
        let report = {
            let mut sim = self.shared.lock();
            Self::ensure_open(&sim)?;
            sim.stats.status_queries += 1;
            sim.wire.push("tx:?".to_string());
            let fail = match sim.faults.status_timeouts {
                StatusFault::Always => true,
                StatusFault::Next(n) if n > 0 => {
                    sim.faults.status_timeouts = StatusFault::Next(n - 1);
                    true
                }
                _ => sim.state == SimulatedState::Reset,
            };
            if fail {
                return Err(timeout("?").into());
            }
            let report = sim.status_report();
            sim.wire.push(format!("rx:<{}>", report));
            report
        };
        self.pause(self.config.latency);
        Ok(report)
    }

    fn flush(&mut self) -> Result<()> {
        let mut sim = self.shared.lock();
        Self::ensure_open(&sim)?;
        sim.stats.flushes += 1;
        if sim.faults.emergency_stop {
            return Err(ControllerError::EmergencyStop {
                raw: format!("[MSG:{}!]", ESTOP_MARKER),
            }
            .into());
        }
        Ok(())
    }

    fn in_reset(&mut self) -> Result<bool> {
        let sim = self.shared.lock();
        Self::ensure_open(&sim)?;
        Ok(sim.state == SimulatedState::Reset)
    }

    fn reset_recover(&mut self) -> Result<()> {
        Self::ensure_open(&self.shared.lock())?;
        debug!("Simulated reset settling");
        self.pause(self.config.reset_settle);
        self.shared.lock().state = SimulatedState::Idle;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.lock().closed = true;
        Ok(())
    }
}

/// Test-side view of a [`SimulatedLink`]
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: ThreadSafe<SimulatorState>,
}

impl SimulatorHandle {
    /// Replace the fault plan
    pub fn set_faults(&self, faults: FaultPlan) {
        self.shared.lock().faults = faults;
    }

    /// Edit the fault plan in place
    pub fn update_faults(&self, f: impl FnOnce(&mut FaultPlan)) {
        f(&mut self.shared.lock().faults);
    }

    /// Counter snapshot
    pub fn stats(&self) -> SimulatorStats {
        self.shared.lock().stats.clone()
    }

    /// Current machine state
    pub fn state(&self) -> SimulatedState {
        self.shared.lock().state
    }

    /// Force a machine state
    pub fn set_state(&self, state: SimulatedState) {
        self.shared.lock().state = state;
    }

    /// Current machine position
    pub fn position(&self) -> AxisPosition {
        self.shared.lock().mpos.clone()
    }

    /// Move the machine without a command
    pub fn set_position(&self, pos: &AxisPosition) {
        let mut sim = self.shared.lock();
        for (axis, v) in pos.iter() {
            sim.mpos.set(axis, v);
        }
    }

    /// Fixture offset slot `p` (1 is G54) as stored
    pub fn fixture_offset(&self, p: usize) -> Option<[f32; 3]> {
        p.checked_sub(1)
            .and_then(|i| self.shared.lock().offsets.get(i).copied())
    }

    /// Every line-mode command received, in order
    pub fn commands(&self) -> Vec<String> {
        self.shared.lock().commands.clone()
    }

    /// Wire log: `tx:` and `rx:` entries in the order they happened
    pub fn wire(&self) -> Vec<String> {
        self.shared.lock().wire.clone()
    }

    /// Forget logged commands and wire entries
    pub fn clear_log(&self) {
        let mut sim = self.shared.lock();
        sim.commands.clear();
        sim.wire.clear();
    }

    /// True once the link was closed
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}
