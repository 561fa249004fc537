//! GRBL Controller Session
//!
//! [`GrblController`] owns one [`GrblLink`] and turns its single transactions
//! into robust machine operations: status polling with retries, absolute and
//! relative moves, jogging, cancel and stop, homing, recovery and reset, and
//! identity metadata.
//!
//! Every public operation takes the session lock for its whole duration, so
//! transactions from different threads never interleave on the wire.
//! The position cache and last status are updated under the same lock.

use grblink_core::{
    AxisPosition, ControllerError, ControllerStatus, DataCallback, Error, MetadataRecord, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::link::{Command, GrblLink};
use super::metadata::{self, MetadataMagic};
use super::status_parser;
use super::utils::{self, DistanceMode};
use crate::firmware::settings::{BuildInfo, FirmwareSettings, StartupLine};

/// How a relative move is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeStrategy {
    /// Add the delta to the cached position and send an absolute move.
    /// A lost or repeated command cannot compound.
    #[default]
    Soft,
    /// Send `G91` to the controller
    Hard,
}

/// Homing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomingMode {
    /// Skip homing when the controller already reports Idle
    pub lazy: bool,
    /// Home without checking the status first
    pub force: bool,
}

impl Default for HomingMode {
    fn default() -> Self {
        Self {
            lazy: true,
            force: false,
        }
    }
}

/// Result of a homing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingOutcome {
    /// Controller was already Idle; nothing was sent
    AlreadyIdle,
    /// Homing completed
    Homed {
        /// `$H` commands sent
        attempts: u32,
    },
}

/// Session policy
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Check for a controller stuck in reset when the session starts
    pub probe_reset: bool,
    /// Soft reset the controller when the session starts
    pub reset_on_open: bool,
    /// Default relative move strategy
    pub relative_strategy: RelativeStrategy,
    /// Attempts for status queries, moves, recovery and jog cancel
    pub retries: u32,
    /// `$H` attempts before giving up
    pub homing_attempts: u32,
    /// Deadline for one jog cancel attempt
    pub cancel_timeout: Duration,
    /// Deadline for [`GrblController::stop`]
    pub stop_timeout: Duration,
    /// Status poll interval while waiting for Idle
    pub idle_poll_interval: Duration,
    /// Deadline for a blocking move to reach Idle
    pub idle_timeout: Duration,
    /// Marker identifying stored metadata
    pub metadata_magic: MetadataMagic,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_reset: true,
            reset_on_open: false,
            relative_strategy: RelativeStrategy::Soft,
            retries: 3,
            homing_attempts: 8,
            cancel_timeout: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(5),
            idle_poll_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(120),
            metadata_magic: MetadataMagic::default(),
        }
    }
}

fn critical(operation: &str, attempts: u32, last: Option<Error>) -> Error {
    ControllerError::CommsCritical {
        operation: operation.to_string(),
        attempts,
        reason: last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string()),
    }
    .into()
}

/// Identifies one installed status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCallbackId(u64);

/// State guarded by the session lock
struct GrblControllerState {
    link: Option<Box<dyn GrblLink>>,
    config: ControllerConfig,
    pos_cache: Option<AxisPosition>,
    last_status: Option<ControllerStatus>,
    status_callback: Option<(StatusCallbackId, DataCallback<ControllerStatus>)>,
    next_callback_id: u64,
}

impl GrblControllerState {
    fn link(&mut self) -> Result<&mut dyn GrblLink> {
        match self.link.as_mut() {
            Some(link) => Ok(&mut **link),
            None => Err(ControllerError::Closed.into()),
        }
    }

    fn attempts(&self) -> u32 {
        self.config.retries.max(1)
    }

    fn query_status_once(&mut self) -> Result<ControllerStatus> {
        let body = self.link()?.query_status()?;
        let status = status_parser::parse_status(&body)?;
        self.pos_cache = Some(status.mpos.clone());
        self.last_status = Some(status.clone());
        if let Some((_, callback)) = &self.status_callback {
            callback(status.clone());
        }
        Ok(status)
    }

    /// Resume from any hold and drop stale input
    fn recover_link(&mut self) -> Result<()> {
        let link = self.link()?;
        link.resume()?;
        link.flush()
    }

    fn qstatus(&mut self) -> Result<ControllerStatus> {
        let attempts = self.attempts();
        let mut last = None;
        for attempt in 1..=attempts {
            match self.query_status_once() {
                Ok(status) => return Ok(status),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Bad status query");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                if let Err(e) = self.recover_link() {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(error = %e, "Link recovery failed");
                }
            }
        }
        Err(critical("status query", attempts, last))
    }

    fn general_recover(&mut self) -> Result<()> {
        let attempts = self.attempts();
        let mut last = None;
        for attempt in 1..=attempts {
            let result = self
                .recover_link()
                .and_then(|_| self.query_status_once());
            match result {
                Ok(status) => {
                    info!(state = %status.state, "Recovered communication");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Recovery attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(critical("general recovery", attempts, last))
    }

    /// Run `op` up to the retry budget, recovering between attempts
    fn with_retries<T>(
        &mut self,
        operation: &str,
        mut op: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let attempts = self.attempts();
        let mut last = None;
        for attempt in 1..=attempts {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() || !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(operation, attempt, attempts, error = %e, "Operation failed");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                self.general_recover()?;
            }
        }
        Err(critical(operation, attempts, last))
    }

    fn wait_idle(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.qstatus()?.is_idle() {
                return Ok(());
            }
            if started.elapsed() >= self.config.idle_timeout {
                return Err(ControllerError::Timeout {
                    command: "wait for Idle".to_string(),
                    timeout_ms: self.config.idle_timeout.as_millis() as u64,
                }
                .into());
            }
            thread::sleep(self.config.idle_poll_interval);
        }
    }

    fn move_absolute(&mut self, pos: &AxisPosition, feed_rate: u32, blocking: bool) -> Result<()> {
        let body = utils::jog_body(DistanceMode::Absolute, pos, feed_rate)?;
        debug!(target = %pos, feed_rate, "Absolute move");
        self.with_retries("absolute move", |s| {
            s.link()?.jog(&body)?;
            if blocking {
                s.wait_idle()?;
            }
            Ok(())
        })
    }

    fn move_relative(
        &mut self,
        delta: &AxisPosition,
        feed_rate: u32,
        blocking: bool,
        strategy: RelativeStrategy,
    ) -> Result<()> {
        match strategy {
            RelativeStrategy::Soft => {
                // A jog or non-blocking move may have left the cache behind
                let base = self.qstatus()?.mpos;
                let target = base.offset_by(delta)?;
                self.move_absolute(&target, feed_rate, blocking)
            }
            RelativeStrategy::Hard => {
                let body = utils::jog_body(DistanceMode::Relative, delta, feed_rate)?;
                self.link()?.jog(&body)?;
                if blocking {
                    self.wait_idle()?;
                }
                Ok(())
            }
        }
    }

    fn jog(&mut self, deltas: &AxisPosition, rate: u32) -> Result<()> {
        for (axis, delta) in deltas.iter() {
            let single = AxisPosition::new().with(axis, delta);
            let body = utils::jog_body(DistanceMode::Relative, &single, rate)?;
            match self.link()?.jog(&body) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    warn!(axis = %axis, "Jog timed out, dropping remaining axes");
                    return self.general_recover();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Send jog cancel and poll until Idle or `cancel_timeout`
    fn cancel_jog_once(&mut self) -> Result<()> {
        let timeout = self.config.cancel_timeout;
        let started = Instant::now();
        loop {
            self.link()?.cancel_jog()?;
            let status = self.qstatus()?;
            if status.is_idle() {
                return Ok(());
            }
            debug!(state = %status.state, moving = utils::is_running_state(&status.state), "Jog cancel pending");
            if started.elapsed() >= timeout {
                return Err(ControllerError::Timeout {
                    command: "jog cancel".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            thread::sleep(self.config.idle_poll_interval);
        }
    }

    fn cancel_jog(&mut self) -> Result<()> {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match self.cancel_jog_once() {
                Ok(()) => {
                    // Cancelling can leave a feed hold behind
                    return self.link()?.resume();
                }
                Err(e) if e.is_fatal() || !e.is_transient() => return Err(e),
                Err(e) => warn!(attempt, attempts, error = %e, "Jog cancel attempt failed"),
            }
            if attempt < attempts {
                self.general_recover()?;
            }
        }
        Err(ControllerError::Timeout {
            command: "jog cancel".to_string(),
            timeout_ms: (self.config.cancel_timeout * attempts).as_millis() as u64,
        }
        .into())
    }

    fn stop(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.cancel_jog() {
                Ok(()) => {
                    if self.qstatus()?.is_idle() {
                        return Ok(());
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "Stop: cancel failed"),
            }
            if started.elapsed() >= self.config.stop_timeout {
                return Err(ControllerError::Timeout {
                    command: "stop".to_string(),
                    timeout_ms: self.config.stop_timeout.as_millis() as u64,
                }
                .into());
            }
            thread::sleep(self.config.idle_poll_interval);
        }
    }

    fn home(&mut self, mode: HomingMode) -> Result<HomingOutcome> {
        if !mode.force {
            let status = self.qstatus()?;
            info!(state = %status.state, alarm = utils::is_error_state(&status.state), "Status before homing");
            if mode.lazy && status.is_idle() {
                info!("Controller already Idle, skipping homing");
                return Ok(HomingOutcome::AlreadyIdle);
            }
        }

        let started = Instant::now();
        let attempts = self.config.homing_attempts.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            info!(attempt, "Sending home command");
            match self.link()?.home() {
                Ok(()) => {
                    info!(attempt, elapsed_ms = started.elapsed().as_millis() as u64, "Homing complete");
                    self.pos_cache = None;
                    return Ok(HomingOutcome::Homed { attempts: attempt });
                }
                Err(Error::Controller(ControllerError::HomingFailed { reason: r, .. })) => {
                    warn!(attempt, reason = %r, "Homing failed, trying again");
                    reason = r;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ControllerError::HomingFailed { attempts, reason }.into())
    }

    fn reset_probe(&mut self) -> Result<()> {
        if self.link()?.in_reset()? {
            let started = Instant::now();
            warn!("Controller is in reset, waiting for it to come back");
            self.link()?.reset_recover()?;
            self.qstatus()?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Controller back from reset");
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        info!("Soft resetting controller");
        self.pos_cache = None;
        let link = self.link()?;
        link.soft_reset()?;
        link.reset_recover()?;
        self.qstatus().map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        match self.link.take() {
            Some(mut link) => {
                debug!(link = link.name(), "Closing controller link");
                link.close()
            }
            None => Ok(()),
        }
    }
}

/// Serialized GRBL controller session
pub struct GrblController {
    name: String,
    state: Mutex<GrblControllerState>,
}

impl std::fmt::Debug for GrblController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblController")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl GrblController {
    /// Open a session over `link`, probing or resetting it as configured
    pub fn new(link: Box<dyn GrblLink>, config: ControllerConfig) -> Result<Self> {
        let name = link.name().to_string();
        let probe = config.probe_reset;
        let reset = config.reset_on_open;
        let controller = Self {
            name,
            state: Mutex::new(GrblControllerState {
                link: Some(link),
                config,
                pos_cache: None,
                last_status: None,
                status_callback: None,
                next_callback_id: 0,
            }),
        };
        {
            let mut state = controller.state.lock();
            if reset {
                state.reset()?;
            } else if probe {
                state.reset_probe()?;
            }
        }
        info!(link = %controller.name, "Controller session open");
        Ok(controller)
    }

    /// Link name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session policy
    pub fn config(&self) -> ControllerConfig {
        self.state.lock().config.clone()
    }

    /// Register a callback for every successful status query.
    ///
    /// Runs while the session lock is held; it must not call back into the session.
    pub fn set_status_callback(&self, callback: DataCallback<ControllerStatus>) -> StatusCallbackId {
        let mut state = self.state.lock();
        state.next_callback_id += 1;
        let id = StatusCallbackId(state.next_callback_id);
        state.status_callback = Some((id, callback));
        id
    }

    /// Remove the status callback
    pub fn clear_status_callback(&self) {
        self.state.lock().status_callback = None;
    }

    /// Remove the status callback only if `id` is still the installed one
    pub fn remove_status_callback(&self, id: StatusCallbackId) -> bool {
        let mut state = self.state.lock();
        match &state.status_callback {
            Some((current, _)) if *current == id => {
                state.status_callback = None;
                true
            }
            _ => false,
        }
    }

    /// Query status, retrying with link recovery in between
    pub fn qstatus(&self) -> Result<ControllerStatus> {
        self.state.lock().qstatus()
    }

    /// Query and return the machine position
    pub fn mpos(&self) -> Result<AxisPosition> {
        Ok(self.qstatus()?.mpos)
    }

    /// Position from the last successful status query
    pub fn position_cache(&self) -> Option<AxisPosition> {
        self.state.lock().pos_cache.clone()
    }

    /// Last successful status snapshot
    pub fn last_status(&self) -> Option<ControllerStatus> {
        self.state.lock().last_status.clone()
    }

    /// Move to `pos`; with `blocking`, wait until the controller is Idle
    pub fn move_absolute(&self, pos: &AxisPosition, feed_rate: u32, blocking: bool) -> Result<()> {
        self.state.lock().move_absolute(pos, feed_rate, blocking)
    }

    /// Move by `delta` using the configured strategy
    pub fn move_relative(&self, delta: &AxisPosition, feed_rate: u32, blocking: bool) -> Result<()> {
        let mut state = self.state.lock();
        let strategy = state.config.relative_strategy;
        state.move_relative(delta, feed_rate, blocking, strategy)
    }

    /// Move by `delta` with an explicit strategy
    pub fn move_relative_with(
        &self,
        delta: &AxisPosition,
        feed_rate: u32,
        blocking: bool,
        strategy: RelativeStrategy,
    ) -> Result<()> {
        self.state
            .lock()
            .move_relative(delta, feed_rate, blocking, strategy)
    }

    /// Jog each axis of `deltas` in turn; a timeout drops the rest
    pub fn jog(&self, deltas: &AxisPosition, rate: u32) -> Result<()> {
        self.state.lock().jog(deltas, rate)
    }

    /// Cancel the active jog and wait for Idle
    pub fn cancel_jog(&self) -> Result<()> {
        self.state.lock().cancel_jog()
    }

    /// Cancel until the controller is Idle or the stop deadline passes
    pub fn stop(&self) -> Result<()> {
        self.state.lock().stop()
    }

    /// Home the machine
    pub fn home(&self, mode: HomingMode) -> Result<HomingOutcome> {
        self.state.lock().home(mode)
    }

    /// Resume, flush and re-query until the link answers
    pub fn general_recover(&self) -> Result<()> {
        self.state.lock().general_recover()
    }

    /// If the controller is stuck in reset, wait for it to recover
    pub fn reset_probe(&self) -> Result<()> {
        self.state.lock().reset_probe()
    }

    /// Soft reset and wait for the controller to come back
    pub fn reset(&self) -> Result<()> {
        self.state.lock().reset()
    }

    /// Clear an alarm lock
    pub fn unlock(&self) -> Result<()> {
        self.state.lock().link()?.unlock()
    }

    /// Read the `$$` settings dump
    pub fn settings(&self) -> Result<FirmwareSettings> {
        let lines = self.state.lock().link()?.settings()?;
        Ok(FirmwareSettings::from_lines(&lines)?)
    }

    /// Read and decode `$I` build info
    pub fn build_info(&self) -> Result<BuildInfo> {
        let lines = self.state.lock().link()?.build_info()?;
        Ok(BuildInfo::from_lines(&lines)?)
    }

    /// Read the `$N` startup blocks
    pub fn startup_lines(&self) -> Result<Vec<StartupLine>> {
        let lines = self.state.lock().link()?.startup_lines()?;
        Ok(StartupLine::from_lines(&lines)?)
    }

    /// Read `$G` parser state
    pub fn parser_state(&self) -> Result<String> {
        self.state.lock().link()?.parser_state()
    }

    /// Read `$` help
    pub fn help(&self) -> Result<String> {
        self.state.lock().link()?.help()
    }

    /// The G54 work offset
    pub fn wcs_offsets(&self) -> Result<AxisPosition> {
        let lines = self.state.lock().link()?.coordinate_systems()?;
        for line in &lines {
            let (name, pos) = status_parser::parse_named_coordinates(line)?;
            if name == "G54" {
                return Ok(pos);
            }
        }
        Err(ControllerError::malformed(lines.join(" | "), "G54 offset missing").into())
    }

    /// Send one raw line and return its data lines
    pub fn command(&self, line: &str) -> Result<Vec<String>> {
        self.state.lock().link()?.send(&Command::new(line))
    }

    /// Send lines in order, stopping at the first failure
    pub fn run_commands<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        let mut state = self.state.lock();
        for line in lines {
            let line: &str = line.as_ref();
            state.link()?.send(&Command::new(line))?;
        }
        Ok(())
    }

    /// Store identity metadata in the G58 and G59 offsets
    pub fn write_metadata(&self, record: &MetadataRecord) -> Result<()> {
        let mut state = self.state.lock();
        let commands = metadata::encode_metadata(record, state.config.metadata_magic)?;
        info!(record = %record, "Writing metadata");
        for line in &commands {
            state
                .link()?
                .send(&Command::new(line.as_str()).expect(super::link::Expect::NONE))?;
        }
        Ok(())
    }

    /// Read identity metadata; `None` if none is stored
    pub fn read_metadata(&self) -> Result<Option<MetadataRecord>> {
        let mut state = self.state.lock();
        let magic = state.config.metadata_magic;
        let lines = state.link()?.coordinate_systems()?;
        Ok(metadata::decode_metadata(&lines, magic)?)
    }

    /// Read identity metadata, failing with `MetadataAbsent` if none is stored
    pub fn require_metadata(&self) -> Result<MetadataRecord> {
        self.read_metadata()?
            .ok_or_else(|| ControllerError::MetadataAbsent.into())
    }

    /// Close the link; later operations fail with `Closed`
    pub fn close(&self) -> Result<()> {
        self.state.lock().close()
    }

    /// True once the link has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().link.is_none()
    }
}

impl Drop for GrblController {
    fn drop(&mut self) {
        if let Err(e) = self.state.get_mut().close() {
            warn!(error = %e, "Failed to close controller link");
        }
    }
}
