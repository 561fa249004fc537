//! # grblink
//!
//! Driver for GRBL 1.1 motion controllers.
//!
//! ## Architecture
//!
//! grblink is organized as a workspace:
//!
//! 1. **grblink-core** - error taxonomy, axis/position/status model, the
//!    `MotionHal` abstraction and listener handles
//! 2. **grblink-communication** - serial transport, line codec, transaction
//!    engine, controller session, identity metadata, simulator, status poller
//!    and the `MotionHal` adapter
//! 3. **grblink-settings** - configuration files and environment overrides
//!
//! This crate re-exports the public surface and wires configuration to a
//! controller session.

use std::time::Duration;

pub use grblink_core::{
    Axis, AxisPosition, ConnectionError, ControllerError, ControllerStatus, Error,
    MetadataRecord, MotionHal, PositionListener, PositionListenerHandle, Result,
};

pub use grblink_communication::{
    list_ports, open_serial, BuildInfo, Command, ConnectionParams, ControllerConfig, Expect, FaultPlan,
    FirmwareSetting, FirmwareSettings, GrblController, GrblLink, GrblMotion, HomingMode,
    HomingOutcome, MetadataMagic, MotionConfig, RelativeStrategy, SerialLink, SerialPortInfo,
    SerialTransport, SimulatedLink, SimulatedState, SimulatorConfig, SimulatorHandle,
    SimulatorStats, StartupLine, StatusCallbackId, StatusFault, StatusPoller, Transport,
};

pub use grblink_settings::{Config, LoggingSettings, SettingsError, MOCK_PORT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// `RUST_LOG` wins when set; otherwise the level follows `verbosity`
/// (0 info, 1 debug, 2+ trace). Output goes to stderr so command output
/// on stdout stays clean.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = match settings.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if settings.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Session policy from the `session`, `motion` and `metadata` sections
pub fn controller_config(config: &Config) -> anyhow::Result<ControllerConfig> {
    let session = &config.session;
    Ok(ControllerConfig {
        probe_reset: session.probe_reset,
        reset_on_open: session.reset_on_open,
        relative_strategy: if config.motion.soft_relative {
            RelativeStrategy::Soft
        } else {
            RelativeStrategy::Hard
        },
        retries: session.retries,
        homing_attempts: session.homing_attempts,
        cancel_timeout: Duration::from_millis(session.cancel_timeout_ms),
        stop_timeout: Duration::from_millis(session.stop_timeout_ms),
        idle_poll_interval: Duration::from_millis(session.idle_poll_interval_ms),
        idle_timeout: Duration::from_millis(session.idle_timeout_ms),
        metadata_magic: MetadataMagic::new(config.metadata.magic)?,
    })
}

/// Motion adapter settings from the `motion` section
pub fn motion_config(config: &Config) -> MotionConfig {
    let motion = &config.motion;
    MotionConfig {
        feed_rate: motion.feed_rate,
        jog_rate: motion.jog_rate,
        home_on_connect: motion.home_on_connect,
        homing: HomingMode {
            lazy: motion.lazy_homing,
            force: false,
        },
    }
}

/// Serial parameters from the `connection` section
pub fn connection_params(config: &Config) -> anyhow::Result<ConnectionParams> {
    let connection = &config.connection;
    Ok(ConnectionParams {
        port: config.require_port()?.to_string(),
        baud_rate: connection.baud_rate,
        timeout_ms: connection.timeout_ms,
        suppress_reset: connection.suppress_reset,
    })
}

/// Open the configured link: the simulator for port `mock`, else the serial port
pub fn open_link(config: &Config) -> anyhow::Result<Box<dyn GrblLink>> {
    if config.connection.is_mock() {
        tracing::info!("Using simulated controller");
        return Ok(Box::new(SimulatedLink::new(SimulatorConfig::default())));
    }
    let params = connection_params(config)?;
    Ok(Box::new(open_serial(&params)?))
}

/// Open the configured link and start a controller session on it
pub fn connect(config: &Config) -> anyhow::Result<GrblController> {
    let link = open_link(config)?;
    Ok(GrblController::new(link, controller_config(config)?)?)
}
