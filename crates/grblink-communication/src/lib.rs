//! # grblink Communication
//!
//! Serial transport and GRBL protocol support for grblink:
//! the line codec, the transaction engine, the controller session with its
//! retry and recovery policy, identity metadata, a device simulator, a
//! background status poller and the generic motion adapter.

pub mod communication;
pub mod firmware;

pub use communication::{
    list_ports, ConnectionParams, SerialPortInfo, SerialTransport, Transport,
};

pub use firmware::grbl::{
    Command, ControllerConfig, Expect, FaultPlan, Framing, GrblController, GrblLink, GrblMotion,
    HomingMode, HomingOutcome, MetadataMagic, MotionConfig, RelativeStrategy, SerialLink,
    SimulatedLink, SimulatedState, SimulatorConfig, SimulatorHandle, SimulatorStats,
    StatusCallbackId, StatusFault, StatusPoller,
};
pub use firmware::{BuildInfo, BuildOption, FirmwareSetting, FirmwareSettings, StartupLine};

/// Open a serial port and wrap it in a transaction engine
pub fn open_serial(params: &ConnectionParams) -> grblink_core::Result<SerialLink<SerialTransport>> {
    Ok(SerialLink::new(SerialTransport::open(params)?))
}
