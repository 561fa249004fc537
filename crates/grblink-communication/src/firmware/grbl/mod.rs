//! GRBL 1.1 protocol support
//!
//! - `error_decoder` / `response_parser` / `status_parser`: the line codec
//! - `link` / `transaction`: one command, one reply
//! - `controller`: retries, recovery, motion and homing policy
//! - `metadata`: identity stored in fixture offsets
//! - `simulator`: an in-memory controller
//! - `poller` / `hal`: background polling and the generic motion adapter

pub mod controller;
pub mod error_decoder;
pub mod hal;
pub mod link;
pub mod metadata;
pub mod poller;
pub mod response_parser;
pub mod simulator;
pub mod status_parser;
pub mod transaction;
pub mod utils;

pub use controller::{
    ControllerConfig, GrblController, HomingMode, HomingOutcome, RelativeStrategy,
    StatusCallbackId,
};
pub use hal::{GrblMotion, MotionConfig};
pub use link::{Command, Expect, Framing, GrblLink};
pub use metadata::{decode_metadata, encode_metadata, MetadataMagic};
pub use poller::StatusPoller;
pub use response_parser::LineKind;
pub use simulator::{
    FaultPlan, SimulatedLink, SimulatedState, SimulatorConfig, SimulatorHandle, SimulatorStats,
    StatusFault,
};
pub use transaction::SerialLink;
