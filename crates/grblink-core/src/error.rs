//! Error handling for grblink
//!
//! Provides the error taxonomy shared by every layer of the driver:
//! - Controller errors (protocol replies, retries, homing, recovery)
//! - Connection errors (opening and talking to the serial device)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents everything that can go wrong between a command leaving the
/// session and its terminator coming back.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// No terminator arrived before the deadline
    #[error("Timed out after {timeout_ms}ms waiting for reply to '{command}'")]
    Timeout {
        /// The command that was in flight.
        command: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The controller answered with `error:<n>`
    #[error("'{command}' failed with error {code} ({message})")]
    Protocol {
        /// The command that was rejected.
        command: String,
        /// The numeric error code, `0` when the line carried none.
        code: u32,
        /// Human readable cause from the error table.
        message: String,
    },

    /// The controller reported an activated emergency stop
    #[error("Emergency stop is active: {raw}")]
    EmergencyStop {
        /// The raw bytes that carried the marker.
        raw: String,
    },

    /// Homing raised an alarm or ran out of attempts
    #[error("Homing failed after {attempts} attempt(s): {reason}")]
    HomingFailed {
        /// Number of homing commands sent.
        attempts: u32,
        /// Last alarm or failure description.
        reason: String,
    },

    /// Recovery ran out of retries; the session must be treated as dead
    #[error("Communication critical during {operation} after {attempts} attempt(s): {reason}")]
    CommsCritical {
        /// The operation that was being retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Description of the last underlying failure.
        reason: String,
    },

    /// A reply line could not be parsed
    #[error("Malformed response '{line}': {reason}")]
    MalformedResponse {
        /// The raw line as received.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },

    /// No identity metadata is stored on the controller
    #[error("No metadata present on controller")]
    MetadataAbsent,

    /// The session or link has already been closed
    #[error("Controller link is closed")]
    Closed,

    /// A caller supplied value the protocol cannot carry
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// The parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ControllerError {
    /// Build a malformed-response error from a line and a reason
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Build an invalid-parameter error
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Connection error type
///
/// Represents errors related to the serial device itself.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for grblink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Errors that end the session: never retried, always surfaced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Controller(
                ControllerError::EmergencyStop { .. }
                    | ControllerError::CommsCritical { .. }
                    | ControllerError::HomingFailed { .. }
                    | ControllerError::Closed
            )
        )
    }

    /// Link faults a retry loop may absorb with recovery in between
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Controller(
                ControllerError::Timeout { .. }
                | ControllerError::Protocol { .. }
                | ControllerError::MalformedResponse { .. },
            ) => true,
            Error::Io(_) | Error::Connection(ConnectionError::SerialError { .. }) => true,
            _ => false,
        }
    }

    /// Check if this is a homing failure
    pub fn is_homing_failure(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::HomingFailed { .. }))
    }

    /// Check if this is an emergency stop
    pub fn is_emergency_stop(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::EmergencyStop { .. }))
    }

    /// Check if recovery gave up
    pub fn is_comms_critical(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::CommsCritical { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
