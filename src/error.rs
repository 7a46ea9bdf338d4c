use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Failures of a single request/response exchange on the field bus.
///
/// All of these are transient: the caller may try again on its next tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("device exception: {0}")]
    Exception(String),
    #[error("serial link error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid motor nameplate: {0}")]
    InvalidNameplate(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("{quantity} {value} out of range, must be between {min} and {max}")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid mill geometry: vessel {vessel_mm} mm, shaft {shaft_mm} mm")]
    InvalidGeometry { vessel_mm: f64, shaft_mm: f64 },
    #[error("invalid {0}: must be a finite number")]
    InvalidInput(&'static str),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no inverter connected")]
    NotConnected,
    #[error("{0} cannot be changed while the mill is running")]
    EditLocked(&'static str),
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl From<TransportError> for ControlError {
    fn from(err: TransportError) -> Self {
        Self::Driver(DriverError::Transport(err))
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("open {port}: {source}")]
    Open {
        port: String,
        source: TransportError,
    },
    #[error("handshake with {port} failed: {source}")]
    Handshake { port: String, source: DriverError },
    #[error("no inverter answered on any of: {}", attempted.join(", "))]
    NoInverterFound { attempted: Vec<String> },
    #[error("mill could not be stopped before reconnecting: {0}")]
    StillRunning(#[source] ControlError),
}
