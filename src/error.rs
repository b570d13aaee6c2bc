//! Device-level error taxonomy.
//!
//! Every fallible device operation returns [`DeviceResult`]. Timeouts are not
//! errors: a read or write that runs out of time returns `Ok(0)`.

use crate::port::TransportError;
use std::fmt;
use thiserror::Error;

/// A specialized `Result` type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Which overlapped operation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    WaitData,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::WaitData => write!(f, "wait for data"),
        }
    }
}

/// Errors surfaced by the port handle, the I/O engine and the receive loop.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The port is missing or held by another owner.
    #[error("Could not open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: TransportError,
    },

    /// Reading or writing the line parameter block failed. The device's
    /// configuration is undefined afterwards; re-read it before relying on it.
    #[error("Failed to apply configuration to {port}: {source}")]
    Config {
        port: String,
        #[source]
        source: TransportError,
    },

    /// A setting was rejected before the device was touched.
    #[error("Invalid setting '{name}': {message}")]
    InvalidSetting { name: &'static str, message: String },

    /// The driver failed a write for a reason other than "still pending".
    #[error("Write failed: {0}")]
    Write(#[source] TransportError),

    /// The driver failed a read. The pending read has been cleared.
    #[error("Read failed: {0}")]
    Read(#[source] TransportError),

    /// The handle was closed while this operation was pending on it.
    #[error("Port closed while a {operation} was pending")]
    ShutdownRace { operation: Operation },

    /// Operation attempted on a closed handle.
    #[error("Port is not open")]
    NotOpen,

    /// A receive loop is already running for this device.
    #[error("Receive loop is already running")]
    ReceiverRunning,

    /// The receive loop thread panicked, most likely inside a subscriber.
    #[error("Receive loop panicked: {0}")]
    ReceiverPanicked(String),

    /// The receive loop thread could not be spawned.
    #[error("Could not spawn receive loop: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DeviceError {
    pub(crate) fn open(port: impl Into<String>, source: TransportError) -> Self {
        Self::Open {
            port: port.into(),
            source,
        }
    }

    pub(crate) fn config(port: impl Into<String>, source: TransportError) -> Self {
        Self::Config {
            port: port.into(),
            source,
        }
    }

    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name,
            message: message.into(),
        }
    }

    /// True for the open-failure class of errors.
    pub fn is_open_error(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// True for configuration failures, including rejected settings.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidSetting { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::open("COM22", TransportError::not_found("COM22"));
        assert_eq!(
            err.to_string(),
            "Could not open port COM22: Serial port not found: COM22"
        );
        assert!(err.is_open_error());

        let err = DeviceError::ShutdownRace {
            operation: Operation::Read,
        };
        assert_eq!(err.to_string(), "Port closed while a read was pending");

        let err = DeviceError::invalid("baud_rate", "must be positive");
        assert_eq!(err.to_string(), "Invalid setting 'baud_rate': must be positive");
        assert!(err.is_config_error());
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = DeviceError::Write(TransportError::injected("line dropped"));
        let source = err.source().expect("write error carries its cause");
        assert_eq!(source.to_string(), "Injected fault: line dropped");
    }
}
