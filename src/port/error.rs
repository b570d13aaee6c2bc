//! Transport-level error types.
//!
//! These describe what the native driver (or a test double standing in for
//! it) reported. The device layer wraps them into [`crate::DeviceError`]
//! with the operation that was being attempted.

use thiserror::Error;

/// Errors reported by a [`Transport`](super::Transport) or one of its channels.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The requested port does not exist on this system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The port exists but another owner holds it exclusively.
    #[error("Serial port is already held by another owner: {0}")]
    Busy(String),

    /// The driver cannot express the requested setting.
    #[error("Unsupported by this transport: {0}")]
    Unsupported(&'static str),

    /// A completion was requested but nothing is outstanding.
    #[error("No pending operation")]
    NoPendingOperation,

    /// The channel has been closed underneath the caller.
    #[error("Channel is closed")]
    Closed,

    /// A failure injected by a test transport.
    #[error("Injected fault: {0}")]
    Injected(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl TransportError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Busy error from a port name.
    pub fn busy(port_name: impl Into<String>) -> Self {
        Self::Busy(port_name.into())
    }

    /// Create an injected fault with a message.
    pub fn injected(message: impl Into<String>) -> Self {
        Self::Injected(message.into())
    }
}
