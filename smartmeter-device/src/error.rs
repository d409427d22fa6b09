//! Error types for device communication.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`DeviceError`].
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised while talking to the Wi-SUN modem or the meter behind it.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Serial or stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The modem closed the stream.
    #[error("Device stream closed")]
    Closed,

    /// No answer within the allotted time.
    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    /// The modem rejected a command with `FAIL ERxx`.
    #[error("Command '{command}' failed: {code}")]
    CommandFailed { command: String, code: String },

    /// Active scan finished without finding a PAN coordinator.
    #[error("No PAN found after {0} scan(s)")]
    NoPanFound(u32),

    /// PANA authentication was rejected by the meter.
    #[error("PANA authentication failed")]
    AuthenticationFailed,

    /// The PANA session lifetime expired while waiting for a response.
    #[error("PANA session expired")]
    SessionExpired,

    /// Malformed ECHONET Lite frame.
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// The meter answered with a Get_SNA (property not available).
    #[error("Property not available (ESV 0x{0:02X})")]
    NotAvailable(u8),

    /// Unexpected line or event from the modem.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid device configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeviceError {
    /// Create a frame error.
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<tokio_serial::Error> for DeviceError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::Io(err.into())
    }
}
