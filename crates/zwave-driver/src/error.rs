//! Driver error types.

use thiserror::Error;

/// Errors surfaced by the driver's public API.
///
/// Worker-loop I/O failures are not represented here; they terminate the
/// affected loop and are handled by the watchdog.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The serial port could not be opened.
    #[error("serial port {port} unavailable: {source}")]
    PortUnavailable {
        /// Name of the port that failed to open.
        port: String,
        /// Underlying serial layer error.
        source: serialport::Error,
    },

    /// An I/O error on an open port.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller is not connected.
    #[error("controller is not connected")]
    NotConnected,

    /// A message failed validation before queueing.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}

/// Convenience alias for driver results.
pub type Result<T> = std::result::Result<T, DriverError>;
