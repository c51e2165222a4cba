//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding serial frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Payload does not fit in a single frame.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Buffer does not start with the SOF marker.
    #[error("not a frame: leading byte 0x{0:02X} is not SOF")]
    NotAFrame(u8),

    /// The LEN byte disagrees with the number of bytes received.
    #[error("frame length mismatch: LEN says {declared} bytes follow, got {actual}")]
    LengthMismatch {
        /// Byte count declared by the LEN field.
        declared: usize,
        /// Byte count actually present after LEN.
        actual: usize,
    },

    /// Checksum verification failed.
    #[error("bad checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadChecksum {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// The message type byte is neither Request nor Response.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),
}
