//! Z-Wave Serial API wire protocol.
//!
//! This crate provides the types and codec for talking to a Z-Wave controller
//! stick over its serial interface. The protocol is byte oriented:
//!
//! - **Data frames** start with a `SOF` byte and carry a length, a message
//!   type (request/response), a message class and a payload, terminated by an
//!   XOR checksum.
//! - **Control codes** (`ACK`, `NAK`, `CAN`) are single bytes and are never
//!   framed.
//!
//! # Example
//!
//! ```rust,ignore
//! use zwave_protocol::{frame, requests};
//!
//! // Build a GetVersion request and put it on the wire.
//! let msg = requests::get_version();
//! let bytes = frame::encode(&msg)?;
//!
//! // Parse a received frame.
//! let incoming = frame::decode(&received)?;
//! ```

mod constants;
mod error;
pub mod frame;
mod message;
pub mod requests;

pub use constants::*;
pub use error::*;
pub use message::*;
