//! Serial link ownership.
//!
//! [`SerialLink`] owns the two halves of the byte transport. The receive loop
//! is the only reader; writes come from the engine worker (messages and
//! aborts) and from the receive loop itself (ACK/NAK), so the write side is
//! serialized by a mutex and every [`SerialLink::write_all`] call is atomic
//! with respect to concurrent writers.
//!
//! The halves are plain boxed `Read`/`Write` objects so integration tests can
//! attach an in-memory duplex instead of a physical port.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::DriverError;

/// Reader half of the transport.
pub type LinkReader = Box<dyn Read + Send>;
/// Writer half of the transport.
pub type LinkWriter = Box<dyn Write + Send>;

/// Outcome of a single-byte read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadByte {
    /// A byte arrived.
    Byte(u8),
    /// The receive timeout elapsed with no data.
    TimedOut,
    /// The transport is closed or drained.
    Eof,
}

/// The byte transport to the stick.
pub struct SerialLink {
    reader: Mutex<Option<LinkReader>>,
    writer: Mutex<Option<LinkWriter>>,
}

impl SerialLink {
    /// Create a link with no transport attached.
    pub fn new() -> Self {
        SerialLink {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Open the named serial port at 115200-8N1 (or the configured baud rate)
    /// and return its two halves.
    pub fn open_port(
        port_name: &str,
        baud_rate: u32,
        receive_timeout: Duration,
    ) -> Result<(LinkReader, LinkWriter), DriverError> {
        info!("opening serial port {} at {} baud", port_name, baud_rate);
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(receive_timeout)
            .open()
            .map_err(|source| DriverError::PortUnavailable {
                port: port_name.to_string(),
                source,
            })?;
        let reader = port.try_clone().map_err(|source| DriverError::PortUnavailable {
            port: port_name.to_string(),
            source,
        })?;
        Ok((Box::new(reader), Box::new(port)))
    }

    /// Attach transport halves, replacing any previous ones.
    pub fn attach(&self, reader: LinkReader, writer: LinkWriter) {
        *self.reader.lock().unwrap() = Some(reader);
        *self.writer.lock().unwrap() = Some(writer);
    }

    /// Whether a transport is currently attached.
    pub fn is_open(&self) -> bool {
        self.writer.lock().unwrap().is_some()
    }

    /// Detach and drop the transport halves. Idempotent.
    pub fn close(&self) {
        let had_port = self.writer.lock().unwrap().take().is_some();
        self.reader.lock().unwrap().take();
        if had_port {
            debug!("serial link closed");
        }
    }

    /// Read one byte, classifying timeouts and end-of-stream.
    ///
    /// A closed link reads as [`ReadByte::Eof`] so a racing receive loop can
    /// fall through to its shutdown check instead of erroring.
    pub fn read_byte(&self) -> std::io::Result<ReadByte> {
        let mut guard = self.reader.lock().unwrap();
        let Some(reader) = guard.as_mut() else {
            return Ok(ReadByte::Eof);
        };
        let mut buf = [0u8; 1];
        match reader.read(&mut buf) {
            Ok(0) => Ok(ReadByte::Eof),
            Ok(_) => Ok(ReadByte::Byte(buf[0])),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                Ok(ReadByte::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    /// Write all of `bytes` and flush, holding the writer lock throughout.
    pub fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut guard = self.writer.lock().unwrap();
        let Some(writer) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial link is closed",
            ));
        };
        writer.write_all(bytes)?;
        writer.flush()
    }
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}
