//! The receive loop.
//!
//! A dedicated thread reads the serial line byte by byte. SOF starts a frame
//! assembly; a valid frame is acknowledged and dispatched to the processor
//! for its class, an invalid one is dropped without an ACK so the stick
//! retransmits. The single-byte control codes feed the completion latch and
//! the flow counters. On an I/O error the loop exits and leaves respawning
//! to the watchdog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, trace, warn};
use zwave_protocol::{frame, hex_dump, MessageType, SerialMessage, ACK, CAN, NAK, SOF};

use crate::context::{Counters, DriverContext};
use crate::events::ControllerEvent;
use crate::link::{ReadByte, SerialLink};
use crate::processors::ProcessorRegistry;
use crate::signal::{CompletionLatch, SignalCause};

pub(crate) struct ReceiveWorker {
    ctx: DriverContext,
    link: Arc<SerialLink>,
    latch: CompletionLatch,
    in_flight: Arc<Mutex<Option<SerialMessage>>>,
    processors: Arc<ProcessorRegistry>,
    shutdown: Arc<AtomicBool>,
}

impl ReceiveWorker {
    pub(crate) fn new(
        ctx: DriverContext,
        link: Arc<SerialLink>,
        latch: CompletionLatch,
        in_flight: Arc<Mutex<Option<SerialMessage>>>,
        processors: Arc<ProcessorRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        ReceiveWorker {
            ctx,
            link,
            latch,
            in_flight,
            processors,
            shutdown,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn run(&self) {
        debug!("starting receive loop");

        // A NAK resynchronises the stick after whatever state we left it in.
        if let Err(e) = self.link.write_all(&[NAK]) {
            error!("I/O error during resync, exiting receive loop: {}", e);
            return;
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            let next = match self.link.read_byte() {
                Ok(ReadByte::Byte(b)) => b,
                Ok(ReadByte::TimedOut) | Ok(ReadByte::Eof) => continue,
                Err(e) => {
                    error!("I/O error during receiving, exiting receive loop: {}", e);
                    break;
                }
            };

            match next {
                SOF => {
                    Counters::bump(&self.ctx.state.counters.sof);
                    if !self.read_frame() {
                        break;
                    }
                }
                ACK => {
                    trace!("received ACK");
                    Counters::bump(&self.ctx.state.counters.ack);
                }
                NAK => {
                    error!("frame not acknowledged by the stick (NAK)");
                    Counters::bump(&self.ctx.state.counters.nak);
                    self.latch.raise(SignalCause::Nak);
                }
                CAN => {
                    error!("frame cancelled by the stick (CAN)");
                    Counters::bump(&self.ctx.state.counters.can);
                    self.latch.raise(SignalCause::Can);
                }
                other => {
                    warn!("out of frame flow, got 0x{:02X}, sending NAK", other);
                    Counters::bump(&self.ctx.state.counters.oof);
                    if let Err(e) = self.link.write_all(&[NAK]) {
                        error!("I/O error during sending, exiting receive loop: {}", e);
                        break;
                    }
                }
            }
        }
        debug!("stopped receive loop");
    }

    /// Assemble one frame after its SOF byte: read LEN, then exactly LEN more
    /// bytes, retrying on short reads. Returns false on an I/O error.
    fn read_frame(&self) -> bool {
        let length = loop {
            match self.link.read_byte() {
                Ok(ReadByte::Byte(b)) => break b as usize,
                Ok(ReadByte::TimedOut) => continue,
                Ok(ReadByte::Eof) => return true,
                Err(e) => {
                    error!("I/O error during receiving, exiting receive loop: {}", e);
                    return false;
                }
            }
        };

        let mut buffer = Vec::with_capacity(length + 2);
        buffer.push(SOF);
        buffer.push(length as u8);
        while buffer.len() < length + 2 {
            match self.link.read_byte() {
                Ok(ReadByte::Byte(b)) => buffer.push(b),
                Ok(ReadByte::TimedOut) => continue,
                Ok(ReadByte::Eof) => return true,
                Err(e) => {
                    error!("I/O error during receiving, exiting receive loop: {}", e);
                    return false;
                }
            }
        }

        debug!("receive message = {}", hex_dump(&buffer));
        match frame::decode(&buffer) {
            Ok(message) => {
                trace!("message is valid, sending ACK");
                if let Err(e) = self.link.write_all(&[ACK]) {
                    error!("I/O error during sending, exiting receive loop: {}", e);
                    return false;
                }
                self.dispatch(message);
            }
            Err(e) => {
                // No ACK: the stick will retransmit on its own timeout.
                error!("message is not valid, discarding: {}", e);
            }
        }
        true
    }

    /// Hand a frame to the processor for its class; completion emits the
    /// transaction event and raises the latch.
    fn dispatch(&self, incoming: SerialMessage) {
        let Some(processor) = self.processors.get(incoming.message_class) else {
            warn!(
                "no processor for message class {:?}, ignoring",
                incoming.message_class
            );
            return;
        };

        let in_flight = self.in_flight.lock().unwrap().clone();
        let disposition = match incoming.message_type {
            MessageType::Request => processor.handle_request(&self.ctx, in_flight.as_ref(), &incoming),
            MessageType::Response => {
                processor.handle_response(&self.ctx, in_flight.as_ref(), &incoming)
            }
        };

        if disposition.transaction_complete {
            if let Some(sent) = in_flight {
                self.ctx
                    .emit(ControllerEvent::TransactionCompleted { message: sent });
            }
            self.latch.raise(SignalCause::Completed);
            trace!("transaction marked complete");
        }
    }
}
