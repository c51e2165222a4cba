//! The transaction engine worker.
//!
//! A single thread drains the send queue, one transaction at a time: take a
//! message, defer it if its target is asleep, reset the completion latch,
//! put the frame on the wire and wait for the latch. The receive loop raises
//! the latch with the cause (processor-declared completion, NAK or CAN), and
//! the engine decides the continuation from the cause. Exactly one message is
//! in flight from send to completion or abandonment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, trace, warn};
use zwave_protocol::{frame, hex_dump, requests, MessageClass, MessagePriority, SerialMessage};

use crate::context::{Counters, DriverContext};
use crate::link::SerialLink;
use crate::processors;
use crate::signal::{CompletionLatch, SignalCause};

/// How long a queue take blocks before re-checking the stop flag.
const TAKE_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Settle time after the stick cancels a frame.
const CAN_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct SendWorker {
    ctx: DriverContext,
    link: Arc<SerialLink>,
    latch: CompletionLatch,
    in_flight: Arc<Mutex<Option<SerialMessage>>>,
    shutdown: Arc<AtomicBool>,
}

impl SendWorker {
    pub(crate) fn new(
        ctx: DriverContext,
        link: Arc<SerialLink>,
        latch: CompletionLatch,
        in_flight: Arc<Mutex<Option<SerialMessage>>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        SendWorker {
            ctx,
            link,
            latch,
            in_flight,
            shutdown,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn run(&self) {
        debug!("starting send worker");
        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(mut message) = self.ctx.queue.take_timeout(TAKE_POLL_INTERVAL) else {
                continue;
            };
            debug!(
                "took message from queue for sending, queue length = {}",
                self.ctx.queue.len()
            );

            // Battery nodes are only reachable in their wake-up window.
            if message.message_class == MessageClass::SendData
                && message.priority != MessagePriority::Low
            {
                if let Some(node_id) = message.node_id {
                    if self.ctx.nodes.is_asleep(node_id) {
                        debug!("NODE {}: asleep, deferring message to wake-up queue", node_id);
                        self.ctx.nodes.queue_for_wakeup(node_id, message);
                        continue;
                    }
                }
            }

            self.latch.drain();

            let bytes = match frame::encode(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("cannot encode message, discarding: {}", e);
                    continue;
                }
            };
            *self.in_flight.lock().unwrap() = Some(message.clone());
            debug!("sending message = {}", hex_dump(&bytes));
            if let Err(e) = self.link.write_all(&bytes) {
                error!("I/O error during sending, exiting send worker: {}", e);
                break;
            }

            match self.latch.wait(self.ctx.config.response_timeout()) {
                Some(SignalCause::Completed) => {
                    trace!("transaction completed");
                }
                Some(SignalCause::Nak) => self.on_nak(message),
                Some(SignalCause::Can) => {
                    // The stick dropped the frame; resend after it settles.
                    self.ctx.requeue(message);
                    std::thread::sleep(CAN_BACKOFF);
                }
                None => {
                    if self.on_timeout(message).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("stopped send worker");
    }

    /// The stick refused the frame; the transaction is invalid. Spend an
    /// attempt and requeue, or give the message up.
    fn on_nak(&self, mut message: SerialMessage) {
        if message.attempts > 0 {
            message.attempts -= 1;
            warn!(
                "frame not acknowledged, requeueing ({} attempts left)",
                message.attempts
            );
            self.ctx.requeue(message);
        } else {
            warn!("frame not acknowledged and retries exhausted, discarding: {:?}", message);
        }
    }

    /// Nothing completed the transaction in time. For SendData, tell the
    /// stick to stop trying and route the failure through the SendData
    /// failure hook; other classes spend an attempt directly.
    fn on_timeout(&self, mut message: SerialMessage) -> Result<(), ()> {
        let timeouts = Counters::bump(&self.ctx.state.counters.timeouts);
        trace!("transaction timeouts so far = {}", timeouts);

        if message.message_class == MessageClass::SendData {
            let abort = requests::send_data_abort();
            match frame::encode(&abort) {
                Ok(bytes) => {
                    debug!("sending message = {}", hex_dump(&bytes));
                    if let Err(e) = self.link.write_all(&bytes) {
                        error!("I/O error during sending, exiting send worker: {}", e);
                        return Err(());
                    }
                }
                Err(e) => error!("cannot encode SendDataAbort: {}", e),
            }
            error!(
                "NODE {:?}: timeout while sending message",
                message.node_id
            );
            processors::handle_failed_send_data(&self.ctx, message);
        } else if message.attempts > 0 {
            message.attempts -= 1;
            error!(
                "timeout while sending message, requeueing ({} attempts left)",
                message.attempts
            );
            self.ctx.requeue(message);
        } else {
            warn!("timeout and retries exhausted, discarding message: {:?}", message);
        }
        Ok(())
    }
}
