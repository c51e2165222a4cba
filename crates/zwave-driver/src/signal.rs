//! The transaction completion latch.
//!
//! A binary, non-counting, "one is enough" signal between the receive loop
//! and the engine worker. Raising an already-raised latch is a no-op, so a
//! completion that lands before the engine starts waiting (a CAN from a slow
//! scheduler, say) is not lost, and a burst of raises within one transaction
//! collapses into one. The first cause wins.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Why the latch was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCause {
    /// A processor declared the transaction complete.
    Completed,
    /// The stick sent NAK: the frame was rejected.
    Nak,
    /// The stick sent CAN: resend after a pause.
    Can,
}

/// Single-slot completion latch. Clone freely; all clones share the slot.
#[derive(Clone)]
pub struct CompletionLatch {
    tx: Sender<SignalCause>,
    rx: Receiver<SignalCause>,
}

impl CompletionLatch {
    /// Create an unraised latch.
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        CompletionLatch { tx, rx }
    }

    /// Raise the latch. No-op if it is already raised.
    pub fn raise(&self, cause: SignalCause) {
        let _ = self.tx.try_send(cause);
    }

    /// Reset the latch to "not signalled".
    pub fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Wait up to `timeout` for the latch to be raised, consuming the raise.
    pub fn wait(&self, timeout: Duration) -> Option<SignalCause> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}
