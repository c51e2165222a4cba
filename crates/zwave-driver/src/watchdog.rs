//! Thread-liveness watchdog.
//!
//! Both worker loops exit on I/O errors rather than surfacing them to
//! callers. The watchdog notices, tears the connection down and reconnects
//! on the stored port name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use crate::controller::ControllerInner;

/// Sleep slice between stop-flag checks.
const CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) struct Watchdog {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the watchdog thread with the given check period.
    pub(crate) fn spawn(inner: Arc<ControllerInner>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut since_check = Duration::ZERO;
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(CHECK_INTERVAL);
                since_check += CHECK_INTERVAL;
                if since_check < period {
                    continue;
                }
                since_check = Duration::ZERO;
                trace!("watchdog: checking serial threads");
                inner.check_liveness();
            }
        });
        Watchdog {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the watchdog thread and wait for it to finish.
    pub(crate) fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
