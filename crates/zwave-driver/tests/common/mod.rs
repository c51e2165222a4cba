//! Test harness: an in-memory duplex port, a scripted stick on its far end
//! and an event recorder.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use zwave_driver::{Controller, ControllerEvent, DriverConfig, EventListener, Node};
use zwave_protocol::{frame, MessageClass, SerialMessage, SOF};

/// How long the driver-side mock reader blocks before reporting a timeout.
const MOCK_READ_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Mock transport
// ============================================================================

/// Driver-side reader over a byte channel.
pub struct MockReader {
    rx: Receiver<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(MOCK_READ_TIMEOUT) {
            Ok(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            Err(RecvTimeoutError::Timeout) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock port receive timeout",
            )),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

/// Driver-side writer over a byte channel.
pub struct MockWriter {
    tx: Sender<u8>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for byte in buf {
            self.tx.send(*byte).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock port closed")
            })?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Something the host put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    /// A single control byte (ACK, NAK, CAN).
    Control(u8),
    /// A complete SOF frame, decoded.
    Frame(SerialMessage),
}

/// The far (stick) end of the mock port.
pub struct Stick {
    to_host: Sender<u8>,
    from_host: Receiver<u8>,
}

impl Stick {
    /// Push raw bytes toward the host.
    pub fn send(&self, bytes: &[u8]) {
        for byte in bytes {
            let _ = self.to_host.send(*byte);
        }
    }

    /// Push a Response frame of `class` with `payload` toward the host.
    pub fn send_response(&self, class: MessageClass, payload: &[u8]) {
        self.send(&raw_frame(0x01, class.key(), payload));
    }

    /// Push a Request frame (asynchronous callback) toward the host.
    pub fn send_request(&self, class: MessageClass, payload: &[u8]) {
        self.send(&raw_frame(0x00, class.key(), payload));
    }

    fn recv_byte(&self, timeout: Duration) -> Option<u8> {
        self.from_host.recv_timeout(timeout).ok()
    }

    /// Read the next control byte or complete frame from the host.
    pub fn next_item(&self, timeout: Duration) -> Option<WireItem> {
        let first = self.recv_byte(timeout)?;
        if first != SOF {
            return Some(WireItem::Control(first));
        }
        let length = self.recv_byte(timeout)? as usize;
        let mut buffer = vec![SOF, length as u8];
        while buffer.len() < length + 2 {
            buffer.push(self.recv_byte(timeout)?);
        }
        let message = frame::decode(&buffer).expect("host sent an invalid frame");
        Some(WireItem::Frame(message))
    }

    /// Read items until a frame arrives, skipping control bytes.
    pub fn next_frame(&self, timeout: Duration) -> SerialMessage {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out waiting for a frame from the host");
            match self.next_item(remaining) {
                Some(WireItem::Frame(message)) => return message,
                Some(WireItem::Control(_)) => continue,
                None => panic!("timed out waiting for a frame from the host"),
            }
        }
    }

    /// Read items until the given control byte arrives, skipping frames.
    pub fn wait_for_control(&self, expected: u8, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for control 0x{:02X}", expected));
            match self.next_item(remaining) {
                Some(WireItem::Control(byte)) if byte == expected => return,
                Some(_) => continue,
                None => panic!("timed out waiting for control 0x{:02X}", expected),
            }
        }
    }

    /// Assert the host does not transmit any frame within `window`.
    pub fn assert_no_frame_within(&self, window: Duration) {
        let deadline = Instant::now() + window;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            match self.next_item(remaining) {
                Some(WireItem::Frame(message)) => {
                    panic!("host unexpectedly transmitted a frame: {:?}", message)
                }
                Some(WireItem::Control(_)) => continue,
                None => return,
            }
        }
    }
}

/// Build a raw frame the way the stick would: independent of the driver's
/// codec, so the two implementations cross-check each other.
pub fn raw_frame(message_type: u8, class: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 5);
    buf.push(SOF);
    buf.push((payload.len() + 3) as u8);
    buf.push(message_type);
    buf.push(class);
    buf.extend_from_slice(payload);
    let checksum = buf[1..].iter().fold(0xFF, |acc, b| acc ^ b);
    buf.push(checksum);
    buf
}

// ============================================================================
// Event recorder
// ============================================================================

/// Collects every emitted event and lets tests wait for one.
pub struct Recorder {
    events: Mutex<Vec<ControllerEvent>>,
    arrived: Condvar,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        })
    }

    /// All events seen so far.
    pub fn snapshot(&self) -> Vec<ControllerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ControllerEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Block until an event matching `pred` has been recorded.
    pub fn wait_for(
        &self,
        pred: impl Fn(&ControllerEvent) -> bool,
        timeout: Duration,
    ) -> Option<ControllerEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        loop {
            if let Some(event) = events.iter().find(|e| pred(e)) {
                return Some(event.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .arrived
                .wait_timeout(events, deadline - now)
                .unwrap();
            events = guard;
        }
    }
}

impl EventListener for Recorder {
    fn on_event(&self, event: &ControllerEvent) {
        self.events.lock().unwrap().push(event.clone());
        self.arrived.notify_all();
    }
}

// ============================================================================
// Driver setup
// ============================================================================

/// Spin up a controller on an in-memory port. Returns the controller, the
/// stick end of the port and a subscribed event recorder.
pub fn driver(config: DriverConfig) -> (Controller, Stick, Arc<Recorder>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (host_tx, host_rx) = unbounded();
    let (stick_tx, stick_rx) = unbounded();
    let controller = Controller::open_with_transport(
        Box::new(MockReader { rx: stick_rx }),
        Box::new(MockWriter { tx: host_tx }),
        config,
    );
    let recorder = Recorder::new();
    controller.add_event_listener(recorder.clone());
    let stick = Stick {
        to_host: stick_tx,
        from_host: host_rx,
    };
    (controller, stick, recorder)
}

/// A listening node, as it would look after its protocol info came back.
pub fn listening_node(home_id: u32, node_id: u8) -> Node {
    let mut node = Node::new(home_id, node_id);
    node.listening = true;
    node
}
