//! Host-side driver for a Z-Wave controller stick on a serial port.
//!
//! The driver accepts application-level requests (query the stick identity,
//! enumerate nodes, send data, include/exclude, routing commands) and
//! delivers asynchronous events (node status changes, transaction
//! completion, initialization complete) to subscribers. Internally it runs
//! the serial framing protocol, the host/stick transaction state machine, a
//! priority-ordered send queue with retry and timeout, wake-up-aware
//! dispatch for battery nodes and a node lifecycle watchdog.
//!
//! # Architecture
//!
//! Two long-lived threads talk to the stick: the engine worker
//! (send side, one transaction in flight at a time) and the receive loop
//! (frame assembly, ACK/NAK/CAN flow control). A watchdog thread respawns
//! them after I/O failures. Callers only ever enqueue.
//!
//! ```text
//! caller ──> Controller ──> SendQueue ──> engine ──> SerialLink ──> (wire)
//!                ▲                           ▲                        │
//!                │ events                    │ completion latch       ▼
//!            EventBus <── processors <── receive loop <────────── SerialLink
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use zwave_driver::{Controller, DriverConfig};
//!
//! let controller = Controller::open("/dev/ttyUSB0", DriverConfig::default())?;
//! controller.initialize();
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod link;
pub mod processors;
pub mod queue;
pub mod registry;
pub mod signal;

mod engine;
mod receive;
mod watchdog;

pub use config::DriverConfig;
pub use context::{ControllerState, Counters, DriverContext};
pub use controller::Controller;
pub use error::{DriverError, Result};
pub use events::{ControllerEvent, EventBus, EventListener, NodeState};
pub use link::{LinkReader, LinkWriter, ReadByte, SerialLink};
pub use processors::{Disposition, MessageProcessor, ProcessorRegistry};
pub use queue::SendQueue;
pub use registry::{Node, NodeRegistry, NodeStage, SweepReport};
pub use signal::{CompletionLatch, SignalCause};
