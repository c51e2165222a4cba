//! Shared controller state and the context handed to processors.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use zwave_protocol::{requests, SerialMessage};

use crate::config::DriverConfig;
use crate::events::{ControllerEvent, EventBus};
use crate::queue::SendQueue;
use crate::registry::{NodeRegistry, NodeStage};

/// Protocol flow counters.
#[derive(Debug, Default)]
pub struct Counters {
    /// Start-of-frame bytes received.
    pub sof: AtomicU32,
    /// ACKs received.
    pub ack: AtomicU32,
    /// NAKs received.
    pub nak: AtomicU32,
    /// CANs received.
    pub can: AtomicU32,
    /// Out-of-frame bytes received.
    pub oof: AtomicU32,
    /// Transactions that timed out.
    pub timeouts: AtomicU32,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU32) -> u32 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Default)]
struct Identity {
    home_id: u32,
    own_node_id: u8,
    zwave_version: String,
    serial_api_version: String,
    library_type: u8,
    manufacturer_id: u16,
    device_type: u16,
    device_id: u16,
}

/// Identity, lifecycle flags and counters of the attached stick.
pub struct ControllerState {
    identity: Mutex<Identity>,
    connected: AtomicBool,
    initialization_complete: AtomicBool,
    callback_counter: Mutex<u8>,
    /// Protocol flow counters.
    pub counters: Counters,
}

impl ControllerState {
    /// Fresh, disconnected state.
    pub fn new() -> Self {
        ControllerState {
            identity: Mutex::new(Identity::default()),
            connected: AtomicBool::new(false),
            initialization_complete: AtomicBool::new(false),
            callback_counter: Mutex::new(0),
            counters: Counters::default(),
        }
    }

    /// Home id of the network.
    pub fn home_id(&self) -> u32 {
        self.identity.lock().unwrap().home_id
    }

    /// The controller's own node id.
    pub fn own_node_id(&self) -> u8 {
        self.identity.lock().unwrap().own_node_id
    }

    /// Library version string reported by GetVersion.
    pub fn zwave_version(&self) -> String {
        self.identity.lock().unwrap().zwave_version.clone()
    }

    /// Serial API version reported by the capabilities block.
    pub fn serial_api_version(&self) -> String {
        self.identity.lock().unwrap().serial_api_version.clone()
    }

    /// Library type byte reported by GetVersion.
    pub fn library_type(&self) -> u8 {
        self.identity.lock().unwrap().library_type
    }

    /// Manufacturer id of the stick.
    pub fn manufacturer_id(&self) -> u16 {
        self.identity.lock().unwrap().manufacturer_id
    }

    /// Device type of the stick.
    pub fn device_type(&self) -> u16 {
        self.identity.lock().unwrap().device_type
    }

    /// Device id of the stick.
    pub fn device_id(&self) -> u16 {
        self.identity.lock().unwrap().device_id
    }

    /// Store the GetVersion results.
    pub fn set_version(&self, version: String, library_type: u8) {
        let mut identity = self.identity.lock().unwrap();
        identity.zwave_version = version;
        identity.library_type = library_type;
    }

    /// Store the MemoryGetId results.
    pub fn set_ids(&self, home_id: u32, own_node_id: u8) {
        let mut identity = self.identity.lock().unwrap();
        identity.home_id = home_id;
        identity.own_node_id = own_node_id;
    }

    /// Store the capabilities block results.
    pub fn set_capabilities(
        &self,
        serial_api_version: String,
        manufacturer_id: u16,
        device_type: u16,
        device_id: u16,
    ) {
        let mut identity = self.identity.lock().unwrap();
        identity.serial_api_version = serial_api_version;
        identity.manufacturer_id = manufacturer_id;
        identity.device_type = device_type;
        identity.device_id = device_id;
    }

    /// Whether the link is up (set by the init-data handler).
    pub fn is_link_up(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the link as up or down.
    pub fn set_link_up(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }

    /// Whether every node reached a terminal or excluded state.
    pub fn is_initialization_complete(&self) -> bool {
        self.initialization_complete.load(Ordering::SeqCst)
    }

    /// Latch initialization-complete. Returns whether this call flipped it,
    /// so the completion event fires exactly once per controller lifetime.
    pub fn latch_initialization_complete(&self) -> bool {
        !self.initialization_complete.swap(true, Ordering::SeqCst)
    }

    /// Next callback id: wraps 255 to 1 and never yields 0.
    pub fn next_callback_id(&self) -> u8 {
        let mut counter = self.callback_counter.lock().unwrap();
        *counter = if *counter >= 0xFF { 1 } else { *counter + 1 };
        *counter
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a message processor may touch, threaded in explicitly.
#[derive(Clone)]
pub struct DriverContext {
    /// Driver tunables.
    pub config: DriverConfig,
    /// Stick identity and counters.
    pub state: Arc<ControllerState>,
    /// Per-node state.
    pub nodes: Arc<NodeRegistry>,
    /// The outbound send queue.
    pub queue: Arc<SendQueue>,
    /// Event subscribers.
    pub events: Arc<EventBus>,
}

impl DriverContext {
    /// Enqueue a fresh message, stamping its attempt budget.
    pub fn enqueue(&self, mut message: SerialMessage) {
        message.attempts = self.config.max_attempts;
        self.queue.push(message);
    }

    /// Put a partially spent message back on the queue, budget untouched.
    pub fn requeue(&self, message: SerialMessage) {
        self.queue.push(message);
    }

    /// Deliver an event to all subscribers.
    pub fn emit(&self, event: ControllerEvent) {
        self.events.dispatch(&event);
    }

    /// Advance a node to `stage` and enqueue the query that stage asks for.
    pub fn advance_node_stage(&self, node_id: u8, stage: NodeStage) {
        if !self.nodes.set_stage(node_id, stage) {
            return;
        }
        match stage {
            NodeStage::ProtoInfo => self.enqueue(requests::identify_node(node_id)),
            NodeStage::NodeBuildInfo => self.enqueue(requests::request_node_info(node_id)),
            NodeStage::Details => self.enqueue(requests::get_routing_info(node_id)),
            NodeStage::Done => debug!("NODE {}: initialization complete", node_id),
            NodeStage::EmptyNode | NodeStage::Dead => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_id_wraps_and_skips_zero() {
        let state = ControllerState::new();
        assert_eq!(state.next_callback_id(), 1);
        assert_eq!(state.next_callback_id(), 2);

        *state.callback_counter.lock().unwrap() = 0xFE;
        assert_eq!(state.next_callback_id(), 0xFF);
        assert_eq!(state.next_callback_id(), 1);
    }

    #[test]
    fn test_callback_ids_distinct_over_a_cycle() {
        let state = ControllerState::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..255 {
            assert!(seen.insert(state.next_callback_id()));
        }
        // The 256th id begins the next cycle.
        assert!(!seen.insert(state.next_callback_id()));
        assert!(!seen.contains(&0));
    }

    #[test]
    fn test_initialization_latch_flips_once() {
        let state = ControllerState::new();
        assert!(!state.is_initialization_complete());
        assert!(state.latch_initialization_complete());
        assert!(!state.latch_initialization_complete());
        assert!(state.is_initialization_complete());
    }
}
