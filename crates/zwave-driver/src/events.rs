//! Driver events and their subscribers.

use std::sync::{Arc, Mutex};

use tracing::trace;
use zwave_protocol::SerialMessage;

/// Reported state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node is responding.
    Alive,
    /// The node has been given up on.
    Dead,
}

/// Asynchronous events emitted by the driver.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A queued message finished its transaction.
    TransactionCompleted {
        /// The message that was sent.
        message: SerialMessage,
    },
    /// Every node reached a terminal or excluded state; emitted exactly once
    /// per controller lifetime.
    InitializationCompleted {
        /// The controller's own node id.
        own_node_id: u8,
    },
    /// A node changed liveness state.
    NodeStatus {
        /// The node concerned.
        node_id: u8,
        /// Its new state.
        state: NodeState,
    },
}

/// A subscriber to driver events.
pub trait EventListener: Send + Sync {
    /// Called for every emitted event, on a driver thread.
    fn on_event(&self, event: &ControllerEvent);
}

/// The subscriber list.
///
/// Dispatch iterates a snapshot of the list, so listeners may subscribe or
/// unsubscribe from within a callback.
pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        EventBus {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe a listener.
    pub fn add(&self, listener: Arc<dyn EventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Unsubscribe a listener, matching by identity.
    pub fn remove(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    /// Number of subscribed listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Whether no listener is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every currently subscribed listener.
    pub fn dispatch(&self, event: &ControllerEvent) {
        trace!("notifying event listeners: {:?}", event);
        let snapshot: Vec<Arc<dyn EventListener>> = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            listener.on_event(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
