//! Message processors: per-class interpretation of incoming frames.
//!
//! The receive loop hands every valid frame to the processor registered for
//! its message class, along with the message currently in flight. The
//! processor mutates driver state through the [`DriverContext`] and returns a
//! [`Disposition`] saying whether the in-flight transaction is now complete.
//! Completion is a return value, never processor-held state, so a processor
//! instance can serve concurrent controllers.

mod controller_info;
mod network;
mod node_info;
mod send_data;

pub use send_data::handle_failed_send_data;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;
use zwave_protocol::{MessageClass, SerialMessage};

use crate::context::DriverContext;

/// What a processor decided about the in-flight transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    /// Whether the in-flight transaction is complete.
    pub transaction_complete: bool,
}

impl Disposition {
    /// The transaction is complete.
    pub fn complete() -> Self {
        Disposition {
            transaction_complete: true,
        }
    }

    /// The transaction is still waiting for more traffic.
    pub fn pending() -> Self {
        Disposition {
            transaction_complete: false,
        }
    }
}

/// A handler for one message class.
///
/// The default implementations log and leave the transaction pending, so a
/// processor only overrides the directions its class actually uses.
pub trait MessageProcessor: Send + Sync {
    /// Handle a Response frame (the stick answering one of our requests).
    fn handle_response(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        warn!(
            "unexpected response for message class {:?}, ignoring",
            incoming.message_class
        );
        Disposition::pending()
    }

    /// Handle a Request frame (the stick calling back asynchronously).
    fn handle_request(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        warn!(
            "unexpected request for message class {:?}, ignoring",
            incoming.message_class
        );
        Disposition::pending()
    }
}

/// Dispatch table from message class to processor.
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<MessageClass, Arc<dyn MessageProcessor>>>,
}

impl ProcessorRegistry {
    /// An empty registry; every frame will be logged and dropped.
    pub fn empty() -> Self {
        ProcessorRegistry {
            processors: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in processors for every Serial API class
    /// the driver consumes.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(
            MessageClass::GetVersion,
            Arc::new(controller_info::GetVersionProcessor),
        );
        registry.register(
            MessageClass::MemoryGetId,
            Arc::new(controller_info::MemoryGetIdProcessor),
        );
        registry.register(
            MessageClass::SerialApiGetCapabilities,
            Arc::new(controller_info::GetCapabilitiesProcessor),
        );
        registry.register(
            MessageClass::SerialApiGetInitData,
            Arc::new(controller_info::GetInitDataProcessor),
        );
        registry.register(
            MessageClass::SerialApiSoftReset,
            Arc::new(controller_info::SoftResetProcessor),
        );
        registry.register(
            MessageClass::IdentifyNode,
            Arc::new(node_info::IdentifyNodeProcessor),
        );
        registry.register(
            MessageClass::RequestNodeInfo,
            Arc::new(node_info::RequestNodeInfoProcessor),
        );
        registry.register(
            MessageClass::ApplicationUpdate,
            Arc::new(node_info::ApplicationUpdateProcessor),
        );
        registry.register(
            MessageClass::GetRoutingInfo,
            Arc::new(node_info::GetRoutingInfoProcessor),
        );
        registry.register(MessageClass::SendData, Arc::new(send_data::SendDataProcessor));
        registry.register(MessageClass::AddNode, Arc::new(network::AddNodeProcessor));
        registry.register(
            MessageClass::RemoveFailedNode,
            Arc::new(network::RemoveFailedNodeProcessor),
        );
        registry.register(
            MessageClass::RequestNodeNeighborUpdate,
            Arc::new(network::NeighborUpdateProcessor),
        );
        let return_routes: Arc<dyn MessageProcessor> = Arc::new(network::ReturnRouteProcessor);
        registry.register(MessageClass::AssignReturnRoute, Arc::clone(&return_routes));
        registry.register(MessageClass::AssignSucReturnRoute, Arc::clone(&return_routes));
        registry.register(MessageClass::DeleteReturnRoute, return_routes);
        registry
    }

    /// Register (or replace) the processor for a class. External layers use
    /// this to hook their own command handling in.
    pub fn register(&self, class: MessageClass, processor: Arc<dyn MessageProcessor>) {
        self.processors.write().unwrap().insert(class, processor);
    }

    /// Look up the processor for a class.
    pub fn get(&self, class: MessageClass) -> Option<Arc<dyn MessageProcessor>> {
        self.processors.read().unwrap().get(&class).cloned()
    }
}
