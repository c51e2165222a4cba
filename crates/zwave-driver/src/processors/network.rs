//! Processors for the network management commands: inclusion, failed-node
//! removal, neighbor updates and return routes.

use tracing::{debug, info, warn};
use zwave_protocol::{
    requests, MessageClass, SerialMessage, ADD_NODE_STATUS_ADDING_CONTROLLER,
    ADD_NODE_STATUS_ADDING_SLAVE, ADD_NODE_STATUS_DONE, ADD_NODE_STATUS_FAILED,
    ADD_NODE_STATUS_LEARN_READY, ADD_NODE_STATUS_NODE_FOUND, ADD_NODE_STATUS_PROTOCOL_DONE,
    NEIGHBOR_UPDATE_DONE, NEIGHBOR_UPDATE_FAILED, NEIGHBOR_UPDATE_STARTED,
    REMOVE_FAILED_NODE_REMOVED,
};

use crate::context::DriverContext;
use crate::processors::{Disposition, MessageProcessor};

/// Walks the inclusion-mode callback ladder.
pub struct AddNodeProcessor;

impl MessageProcessor for AddNodeProcessor {
    fn handle_request(
        &self,
        ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let Some(status) = incoming.payload_byte(1) else {
            warn!("truncated AddNode callback");
            return Disposition::pending();
        };
        match status {
            ADD_NODE_STATUS_LEARN_READY => {
                info!("ready to include a node");
                Disposition::pending()
            }
            ADD_NODE_STATUS_NODE_FOUND => {
                debug!("inclusion: node found");
                Disposition::pending()
            }
            ADD_NODE_STATUS_ADDING_SLAVE | ADD_NODE_STATUS_ADDING_CONTROLLER => {
                info!("including node {:?}", incoming.payload_byte(2));
                Disposition::pending()
            }
            ADD_NODE_STATUS_PROTOCOL_DONE => {
                // Protocol part finished; tell the stick to leave inclusion
                // mode. Its Done callback terminates that transaction.
                ctx.enqueue(requests::add_node_stop());
                Disposition::complete()
            }
            ADD_NODE_STATUS_DONE => {
                info!("inclusion finished");
                Disposition::complete()
            }
            ADD_NODE_STATUS_FAILED => {
                warn!("inclusion failed");
                Disposition::complete()
            }
            other => {
                warn!("unknown AddNode status 0x{:02X}", other);
                Disposition::pending()
            }
        }
    }
}

/// Handles failed-node removal and drops removed nodes from the registry.
pub struct RemoveFailedNodeProcessor;

impl MessageProcessor for RemoveFailedNodeProcessor {
    fn handle_response(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        match incoming.payload_byte(0) {
            Some(0) => {
                debug!("failed-node removal started, awaiting callback");
                Disposition::pending()
            }
            Some(reason) => {
                warn!("failed-node removal rejected, reason 0x{:02X}", reason);
                Disposition::complete()
            }
            None => {
                warn!("empty RemoveFailedNode response");
                Disposition::pending()
            }
        }
    }

    fn handle_request(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let status = incoming.payload_byte(1);
        let node_id = in_flight
            .filter(|m| m.message_class == MessageClass::RemoveFailedNode)
            .and_then(|m| m.node_id);
        if status == Some(REMOVE_FAILED_NODE_REMOVED) {
            if let Some(node_id) = node_id {
                ctx.nodes.remove(node_id);
                info!("NODE {}: removed from the network", node_id);
            }
        } else {
            warn!("NODE {:?}: not removed, status {:?}", node_id, status);
        }
        Disposition::complete()
    }
}

/// Walks the neighbor-discovery callback ladder and refreshes routing info
/// once it finishes.
pub struct NeighborUpdateProcessor;

impl MessageProcessor for NeighborUpdateProcessor {
    fn handle_request(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let node_id = in_flight
            .filter(|m| m.message_class == MessageClass::RequestNodeNeighborUpdate)
            .and_then(|m| m.node_id);
        match incoming.payload_byte(1) {
            Some(NEIGHBOR_UPDATE_STARTED) => {
                debug!("NODE {:?}: neighbor discovery started", node_id);
                Disposition::pending()
            }
            Some(NEIGHBOR_UPDATE_DONE) => {
                debug!("NODE {:?}: neighbor discovery finished", node_id);
                if let Some(node_id) = node_id {
                    super::node_info::refresh_routing_info(ctx, node_id);
                }
                Disposition::complete()
            }
            Some(NEIGHBOR_UPDATE_FAILED) => {
                warn!("NODE {:?}: neighbor discovery failed", node_id);
                Disposition::complete()
            }
            other => {
                warn!("unknown neighbor update status {:?}", other);
                Disposition::pending()
            }
        }
    }
}

/// Shared handler for the three return-route commands; they answer with the
/// same accept-then-callback shape.
pub struct ReturnRouteProcessor;

impl MessageProcessor for ReturnRouteProcessor {
    fn handle_response(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        match incoming.payload_byte(0) {
            Some(0) => {
                warn!(
                    "{:?} request rejected by the stick",
                    incoming.message_class
                );
                Disposition::complete()
            }
            Some(_) => {
                debug!("{:?} accepted, awaiting callback", incoming.message_class);
                Disposition::pending()
            }
            None => {
                warn!("empty {:?} response", incoming.message_class);
                Disposition::pending()
            }
        }
    }

    fn handle_request(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        match incoming.payload_byte(1) {
            Some(0) => debug!("{:?} finished", incoming.message_class),
            other => warn!(
                "{:?} finished with status {:?}",
                incoming.message_class, other
            ),
        }
        Disposition::complete()
    }
}
