//! Processors for the per-node initialization queries.

use tracing::{debug, warn};
use zwave_protocol::{
    requests, MessageClass, SerialMessage, APPLICATION_UPDATE_NODE_INFO_RECEIVED,
    APPLICATION_UPDATE_NODE_INFO_REQ_FAILED, NODE_BITMASK_SIZE, PROTOCOL_INFO_FREQUENT_LISTENING,
    PROTOCOL_INFO_LISTENING,
};

use crate::context::DriverContext;
use crate::processors::{Disposition, MessageProcessor};
use crate::registry::NodeStage;

/// The node a response belongs to: the target of the request in flight.
fn in_flight_target(in_flight: Option<&SerialMessage>, class: MessageClass) -> Option<u8> {
    in_flight
        .filter(|m| m.message_class == class)
        .and_then(|m| m.node_id)
}

/// Stores a node's protocol info and advances it to the node-info query.
pub struct IdentifyNodeProcessor;

impl MessageProcessor for IdentifyNodeProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let Some(node_id) = in_flight_target(in_flight, MessageClass::IdentifyNode) else {
            warn!("IdentifyNode response with no matching request in flight");
            return Disposition::pending();
        };
        let payload = &incoming.payload;
        if payload.len() < 6 {
            warn!("NODE {}: protocol info too short: {} bytes", node_id, payload.len());
            return Disposition::complete();
        }

        let listening = payload[0] & PROTOCOL_INFO_LISTENING != 0;
        let frequently_listening = payload[1] & PROTOCOL_INFO_FREQUENT_LISTENING != 0;
        ctx.nodes.with_node(node_id, |node| {
            node.listening = listening;
            node.frequently_listening = frequently_listening;
            node.basic_class = payload[3];
            node.generic_class = payload[4];
            node.specific_class = payload[5];
        });
        debug!(
            "NODE {}: listening = {}, frequently listening = {}, device class = {:02X}:{:02X}:{:02X}",
            node_id, listening, frequently_listening, payload[3], payload[4], payload[5]
        );

        ctx.advance_node_stage(node_id, NodeStage::NodeBuildInfo);
        Disposition::complete()
    }
}

/// Tracks whether the stick accepted a node-info request; the answer itself
/// arrives later as an ApplicationUpdate.
pub struct RequestNodeInfoProcessor;

impl MessageProcessor for RequestNodeInfoProcessor {
    fn handle_response(
        &self,
        _ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let node_id = in_flight_target(in_flight, MessageClass::RequestNodeInfo);
        if incoming.payload_byte(0) == Some(0) {
            warn!("NODE {:?}: node info request was rejected by the stick", node_id);
            return Disposition::complete();
        }
        debug!("NODE {:?}: node info request accepted, awaiting node information frame", node_id);
        Disposition::pending()
    }
}

/// Handles node information frames and request failures from the network.
pub struct ApplicationUpdateProcessor;

impl MessageProcessor for ApplicationUpdateProcessor {
    fn handle_request(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let payload = &incoming.payload;
        let Some(state) = incoming.payload_byte(0) else {
            warn!("empty ApplicationUpdate");
            return Disposition::pending();
        };
        match state {
            APPLICATION_UPDATE_NODE_INFO_RECEIVED => {
                if payload.len() < 3 {
                    warn!("ApplicationUpdate node info too short: {} bytes", payload.len());
                    return Disposition::pending();
                }
                let node_id = payload[1];
                let length = payload[2] as usize;
                if length >= 3 && payload.len() >= 3 + length {
                    let classes = &payload[6..3 + length];
                    ctx.nodes.with_node(node_id, |node| {
                        for class in classes {
                            node.command_classes.insert(*class);
                        }
                    });
                    debug!(
                        "NODE {}: node information frame with {} command classes",
                        node_id,
                        classes.len()
                    );
                }
                ctx.advance_node_stage(node_id, NodeStage::Details);

                let awaited = in_flight_target(in_flight, MessageClass::RequestNodeInfo);
                if awaited == Some(node_id) {
                    Disposition::complete()
                } else {
                    // Unsolicited node information frame; nothing in flight
                    // to terminate.
                    Disposition::pending()
                }
            }
            APPLICATION_UPDATE_NODE_INFO_REQ_FAILED => {
                let node_id = in_flight_target(in_flight, MessageClass::RequestNodeInfo);
                warn!("NODE {:?}: node information frame never arrived", node_id);
                if node_id.is_some() {
                    Disposition::complete()
                } else {
                    Disposition::pending()
                }
            }
            other => {
                debug!("ignoring ApplicationUpdate state 0x{:02X}", other);
                Disposition::pending()
            }
        }
    }
}

/// Stores a node's routing table entry and finishes its initialization.
pub struct GetRoutingInfoProcessor;

impl MessageProcessor for GetRoutingInfoProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let Some(node_id) = in_flight_target(in_flight, MessageClass::GetRoutingInfo) else {
            warn!("GetRoutingInfo response with no matching request in flight");
            return Disposition::pending();
        };
        let payload = &incoming.payload;
        if payload.len() < NODE_BITMASK_SIZE {
            warn!("NODE {}: routing info too short: {} bytes", node_id, payload.len());
            return Disposition::complete();
        }

        let mut neighbors = Vec::new();
        for (byte_index, byte) in payload[..NODE_BITMASK_SIZE].iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    neighbors.push((byte_index * 8 + bit + 1) as u8);
                }
            }
        }
        debug!("NODE {}: neighbors = {:?}", node_id, neighbors);
        ctx.nodes.with_node(node_id, |node| node.neighbors = neighbors);

        ctx.advance_node_stage(node_id, NodeStage::Done);
        Disposition::complete()
    }
}

/// Enqueue the routing-info query after a neighbor update finished; exposed
/// for the neighbor-update processor.
pub(crate) fn refresh_routing_info(ctx: &DriverContext, node_id: u8) {
    ctx.enqueue(requests::get_routing_info(node_id));
}
