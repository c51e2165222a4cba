//! Constructors for the host-initiated Serial API requests.
//!
//! Each function builds a [`SerialMessage`] with the payload layout the stick
//! expects. `SendData` payloads are assembled by the application layer, which
//! knows the command class bytes; [`send_data`] only wraps them in the
//! addressing envelope.

use crate::constants::*;
use crate::message::{MessageClass, MessagePriority, SerialMessage};

/// Request the stick library version and type.
pub fn get_version() -> SerialMessage {
    SerialMessage::request(MessageClass::GetVersion, MessagePriority::High)
}

/// Request the home id and the controller's own node id.
pub fn memory_get_id() -> SerialMessage {
    SerialMessage::request(MessageClass::MemoryGetId, MessagePriority::High)
}

/// Request the Serial API capabilities block.
pub fn serial_api_get_capabilities() -> SerialMessage {
    SerialMessage::request(MessageClass::SerialApiGetCapabilities, MessagePriority::High)
}

/// Request the node bitmask the stick holds.
pub fn serial_api_get_init_data() -> SerialMessage {
    SerialMessage::request(MessageClass::SerialApiGetInitData, MessagePriority::High)
}

/// Request the protocol info of `node_id`.
pub fn identify_node(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::IdentifyNode, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Ask `node_id` to send its node information frame.
pub fn request_node_info(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::RequestNodeInfo, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Request the routing table entry of `node_id`.
pub fn get_routing_info(node_id: u8) -> SerialMessage {
    // Trailing bytes: keep bad routes, keep non-repeaters, function tag.
    SerialMessage::request(MessageClass::GetRoutingInfo, MessagePriority::High)
        .with_payload(vec![node_id, 0x00, 0x00, 0x03])
        .with_node(node_id)
}

/// Put the controller into inclusion mode.
pub fn add_node_start() -> SerialMessage {
    SerialMessage::request(MessageClass::AddNode, MessagePriority::High)
        .with_payload(vec![ADD_NODE_ANY | ADD_NODE_OPTION_HIGH_POWER])
}

/// Leave inclusion mode.
pub fn add_node_stop() -> SerialMessage {
    SerialMessage::request(MessageClass::AddNode, MessagePriority::High)
        .with_payload(vec![ADD_NODE_STOP])
}

/// Remove failed `node_id` from the routing table.
pub fn remove_failed_node(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::RemoveFailedNode, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Ask `node_id` to rediscover its neighbors.
pub fn request_node_neighbor_update(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::RequestNodeNeighborUpdate, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Assign a return route from `node_id` to `destination_id`.
pub fn assign_return_route(node_id: u8, destination_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::AssignReturnRoute, MessagePriority::High)
        .with_payload(vec![node_id, destination_id])
        .with_node(node_id)
}

/// Assign the SUC return route to `node_id`.
pub fn assign_suc_return_route(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::AssignSucReturnRoute, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Delete all return routes of `node_id`.
pub fn delete_return_route(node_id: u8) -> SerialMessage {
    SerialMessage::request(MessageClass::DeleteReturnRoute, MessagePriority::High)
        .with_payload(vec![node_id])
        .with_node(node_id)
}

/// Reset the stick firmware without losing the network configuration.
pub fn serial_api_soft_reset() -> SerialMessage {
    SerialMessage::request(MessageClass::SerialApiSoftReset, MessagePriority::High)
}

/// Abort the SendData currently in progress on the stick.
pub fn send_data_abort() -> SerialMessage {
    SerialMessage::request(MessageClass::SendDataAbort, MessagePriority::High)
}

/// Send application bytes `data` to `node_id`.
///
/// Transmit options and the callback id are assigned by the controller just
/// before the message is queued.
pub fn send_data(node_id: u8, data: &[u8], priority: MessagePriority) -> SerialMessage {
    let mut payload = Vec::with_capacity(data.len() + 2);
    payload.push(node_id);
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    SerialMessage::request(MessageClass::SendData, priority)
        .with_payload(payload)
        .with_node(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_requests_are_requests() {
        let all = [
            get_version(),
            memory_get_id(),
            serial_api_get_capabilities(),
            serial_api_get_init_data(),
            identify_node(3),
            request_node_info(3),
            get_routing_info(3),
            add_node_start(),
            add_node_stop(),
            remove_failed_node(3),
            request_node_neighbor_update(3),
            assign_return_route(3, 1),
            assign_suc_return_route(3),
            delete_return_route(3),
            serial_api_soft_reset(),
            send_data_abort(),
        ];
        for msg in all {
            assert_eq!(msg.message_type, MessageType::Request);
        }
    }

    #[test]
    fn test_send_data_wraps_payload() {
        let msg = send_data(7, &[0x25, 0x01], MessagePriority::Set);
        assert_eq!(msg.message_class, MessageClass::SendData);
        assert_eq!(msg.node_id, Some(7));
        assert_eq!(msg.payload, vec![7, 2, 0x25, 0x01]);
    }

    #[test]
    fn test_identify_node_addresses_target() {
        let msg = identify_node(9);
        assert_eq!(msg.payload, vec![9]);
        assert_eq!(msg.node_id, Some(9));
    }
}
