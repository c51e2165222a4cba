//! Processors for the controller identity and initialization chain.
//!
//! The initialization protocol lives here rather than in the engine:
//! GetVersion and MemoryGetId simply store their answers, the capabilities
//! response enqueues SerialApiGetInitData, and the init-data response creates
//! the node table and kicks off the per-node queries.

use tracing::{debug, info, warn};
use zwave_protocol::{requests, SerialMessage};

use crate::context::DriverContext;
use crate::processors::{Disposition, MessageProcessor};
use crate::registry::{Node, NodeStage};

/// Stores the library version string and library type.
pub struct GetVersionProcessor;

impl MessageProcessor for GetVersionProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let payload = &incoming.payload;
        if payload.len() < 2 {
            warn!("GetVersion response too short: {} bytes", payload.len());
            return Disposition::complete();
        }
        let library_type = payload[payload.len() - 1];
        let version = String::from_utf8_lossy(&payload[..payload.len() - 1])
            .trim_end_matches('\0')
            .trim()
            .to_string();
        debug!("library version = {}, library type = {}", version, library_type);
        ctx.state.set_version(version, library_type);
        Disposition::complete()
    }
}

/// Stores the home id and the controller's own node id.
pub struct MemoryGetIdProcessor;

impl MessageProcessor for MemoryGetIdProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let payload = &incoming.payload;
        if payload.len() < 5 {
            warn!("MemoryGetId response too short: {} bytes", payload.len());
            return Disposition::complete();
        }
        let home_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let own_node_id = payload[4];
        debug!("home id = 0x{:08X}, own node id = {}", home_id, own_node_id);
        ctx.state.set_ids(home_id, own_node_id);
        Disposition::complete()
    }
}

/// Stores the capabilities block and chains into SerialApiGetInitData.
pub struct GetCapabilitiesProcessor;

impl MessageProcessor for GetCapabilitiesProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let payload = &incoming.payload;
        if payload.len() < 8 {
            warn!(
                "SerialApiGetCapabilities response too short: {} bytes",
                payload.len()
            );
            return Disposition::complete();
        }
        let serial_api_version = format!("{}.{}", payload[0], payload[1]);
        let manufacturer_id = u16::from_be_bytes([payload[2], payload[3]]);
        let device_type = u16::from_be_bytes([payload[4], payload[5]]);
        let device_id = u16::from_be_bytes([payload[6], payload[7]]);
        debug!(
            "serial API version = {}, manufacturer = 0x{:04X}, device type = 0x{:04X}, device id = 0x{:04X}",
            serial_api_version, manufacturer_id, device_type, device_id
        );
        ctx.state
            .set_capabilities(serial_api_version, manufacturer_id, device_type, device_id);

        ctx.enqueue(requests::serial_api_get_init_data());
        Disposition::complete()
    }
}

/// Builds the node table from the stick's node bitmask.
pub struct GetInitDataProcessor;

impl MessageProcessor for GetInitDataProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        let payload = &incoming.payload;
        if payload.len() < 3 {
            warn!(
                "SerialApiGetInitData response too short: {} bytes",
                payload.len()
            );
            return Disposition::complete();
        }
        let bitmask_len = payload[2] as usize;
        if payload.len() < 3 + bitmask_len {
            warn!("SerialApiGetInitData bitmask truncated");
            return Disposition::complete();
        }

        let home_id = ctx.state.home_id();
        let own_node_id = ctx.state.own_node_id();
        let mut discovered = 0;
        for (byte_index, byte) in payload[3..3 + bitmask_len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) == 0 {
                    continue;
                }
                let node_id = (byte_index * 8 + bit + 1) as u8;
                discovered += 1;

                let mut node = Node::new(home_id, node_id);
                if node_id == own_node_id {
                    // The stick is this node; we already know its identity
                    // from the capabilities block and will never query it
                    // through the manufacturer specific command class.
                    node.manufacturer_id = ctx.state.manufacturer_id();
                    node.device_type = ctx.state.device_type();
                    node.device_id = ctx.state.device_id();
                }
                ctx.nodes.insert(node);
                ctx.advance_node_stage(node_id, NodeStage::ProtoInfo);
            }
        }
        info!("stick reports {} nodes in home 0x{:08X}", discovered, home_id);
        ctx.state.set_link_up(true);
        Disposition::complete()
    }
}

/// Completes the soft-reset transaction.
pub struct SoftResetProcessor;

impl MessageProcessor for SoftResetProcessor {
    fn handle_response(
        &self,
        _ctx: &DriverContext,
        _in_flight: Option<&SerialMessage>,
        _incoming: &SerialMessage,
    ) -> Disposition {
        info!("stick acknowledged soft reset");
        Disposition::complete()
    }
}
