//! The SendData processor and its failure path.
//!
//! A SendData transaction spans two frames from the stick: the immediate
//! Response saying the command was queued on the radio, and an asynchronous
//! Request echoing our callback id with the transmission status. Only the
//! latter completes the transaction.

use tracing::{debug, error, warn};
use zwave_protocol::{
    MessageClass, MessagePriority, SerialMessage, TRANSMIT_COMPLETE_FAIL, TRANSMIT_COMPLETE_NOT_IDLE,
    TRANSMIT_COMPLETE_NO_ACK, TRANSMIT_COMPLETE_NO_ROUTE, TRANSMIT_COMPLETE_OK,
};

use crate::context::DriverContext;
use crate::events::{ControllerEvent, NodeState};
use crate::processors::{Disposition, MessageProcessor};
use crate::registry::NodeStage;

pub struct SendDataProcessor;

impl MessageProcessor for SendDataProcessor {
    fn handle_response(
        &self,
        ctx: &DriverContext,
        in_flight: Option<&SerialMessage>,
        incoming: &SerialMessage,
    ) -> Disposition {
        match incoming.payload_byte(0) {
            Some(0) => {
                error!("SendData was rejected by the stick");
                if let Some(original) = in_flight.filter(|m| m.message_class == MessageClass::SendData)
                {
                    handle_failed_send_data(ctx, original.clone());
                }
                Disposition::complete()
            }
            Some(_) => {
                debug!("SendData accepted by the stick, awaiting callback");
                Disposition::pending()
            }
            None => {
                warn!("empty SendData response");
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
        let (Some(callback_id), Some(status)) =
            (incoming.payload_byte(0), incoming.payload_byte(1))
        else {
            warn!("truncated SendData callback");
            return Disposition::pending();
        };

        let Some(original) = in_flight
            .filter(|m| m.message_class == MessageClass::SendData && m.callback_id == callback_id)
        else {
            warn!(
                "SendData callback id {} does not match the message in flight, ignoring",
                callback_id
            );
            return Disposition::pending();
        };

        match status {
            TRANSMIT_COMPLETE_OK => {
                debug!(
                    "NODE {:?}: transmission acknowledged, callback id = {}",
                    original.node_id, callback_id
                );
                Disposition::complete()
            }
            TRANSMIT_COMPLETE_NO_ACK
            | TRANSMIT_COMPLETE_FAIL
            | TRANSMIT_COMPLETE_NOT_IDLE
            | TRANSMIT_COMPLETE_NO_ROUTE => {
                warn!(
                    "NODE {:?}: transmission failed with status 0x{:02X}",
                    original.node_id, status
                );
                handle_failed_send_data(ctx, original.clone());
                Disposition::complete()
            }
            other => {
                warn!("unknown SendData callback status 0x{:02X}", other);
                Disposition::complete()
            }
        }
    }
}

/// Decide what to do with a SendData message that did not reach its node:
/// park it for the node's wake-up window, spend an attempt and requeue, or
/// give up and declare the node dead.
pub fn handle_failed_send_data(ctx: &DriverContext, mut message: SerialMessage) {
    let Some(node_id) = message.node_id else {
        warn!("discarding failed SendData with no target node");
        return;
    };
    let Some(node) = ctx.nodes.get(node_id) else {
        warn!("NODE {}: discarding failed SendData for unknown node", node_id);
        return;
    };

    if node.is_dead() {
        debug!("NODE {}: already dead, discarding failed SendData", node_id);
        return;
    }

    if !node.listening && !node.frequently_listening && message.priority != MessagePriority::Low {
        // A battery device that did not answer is most likely asleep again.
        ctx.nodes.queue_for_wakeup(node_id, message);
        return;
    }

    if message.attempts > 0 {
        message.attempts -= 1;
        error!(
            "NODE {}: transmission failed, requeueing ({} attempts left)",
            node_id, message.attempts
        );
        ctx.requeue(message);
    } else {
        warn!("NODE {}: retries exhausted, marking node dead", node_id);
        ctx.nodes.set_stage(node_id, NodeStage::Dead);
        ctx.emit(ControllerEvent::NodeStatus {
            node_id,
            state: NodeState::Dead,
        });
    }
}
