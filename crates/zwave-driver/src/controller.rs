//! The controller façade.
//!
//! [`Controller`] assembles the link, queue, engine worker, receive loop and
//! watchdog, and exposes the public API: queries against the stick identity,
//! command enqueuers, `send_data` with callback-id assignment, the
//! dead-or-sleeping-node check and event subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, info, trace, warn};
use zwave_protocol::{
    requests, MessageClass, MessagePriority, MessageType, SerialMessage,
    TRANSMIT_OPTIONS_STANDARD,
};

use crate::config::DriverConfig;
use crate::context::{ControllerState, DriverContext};
use crate::engine::SendWorker;
use crate::error::{DriverError, Result};
use crate::events::{ControllerEvent, EventBus, EventListener, NodeState};
use crate::link::{LinkReader, LinkWriter, SerialLink};
use crate::processors::{MessageProcessor, ProcessorRegistry};
use crate::queue::SendQueue;
use crate::receive::ReceiveWorker;
use crate::registry::{Node, NodeRegistry};
use crate::signal::{CompletionLatch, SignalCause};
use crate::watchdog::Watchdog;

struct Workers {
    shutdown: Arc<AtomicBool>,
    send: JoinHandle<()>,
    recv: JoinHandle<()>,
}

pub(crate) struct ControllerInner {
    ctx: DriverContext,
    link: Arc<SerialLink>,
    latch: CompletionLatch,
    in_flight: Arc<Mutex<Option<SerialMessage>>>,
    processors: Arc<ProcessorRegistry>,
    port_name: Mutex<Option<String>>,
    workers: Mutex<Option<Workers>>,
    watchdog: Mutex<Option<Watchdog>>,
}

impl ControllerInner {
    fn new(config: DriverConfig) -> Self {
        let queue = Arc::new(SendQueue::with_capacity(config.initial_queue_capacity));
        let ctx = DriverContext {
            config,
            state: Arc::new(ControllerState::new()),
            nodes: Arc::new(NodeRegistry::new()),
            queue,
            events: Arc::new(EventBus::new()),
        };
        ControllerInner {
            ctx,
            link: Arc::new(SerialLink::new()),
            latch: CompletionLatch::new(),
            in_flight: Arc::new(Mutex::new(None)),
            processors: Arc::new(ProcessorRegistry::with_defaults()),
            port_name: Mutex::new(None),
            workers: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    fn spawn_workers(&self) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let send = SendWorker::new(
            self.ctx.clone(),
            Arc::clone(&self.link),
            self.latch.clone(),
            Arc::clone(&self.in_flight),
            Arc::clone(&shutdown),
        )
        .spawn();
        let recv = ReceiveWorker::new(
            self.ctx.clone(),
            Arc::clone(&self.link),
            self.latch.clone(),
            Arc::clone(&self.in_flight),
            Arc::clone(&self.processors),
            Arc::clone(&shutdown),
        )
        .spawn();
        *self.workers.lock().unwrap() = Some(Workers {
            shutdown,
            send,
            recv,
        });
        info!("serial port is initialized");
    }

    fn connect_port(&self, port_name: &str) -> Result<()> {
        let (reader, writer) = SerialLink::open_port(
            port_name,
            self.ctx.config.baud_rate,
            self.ctx.config.receive_timeout(),
        )?;
        self.link.attach(reader, writer);
        self.spawn_workers();
        Ok(())
    }

    /// Stop the worker threads, close the port and reset the latch.
    /// Any in-flight transaction is abandoned without retry.
    fn disconnect(&self) {
        let workers = self.workers.lock().unwrap().take();
        if let Some(workers) = workers {
            workers.shutdown.store(true, Ordering::SeqCst);
            // Nudge the engine out of a pending completion wait; the raise is
            // reset below once both threads are down.
            self.latch.raise(SignalCause::Completed);
            self.link.close();
            let _ = workers.send.join();
            let _ = workers.recv.join();
        } else {
            self.link.close();
        }
        self.latch.drain();
        info!("disconnected from serial port");
    }

    /// Watchdog duty: if either worker loop has exited, reconnect on the
    /// stored port name.
    pub(crate) fn check_liveness(&self) {
        let dead = {
            let workers = self.workers.lock().unwrap();
            match workers.as_ref() {
                Some(w) => w.send.is_finished() || w.recv.is_finished(),
                None => false,
            }
        };
        if !dead {
            return;
        }

        warn!("serial threads not alive, respawning");
        self.disconnect();
        let port_name = self.port_name.lock().unwrap().clone();
        match port_name {
            Some(name) => {
                if let Err(e) = self.connect_port(&name) {
                    error!("unable to restart serial threads: {}", e);
                }
            }
            None => warn!("no port name to reconnect to"),
        }
    }
}

/// The public driver handle.
///
/// Dropping the controller closes it; [`Controller::close`] may also be
/// called explicitly and is idempotent.
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    /// Open the named serial port and start the driver threads.
    pub fn open(port_name: &str, config: DriverConfig) -> Result<Self> {
        info!("starting Z-Wave controller");
        let inner = Arc::new(ControllerInner::new(config));
        inner.connect_port(port_name)?;
        *inner.port_name.lock().unwrap() = Some(port_name.to_string());
        let watchdog = Watchdog::spawn(Arc::clone(&inner), inner.ctx.config.watchdog_period());
        *inner.watchdog.lock().unwrap() = Some(watchdog);
        Ok(Controller { inner })
    }

    /// Start the driver on an already-open transport. Intended for tests and
    /// exotic transports; the watchdog cannot respawn a transport it has no
    /// port name for.
    pub fn open_with_transport(
        reader: LinkReader,
        writer: LinkWriter,
        config: DriverConfig,
    ) -> Self {
        info!("starting Z-Wave controller on an external transport");
        let inner = Arc::new(ControllerInner::new(config));
        inner.link.attach(reader, writer);
        inner.spawn_workers();
        let watchdog = Watchdog::spawn(Arc::clone(&inner), inner.ctx.config.watchdog_period());
        *inner.watchdog.lock().unwrap() = Some(watchdog);
        Controller { inner }
    }

    /// Stop all threads, close the port, and clear the queue, node table and
    /// listener list. Idempotent.
    pub fn close(&self) {
        if let Some(watchdog) = self.inner.watchdog.lock().unwrap().take() {
            watchdog.stop();
        }
        self.inner.disconnect();
        self.inner.ctx.queue.clear();
        self.inner.ctx.nodes.clear();
        self.inner.ctx.events.clear();
        info!("stopped Z-Wave controller");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Start the initialization chain. The remaining queries are enqueued by
    /// the response processors as their prerequisites arrive.
    pub fn initialize(&self) {
        self.enqueue(requests::get_version());
        self.enqueue(requests::memory_get_id());
        self.enqueue(requests::serial_api_get_capabilities());
    }

    /// Enqueue an arbitrary message for sending.
    pub fn enqueue(&self, message: SerialMessage) {
        self.inner.ctx.enqueue(message);
    }

    /// Query the protocol info of a node.
    pub fn identify_node(&self, node_id: u8) {
        self.enqueue(requests::identify_node(node_id));
    }

    /// Ask a node for its node information frame.
    pub fn request_node_info(&self, node_id: u8) {
        self.enqueue(requests::request_node_info(node_id));
    }

    /// Query the routing table entry of a node.
    pub fn request_node_routing_info(&self, node_id: u8) {
        self.enqueue(requests::get_routing_info(node_id));
    }

    /// Ask a node to rediscover its neighbors; routing info is refreshed
    /// automatically when the discovery finishes.
    pub fn request_node_neighbor_update(&self, node_id: u8) {
        self.enqueue(requests::request_node_neighbor_update(node_id));
    }

    /// Put the controller into inclusion mode.
    pub fn request_add_nodes_start(&self) {
        self.enqueue(requests::add_node_start());
    }

    /// Leave inclusion mode.
    pub fn request_add_nodes_stop(&self) {
        self.enqueue(requests::add_node_stop());
    }

    /// Remove a failed node from the network.
    pub fn request_remove_failed_node(&self, node_id: u8) {
        self.enqueue(requests::remove_failed_node(node_id));
    }

    /// Delete all return routes of a node. Do this before assigning new ones.
    pub fn request_delete_all_return_routes(&self, node_id: u8) {
        self.enqueue(requests::delete_return_route(node_id));
    }

    /// Assign a return route between two nodes.
    pub fn request_assign_return_route(&self, node_id: u8, destination_id: u8) {
        self.enqueue(requests::assign_return_route(node_id, destination_id));
    }

    /// Assign the SUC return route to a node.
    pub fn request_assign_suc_return_route(&self, node_id: u8) {
        self.enqueue(requests::assign_suc_return_route(node_id));
    }

    /// Reset the stick firmware without losing the network configuration.
    pub fn soft_reset(&self) {
        self.enqueue(requests::serial_api_soft_reset());
    }

    /// Send an application payload to a node.
    ///
    /// Validates the message, counts the send, defers to the node's wake-up
    /// queue when the target sleeps (in which case nothing is enqueued),
    /// stamps the standard transmit options and assigns the next callback id.
    pub fn send_data(&self, mut message: SerialMessage) -> Result<()> {
        if message.message_class != MessageClass::SendData {
            return Err(DriverError::InvalidMessage(
                "only SendData messages can be sent with send_data",
            ));
        }
        if message.message_type != MessageType::Request {
            return Err(DriverError::InvalidMessage("only request messages can be sent"));
        }
        let Some(node_id) = message.node_id else {
            return Err(DriverError::InvalidMessage("SendData requires a target node"));
        };

        let ctx = &self.inner.ctx;
        ctx.nodes.increment_send_count(node_id);

        if message.priority != MessagePriority::Low && ctx.nodes.is_asleep(node_id) {
            debug!("NODE {}: asleep, deferring message to wake-up queue", node_id);
            ctx.nodes.queue_for_wakeup(node_id, message);
            return Ok(());
        }

        message.transmit_options = TRANSMIT_OPTIONS_STANDARD;
        message.callback_id = ctx.state.next_callback_id();
        debug!("callback id = {}", message.callback_id);
        ctx.enqueue(message);
        Ok(())
    }

    /// Record a battery node's wake state. Waking a node re-submits its
    /// parked messages.
    pub fn set_node_awake(&self, node_id: u8, awake: bool) {
        let drained = self.inner.ctx.nodes.set_awake(node_id, awake);
        for message in drained {
            if message.message_class == MessageClass::SendData {
                // Re-enter send_data so the message gets fresh transmit
                // options and a fresh callback id.
                let _ = self.send_data(message);
            } else {
                self.enqueue(message);
            }
        }
    }

    /// Mark nodes that have stalled in an initialization stage as dead, and
    /// emit the one-time initialization-completed event when every node has
    /// reached a terminal or excluded state.
    ///
    /// Skipped entirely while a `Low`-priority ping is still queued: nothing
    /// can be concluded about sleeping nodes then.
    pub fn check_for_dead_or_sleeping_nodes(&self) {
        let ctx = &self.inner.ctx;
        if ctx.nodes.is_empty() {
            return;
        }
        if ctx.queue.has_low_priority() {
            return;
        }

        trace!("checking for dead or sleeping nodes");
        let report = ctx.nodes.sweep_stalled(ctx.config.stage_stall_timeout());

        if report.all_complete() && ctx.state.latch_initialization_complete() {
            ctx.emit(ControllerEvent::InitializationCompleted {
                own_node_id: ctx.state.own_node_id(),
            });
            // Announce the casualties after the headline, so subscribers see
            // a consistent initialization state first.
            for node_id in report.dead {
                debug!("NODE {}: dead node", node_id);
                ctx.emit(ControllerEvent::NodeStatus {
                    node_id,
                    state: NodeState::Dead,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Extension points
    // ------------------------------------------------------------------

    /// Subscribe to driver events.
    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.ctx.events.add(listener);
    }

    /// Unsubscribe from driver events.
    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) {
        self.inner.ctx.events.remove(listener);
    }

    /// Register (or replace) the processor for a message class.
    pub fn register_processor(&self, class: MessageClass, processor: Arc<dyn MessageProcessor>) {
        self.inner.processors.register(class, processor);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Home id of the network.
    pub fn home_id(&self) -> u32 {
        self.inner.ctx.state.home_id()
    }

    /// The controller's own node id.
    pub fn own_node_id(&self) -> u8 {
        self.inner.ctx.state.own_node_id()
    }

    /// Library version string of the stick.
    pub fn zwave_version(&self) -> String {
        self.inner.ctx.state.zwave_version()
    }

    /// Serial API version of the stick.
    pub fn serial_api_version(&self) -> String {
        self.inner.ctx.state.serial_api_version()
    }

    /// Library type byte of the stick.
    pub fn library_type(&self) -> u8 {
        self.inner.ctx.state.library_type()
    }

    /// Manufacturer id of the stick.
    pub fn manufacturer_id(&self) -> u16 {
        self.inner.ctx.state.manufacturer_id()
    }

    /// Device type of the stick.
    pub fn device_type(&self) -> u16 {
        self.inner.ctx.state.device_type()
    }

    /// Device id of the stick.
    pub fn device_id(&self) -> u16 {
        self.inner.ctx.state.device_id()
    }

    /// Number of messages waiting on the send queue.
    pub fn send_queue_length(&self) -> usize {
        self.inner.ctx.queue.len()
    }

    /// Whether the link is up and initialization has completed.
    pub fn is_connected(&self) -> bool {
        self.inner.ctx.state.is_link_up() && self.inner.ctx.state.is_initialization_complete()
    }

    /// A snapshot of one node.
    pub fn node(&self, node_id: u8) -> Option<Node> {
        self.inner.ctx.nodes.get(node_id)
    }

    /// All known node ids, ascending.
    pub fn node_ids(&self) -> Vec<u8> {
        self.inner.ctx.nodes.node_ids()
    }

    /// The shared node registry.
    pub fn nodes(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.inner.ctx.nodes)
    }

    /// Start-of-frame bytes received.
    pub fn sof_count(&self) -> u32 {
        self.inner.ctx.state.counters.sof.load(Ordering::Relaxed)
    }

    /// ACKs received.
    pub fn ack_count(&self) -> u32 {
        self.inner.ctx.state.counters.ack.load(Ordering::Relaxed)
    }

    /// NAKs received.
    pub fn nak_count(&self) -> u32 {
        self.inner.ctx.state.counters.nak.load(Ordering::Relaxed)
    }

    /// CANs received.
    pub fn can_count(&self) -> u32 {
        self.inner.ctx.state.counters.can.load(Ordering::Relaxed)
    }

    /// Out-of-frame bytes received.
    pub fn oof_count(&self) -> u32 {
        self.inner.ctx.state.counters.oof.load(Ordering::Relaxed)
    }

    /// Transactions that timed out.
    pub fn timeout_count(&self) -> u32 {
        self.inner.ctx.state.counters.timeouts.load(Ordering::Relaxed)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}
