//! Per-node state and the node registry.
//!
//! Nodes are created from the `SerialApiGetInitData` response and destroyed
//! only when the controller closes. Each node carries its initialization
//! stage (stamped with the time it was entered, which feeds the dead-node
//! policy) and a wake-up queue for traffic deferred while a battery node
//! sleeps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use zwave_protocol::{SerialMessage, COMMAND_CLASS_WAKE_UP};

/// Initialization stage of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStage {
    /// Known to exist, nothing queried yet.
    EmptyNode,
    /// Protocol info query outstanding.
    ProtoInfo,
    /// Node information frame query outstanding.
    NodeBuildInfo,
    /// Routing info query outstanding.
    Details,
    /// Fully initialized.
    Done,
    /// Given up on.
    Dead,
}

impl NodeStage {
    /// Whether this stage ends the initialization ladder.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStage::Done | NodeStage::Dead)
    }
}

/// State of a single Z-Wave node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node id, 1..=232.
    pub node_id: u8,
    /// Home id of the network the node belongs to.
    pub home_id: u32,
    /// Whether the node is always listening.
    pub listening: bool,
    /// Whether the node wakes on beam.
    pub frequently_listening: bool,
    /// Whether a battery node is currently awake.
    pub awake: bool,
    /// Current initialization stage.
    pub stage: NodeStage,
    /// When the current stage was entered.
    pub stage_entered_at: Instant,
    /// Packets sent to this node.
    pub send_count: u32,
    /// Basic device class byte.
    pub basic_class: u8,
    /// Generic device class byte.
    pub generic_class: u8,
    /// Specific device class byte.
    pub specific_class: u8,
    /// Manufacturer id, pre-populated for the controller's own node.
    pub manufacturer_id: u16,
    /// Device type, pre-populated for the controller's own node.
    pub device_type: u16,
    /// Device id, pre-populated for the controller's own node.
    pub device_id: u16,
    /// Command classes the node advertised.
    pub command_classes: HashSet<u8>,
    /// Node ids this node can hear.
    pub neighbors: Vec<u8>,
    /// Messages parked until the node wakes up.
    pub wake_up_queue: VecDeque<SerialMessage>,
}

impl Node {
    /// Create a fresh node in [`NodeStage::EmptyNode`].
    pub fn new(home_id: u32, node_id: u8) -> Self {
        Node {
            node_id,
            home_id,
            listening: false,
            frequently_listening: false,
            awake: false,
            stage: NodeStage::EmptyNode,
            stage_entered_at: Instant::now(),
            send_count: 0,
            basic_class: 0,
            generic_class: 0,
            specific_class: 0,
            manufacturer_id: 0,
            device_type: 0,
            device_id: 0,
            command_classes: HashSet::new(),
            neighbors: Vec::new(),
            wake_up_queue: VecDeque::new(),
        }
    }

    /// Enter `stage`, stamping the transition time.
    pub fn set_stage(&mut self, stage: NodeStage) {
        self.stage = stage;
        self.stage_entered_at = Instant::now();
    }

    /// Whether the node advertised the given command class.
    pub fn supports_command_class(&self, command_class: u8) -> bool {
        self.command_classes.contains(&command_class)
    }

    /// Whether the node is dead.
    pub fn is_dead(&self) -> bool {
        self.stage == NodeStage::Dead
    }

    /// A battery node that has to be reached through its wake-up window:
    /// neither listening nor frequently listening, wake-up capable, and not
    /// currently awake.
    pub fn is_asleep(&self) -> bool {
        !self.listening
            && !self.frequently_listening
            && self.supports_command_class(COMMAND_CLASS_WAKE_UP)
            && !self.awake
    }
}

/// Result of a dead-or-sleeping sweep over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Nodes inspected.
    pub total: usize,
    /// Nodes that count as complete (terminal stage or excluded from the
    /// check by their listening mode).
    pub complete: usize,
    /// Every node currently in [`NodeStage::Dead`], post-sweep.
    pub dead: Vec<u8>,
}

impl SweepReport {
    /// Whether every inspected node counts as complete.
    pub fn all_complete(&self) -> bool {
        self.total > 0 && self.complete == self.total
    }
}

/// Registry of all nodes in the network, shared across driver threads.
pub struct NodeRegistry {
    nodes: Mutex<HashMap<u8, Node>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        NodeRegistry {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a node. An existing node with the same id is kept untouched:
    /// nodes live from their first discovery to controller close.
    pub fn insert(&self, node: Node) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.entry(node.node_id).or_insert(node);
    }

    /// Remove a node (failed-node removal).
    pub fn remove(&self, node_id: u8) -> bool {
        self.nodes.lock().unwrap().remove(&node_id).is_some()
    }

    /// Whether a node with this id exists.
    pub fn contains(&self, node_id: u8) -> bool {
        self.nodes.lock().unwrap().contains_key(&node_id)
    }

    /// A snapshot of the node with this id.
    pub fn get(&self, node_id: u8) -> Option<Node> {
        self.nodes.lock().unwrap().get(&node_id).cloned()
    }

    /// All node ids, ascending.
    pub fn node_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.nodes.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every node.
    pub fn clear(&self) {
        self.nodes.lock().unwrap().clear();
    }

    /// Run `f` against the node with this id.
    pub fn with_node<R>(&self, node_id: u8, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.nodes.lock().unwrap().get_mut(&node_id).map(f)
    }

    /// Enter `stage` on the node. Returns whether the node exists and the
    /// stage actually changed.
    pub fn set_stage(&self, node_id: u8, stage: NodeStage) -> bool {
        self.with_node(node_id, |node| {
            if node.stage == stage {
                return false;
            }
            debug!("NODE {}: stage {:?} -> {:?}", node_id, node.stage, stage);
            node.set_stage(stage);
            true
        })
        .unwrap_or(false)
    }

    /// Whether the node must be reached through its wake-up window.
    pub fn is_asleep(&self, node_id: u8) -> bool {
        self.with_node(node_id, |node| node.is_asleep())
            .unwrap_or(false)
    }

    /// Park a message on the node's wake-up queue.
    pub fn queue_for_wakeup(&self, node_id: u8, message: SerialMessage) {
        let parked = self.with_node(node_id, |node| {
            node.wake_up_queue.push_back(message);
            node.wake_up_queue.len()
        });
        match parked {
            Some(depth) => debug!("NODE {}: message parked for wake-up, queue depth = {}", node_id, depth),
            None => warn!("NODE {}: dropping message for unknown sleeping node", node_id),
        }
    }

    /// Depth of the node's wake-up queue.
    pub fn wake_up_queue_len(&self, node_id: u8) -> usize {
        self.with_node(node_id, |node| node.wake_up_queue.len())
            .unwrap_or(0)
    }

    /// Flip the awake flag. Waking a node drains its wake-up queue; the
    /// caller re-submits the drained messages on the main queue.
    pub fn set_awake(&self, node_id: u8, awake: bool) -> Vec<SerialMessage> {
        self.with_node(node_id, |node| {
            node.awake = awake;
            if awake {
                node.wake_up_queue.drain(..).collect()
            } else {
                Vec::new()
            }
        })
        .unwrap_or_default()
    }

    /// Count a packet sent to the node.
    pub fn increment_send_count(&self, node_id: u8) {
        self.with_node(node_id, |node| node.send_count += 1);
    }

    /// Inspect every node for the dead-or-sleeping policy: terminal and
    /// non-listening nodes count as complete; a node stalled in one stage
    /// longer than `stall_threshold` is marked dead (and counts as complete).
    pub fn sweep_stalled(&self, stall_threshold: Duration) -> SweepReport {
        let mut nodes = self.nodes.lock().unwrap();
        let mut report = SweepReport {
            total: nodes.len(),
            ..SweepReport::default()
        };
        let now = Instant::now();
        for (node_id, node) in nodes.iter_mut() {
            if node.stage == NodeStage::EmptyNode {
                continue;
            }
            if node.stage.is_terminal() || (!node.listening && !node.frequently_listening) {
                report.complete += 1;
                continue;
            }
            if now.duration_since(node.stage_entered_at) < stall_threshold {
                continue;
            }
            warn!("NODE {}: may be dead, setting stage to DEAD", node_id);
            node.set_stage(NodeStage::Dead);
            report.complete += 1;
        }
        report.dead = nodes
            .values()
            .filter(|n| n.is_dead())
            .map(|n| n.node_id)
            .collect();
        report.dead.sort_unstable();
        report
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zwave_protocol::{MessageClass, MessagePriority};

    fn listening_node(node_id: u8) -> Node {
        let mut node = Node::new(0xDEAD_BEEF, node_id);
        node.listening = true;
        node
    }

    fn sleeping_node(node_id: u8) -> Node {
        let mut node = Node::new(0xDEAD_BEEF, node_id);
        node.command_classes.insert(COMMAND_CLASS_WAKE_UP);
        node
    }

    #[test]
    fn test_insert_keeps_existing() {
        let registry = NodeRegistry::new();
        let mut node = listening_node(4);
        node.send_count = 9;
        registry.insert(node);
        registry.insert(listening_node(4));
        assert_eq!(registry.get(4).unwrap().send_count, 9);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_stage_stamps_and_reports_change() {
        let registry = NodeRegistry::new();
        registry.insert(listening_node(2));
        assert!(registry.set_stage(2, NodeStage::ProtoInfo));
        assert!(!registry.set_stage(2, NodeStage::ProtoInfo));
        assert!(!registry.set_stage(99, NodeStage::ProtoInfo));
        assert_eq!(registry.get(2).unwrap().stage, NodeStage::ProtoInfo);
    }

    #[test]
    fn test_asleep_requires_wakeup_class() {
        let registry = NodeRegistry::new();
        registry.insert(sleeping_node(7));
        let mut bare = Node::new(0xDEAD_BEEF, 8);
        bare.listening = false;
        registry.insert(bare);

        assert!(registry.is_asleep(7));
        // Without the wake-up class there is no queue to defer into.
        assert!(!registry.is_asleep(8));

        registry.set_awake(7, true);
        assert!(!registry.is_asleep(7));
    }

    #[test]
    fn test_wakeup_queue_drains_on_wake() {
        let registry = NodeRegistry::new();
        registry.insert(sleeping_node(7));
        let msg = SerialMessage::request(MessageClass::SendData, MessagePriority::Get)
            .with_node(7)
            .with_payload(vec![7, 0]);
        registry.queue_for_wakeup(7, msg.clone());
        assert_eq!(registry.wake_up_queue_len(7), 1);

        let drained = registry.set_awake(7, true);
        assert_eq!(drained, vec![msg]);
        assert_eq!(registry.wake_up_queue_len(7), 0);
    }

    #[test]
    fn test_sweep_marks_stalled_listening_node_dead() {
        let registry = NodeRegistry::new();
        registry.insert(listening_node(9));
        registry.set_stage(9, NodeStage::NodeBuildInfo);
        std::thread::sleep(Duration::from_millis(30));

        let report = registry.sweep_stalled(Duration::from_millis(10));
        assert_eq!(report.total, 1);
        assert_eq!(report.complete, 1);
        assert_eq!(report.dead, vec![9]);
        assert!(report.all_complete());
        assert!(registry.get(9).unwrap().is_dead());
    }

    #[test]
    fn test_sweep_skips_non_listening_and_fresh_nodes() {
        let registry = NodeRegistry::new();
        registry.insert(sleeping_node(7));
        registry.set_stage(7, NodeStage::NodeBuildInfo);
        registry.insert(listening_node(9));
        registry.set_stage(9, NodeStage::NodeBuildInfo);

        // Node 7 is excluded by its listening mode, node 9 has not stalled.
        let report = registry.sweep_stalled(Duration::from_secs(60));
        assert_eq!(report.total, 2);
        assert_eq!(report.complete, 1);
        assert!(report.dead.is_empty());
        assert!(!report.all_complete());
    }

    #[test]
    fn test_sweep_ignores_empty_nodes() {
        let registry = NodeRegistry::new();
        registry.insert(listening_node(3));
        let report = registry.sweep_stalled(Duration::from_millis(0));
        assert_eq!(report.total, 1);
        assert_eq!(report.complete, 0);
        assert!(!report.all_complete());
    }
}
