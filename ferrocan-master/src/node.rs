//! Per-node layer
//!
//! One layer per slave node, owning the node's live object storage and PDO mapper. The NMT
//! state machine is deliberately thin: the master commands Start/Stop/PreOperational around the
//! lifecycle and trusts the heartbeat/EMCY layers to surface node-side trouble.

use std::sync::Arc;

use ferrocan_common::{
    messages::{NmtCommand, NmtCommandCmd},
    traits::CanInterface,
    NodeId,
};

use crate::{
    layer::Layer,
    pdo::PdoMapper,
    status::{LayerReport, LayerStatus},
    storage::ObjectStorage,
};

/// Commanded NMT state of a node, from the master's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not brought up
    Unknown,
    /// Commanded into Operational
    Operational,
    /// Commanded into Stopped
    Stopped,
    /// Commanded into Pre-Operational
    PreOperational,
}

impl core::fmt::Display for NodeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            NodeState::Unknown => "unknown",
            NodeState::Operational => "operational",
            NodeState::Stopped => "stopped",
            NodeState::PreOperational => "pre-operational",
        };
        write!(f, "{name}")
    }
}

/// Drives one slave node: storage defaults, PDO set, NMT commands
pub struct NodeLayer {
    name: String,
    node_id: NodeId,
    interface: Arc<dyn CanInterface>,
    storage: Arc<ObjectStorage>,
    mapper: PdoMapper,
    state: NodeState,
}

impl core::fmt::Debug for NodeLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeLayer")
            .field("node_id", &self.node_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl NodeLayer {
    /// Create the layer for one node
    pub fn new(interface: Arc<dyn CanInterface>, storage: Arc<ObjectStorage>) -> Self {
        let node_id = storage.node_id();
        Self {
            name: format!("node:{node_id}"),
            node_id,
            mapper: PdoMapper::new(interface.clone()),
            interface,
            storage,
            state: NodeState::Unknown,
        }
    }

    /// The node's ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The node's live storage
    pub fn storage(&self) -> &Arc<ObjectStorage> {
        &self.storage
    }

    /// The node's PDO set
    pub fn mapper(&self) -> &PdoMapper {
        &self.mapper
    }

    /// The commanded NMT state
    pub fn state(&self) -> NodeState {
        self.state
    }

    fn send_nmt(&self, cmd: NmtCommandCmd) -> bool {
        let command = NmtCommand {
            cmd,
            node: self.node_id.raw(),
        };
        self.interface.send(&command.into())
    }
}

impl Layer for NodeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, status: &LayerStatus) {
        self.mapper.read(status);
    }

    fn write(&mut self, status: &LayerStatus) {
        self.mapper.write(status);
    }

    fn pending(&mut self, _status: &LayerStatus) {}

    fn diag(&mut self, report: &mut LayerReport) {
        report.add(&format!("node{}_state", self.node_id), self.state);
        report.add(
            &format!("node{}_pdos", self.node_id),
            format!(
                "{} rx / {} tx",
                self.mapper.rpdos().len(),
                self.mapper.tpdos().len()
            ),
        );
        let info = self.storage.dict().device_info;
        if info.vendor_id != 0 || info.product_code != 0 {
            report.add(
                &format!("node{}_device", self.node_id),
                format!("{:08X}/{:08X}", info.vendor_id, info.product_code),
            );
        }
    }

    fn init(&mut self, status: &LayerStatus) {
        if let Err(e) = self.storage.init_all() {
            status.error(&format!("node {}: {e}", self.node_id));
            return;
        }
        self.mapper.init(&self.storage);
        if !self.send_nmt(NmtCommandCmd::Start) {
            status.error(&format!("node {}: NMT start failed", self.node_id));
            return;
        }
        self.state = NodeState::Operational;
        log::info!("node {}: started", self.node_id);
    }

    fn shutdown(&mut self, _status: &LayerStatus) {
        if self.state != NodeState::Unknown {
            // Best effort; the node may already be gone
            self.send_nmt(NmtCommandCmd::EnterPreOp);
        }
        self.mapper.clear();
        self.storage.clear_mappings();
        self.state = NodeState::Unknown;
    }

    fn halt(&mut self, _status: &LayerStatus) {
        if self.state == NodeState::Operational {
            if !self.send_nmt(NmtCommandCmd::Stop) {
                log::warn!("node {}: NMT stop failed", self.node_id);
            }
            self.state = NodeState::Stopped;
        }
    }

    fn recover(&mut self, status: &LayerStatus) {
        // Buffers and listeners persist; only the node has to be restarted
        if !self.send_nmt(NmtCommandCmd::Start) {
            status.error(&format!("node {}: NMT start failed", self.node_id));
            return;
        }
        self.state = NodeState::Operational;
    }
}
