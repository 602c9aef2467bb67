//! Master heartbeat producer
//!

use std::sync::Arc;

use ferrocan_common::{
    messages::{Heartbeat, NmtState},
    traits::CanInterface,
    NodeId,
};

use crate::{
    layer::Layer,
    status::{LayerReport, LayerStatus},
};

/// Emits the master's own producer heartbeat every `interval` driver cycles
pub struct HeartbeatLayer {
    name: String,
    interface: Arc<dyn CanInterface>,
    node_id: NodeId,
    interval: u32,
    cycles: u32,
    running: bool,
}

impl core::fmt::Debug for HeartbeatLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeartbeatLayer")
            .field("node_id", &self.node_id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl HeartbeatLayer {
    /// Create a producer for the master's node ID
    pub fn new(interface: Arc<dyn CanInterface>, node_id: NodeId, interval: u32) -> Self {
        Self {
            name: "heartbeat".to_string(),
            interface,
            node_id,
            interval,
            cycles: 0,
            running: false,
        }
    }
}

impl Layer for HeartbeatLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, _status: &LayerStatus) {}

    fn write(&mut self, status: &LayerStatus) {
        if !self.running || self.interval == 0 {
            return;
        }
        self.cycles += 1;
        if self.cycles < self.interval {
            return;
        }
        self.cycles = 0;
        let heartbeat = Heartbeat {
            node: self.node_id.raw(),
            toggle: false,
            state: NmtState::Operational,
        };
        if !self.interface.send(&heartbeat.into()) {
            status.warn("heartbeat transmission failed");
        }
    }

    fn pending(&mut self, _status: &LayerStatus) {}

    fn diag(&mut self, _report: &mut LayerReport) {}

    fn init(&mut self, _status: &LayerStatus) {
        self.cycles = 0;
        self.running = true;
    }

    fn shutdown(&mut self, _status: &LayerStatus) {
        self.running = false;
    }

    fn halt(&mut self, _status: &LayerStatus) {
        self.running = false;
    }

    fn recover(&mut self, _status: &LayerStatus) {
        self.running = true;
    }
}
