//! Per-node emergency consumers
//!

use std::sync::{Arc, Mutex};

use ferrocan_common::{
    constants::EMCY_BASE,
    messages::{CanId, EmcyMessage},
    traits::{CanInterface, FrameListener},
    NodeId,
};

use crate::{
    layer::Layer,
    status::{LayerReport, LayerStatus},
};

#[derive(Debug, Default)]
struct EmcyInbox {
    /// Most recent emergency, cleared by an error-reset message
    active: Option<EmcyMessage>,
    /// Emergencies received since init, resets excluded
    total: u64,
    /// An emergency arrived since the last read cycle
    unread: bool,
}

/// Listens for one node's emergency frames and escalates them into the read cycle
pub struct EmcyLayer {
    name: String,
    node_id: NodeId,
    interface: Arc<dyn CanInterface>,
    inbox: Arc<Mutex<EmcyInbox>>,
    listener: Option<FrameListener>,
}

impl core::fmt::Debug for EmcyLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmcyLayer")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl EmcyLayer {
    /// Create the consumer for one node
    pub fn new(interface: Arc<dyn CanInterface>, node_id: NodeId) -> Self {
        Self {
            name: format!("emcy:{node_id}"),
            node_id,
            interface,
            inbox: Arc::new(Mutex::new(EmcyInbox::default())),
            listener: None,
        }
    }

    /// The most recent emergency, if one is active
    pub fn active(&self) -> Option<EmcyMessage> {
        self.inbox.lock().unwrap().active
    }
}

impl Layer for EmcyLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, status: &LayerStatus) {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.unread {
            inbox.unread = false;
            if let Some(emcy) = &inbox.active {
                status.warn(&format!(
                    "EMCY {:04X} (register {:02X}) from node {}",
                    emcy.code, emcy.register, self.node_id
                ));
            }
        }
    }

    fn write(&mut self, _status: &LayerStatus) {}

    fn pending(&mut self, _status: &LayerStatus) {}

    fn diag(&mut self, report: &mut LayerReport) {
        let inbox = self.inbox.lock().unwrap();
        let state = match &inbox.active {
            Some(emcy) => format!("{:04X}", emcy.code),
            None => "none".to_string(),
        };
        report.add(&format!("node{}_emcy", self.node_id), state);
        report.add(&format!("node{}_emcy_count", self.node_id), inbox.total);
    }

    fn init(&mut self, _status: &LayerStatus) {
        *self.inbox.lock().unwrap() = EmcyInbox::default();
        let inbox = self.inbox.clone();
        let node_id = self.node_id;
        let cob_id = CanId::Std(EMCY_BASE | node_id.raw() as u16);
        self.listener = Some(self.interface.subscribe(
            cob_id,
            Box::new(move |frame| {
                let emcy = match EmcyMessage::try_from(*frame) {
                    Ok(emcy) => emcy,
                    Err(e) => {
                        log::warn!("node {node_id}: malformed EMCY frame: {e}");
                        return;
                    }
                };
                let mut inbox = inbox.lock().unwrap();
                if emcy.is_reset() {
                    log::info!("node {node_id}: EMCY error reset");
                    inbox.active = None;
                } else {
                    log::warn!("node {node_id}: EMCY {:04X}", emcy.code);
                    inbox.active = Some(emcy);
                    inbox.total += 1;
                    inbox.unread = true;
                }
            }),
        ));
    }

    fn shutdown(&mut self, _status: &LayerStatus) {
        self.listener.take();
    }

    fn halt(&mut self, _status: &LayerStatus) {
        // Listening is passive; nothing to stop
    }

    fn recover(&mut self, _status: &LayerStatus) {
        self.inbox.lock().unwrap().unread = false;
    }
}
