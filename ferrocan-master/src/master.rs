//! The supervisory facade
//!
//! Assembles the full layer stack in fieldbus order and exposes the four idempotent commands a
//! supervising application drives it with, plus the per-cycle entry point for the driver thread.

use std::{collections::HashMap, sync::Arc};

use ferrocan_common::{traits::CanInterface, NodeId};
use snafu::Snafu;

use crate::{
    can_layer::CanDriverLayer,
    config::{ConfigError, MasterConfig},
    dictionary::ObjectDict,
    emcy::EmcyLayer,
    heartbeat::HeartbeatLayer,
    layer::{Layer, LayerGroup, LayerGroupNoDiag, LayerStack},
    node::NodeLayer,
    status::{LayerReport, LayerStatus, Severity},
    storage::{ObjectStorage, StorageError, StringReader},
    sync_layer::SyncLayer,
};

/// A supervisory command failed; carries the stack's aggregated reason trail
#[derive(Debug, Snafu)]
#[snafu(display("{command} failed: {reason}"))]
pub struct CommandError {
    /// The command that failed
    pub command: &'static str,
    /// The joined reasons from every escalating layer
    pub reason: String,
}

/// Diagnostic logger fed from storage string readers
///
/// Renders registered dictionary entries into a [LayerReport], tolerating entries that cannot
/// currently be read.
#[derive(Default)]
pub struct DiagnosticLogger {
    entries: Vec<(String, StringReader)>,
}

impl core::fmt::Debug for DiagnosticLogger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiagnosticLogger")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl DiagnosticLogger {
    /// Create an empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one storage entry; its description names the report row
    pub fn add_entry(
        &mut self,
        storage: &ObjectStorage,
        index: u16,
        sub: u8,
        cached: bool,
    ) -> Result<(), StorageError> {
        let name = storage
            .dict()
            .get(index, sub)
            .filter(|e| !e.desc.is_empty())
            .map(|e| e.desc.clone())
            .unwrap_or_else(|| format!("{index:04X}sub{sub}"));
        let reader = storage.string_reader(index, sub, cached)?;
        self.entries.push((name, reader));
        Ok(())
    }

    /// Render all registered entries into `report`
    pub fn log(&self, report: &mut LayerReport) {
        for (name, reader) in &self.entries {
            match reader() {
                Ok(value) => report.add(name, value),
                Err(_) => report.add(name, "<ERROR>"),
            }
        }
    }
}

/// The CANopen master: the assembled stack plus its per-node storages
pub struct Master {
    stack: LayerStack,
    storages: HashMap<u8, Arc<ObjectStorage>>,
    logger: DiagnosticLogger,
}

impl core::fmt::Debug for Master {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Master")
            .field("layers", &self.stack.len())
            .field("nodes", &self.storages.len())
            .finish()
    }
}

impl Master {
    /// Assemble the stack from a configuration
    ///
    /// Stack order, leaves first: CAN driver, SYNC producer, EMCY consumers, node layers,
    /// heartbeat producer.
    pub fn from_config(
        config: &MasterConfig,
        interface: Arc<dyn CanInterface>,
    ) -> Result<Self, ConfigError> {
        let mut stack = LayerStack::new("master");
        stack.add(CanDriverLayer::new(&config.bus.device, interface.clone()));

        if config.bus.sync_interval > 0 {
            stack.add(SyncLayer::new(
                interface.clone(),
                config.bus.sync_interval,
                config.bus.sync_overflow,
            ));
        }

        let mut emcy_group: LayerGroup<EmcyLayer> = LayerGroup::new("emcy");
        let mut node_group: LayerGroupNoDiag<NodeLayer> = LayerGroupNoDiag::new("nodes");
        let mut storages = HashMap::new();
        for node in &config.nodes {
            let node_id = node.node_id()?;
            let dict: Arc<ObjectDict> = Arc::new(node.build_dict()?);
            let storage = Arc::new(ObjectStorage::new(dict, node_id));
            storages.insert(node_id.raw(), storage.clone());
            emcy_group.add(EmcyLayer::new(interface.clone(), node_id));
            node_group.add(NodeLayer::new(interface.clone(), storage));
        }
        stack.add(emcy_group);
        stack.add(node_group);

        if config.bus.heartbeat_interval > 0 {
            let master_id = NodeId::new(config.bus.master_node_id)
                .map_err(|source| ConfigError::InvalidNodeId {
                    id: config.bus.master_node_id,
                    source,
                })?;
            stack.add(HeartbeatLayer::new(
                interface.clone(),
                master_id,
                config.bus.heartbeat_interval,
            ));
        }

        Ok(Self {
            stack,
            storages,
            logger: DiagnosticLogger::new(),
        })
    }

    fn command(
        &mut self,
        name: &'static str,
        op: fn(&mut LayerStack, &LayerStatus),
    ) -> Result<(), CommandError> {
        let status = LayerStatus::new();
        op(&mut self.stack, &status);
        if status.bounded(Severity::Warn) {
            if status.severity() == Severity::Warn {
                log::warn!("{name}: {}", status.reason());
            } else {
                log::info!("{name}: ok");
            }
            Ok(())
        } else {
            let reason = status.reason();
            log::error!("{name} failed: {reason}");
            Err(CommandError {
                command: name,
                reason,
            })
        }
    }

    /// Bring the stack up
    pub fn init(&mut self) -> Result<(), CommandError> {
        self.command("init", |stack, status| stack.init(status))
    }

    /// Re-establish operation after a fault, without a full teardown
    pub fn recover(&mut self) -> Result<(), CommandError> {
        self.command("recover", |stack, status| stack.recover(status))
    }

    /// Stop side effects everywhere; never fails
    pub fn halt(&mut self) -> Result<(), CommandError> {
        self.command("halt", |stack, status| stack.halt(status))
    }

    /// Tear the stack down
    pub fn shutdown(&mut self) -> Result<(), CommandError> {
        self.command("shutdown", |stack, status| stack.shutdown(status))
    }

    /// One driver-thread cycle: read inputs, write outputs, run frontier work
    pub fn run_cycle(&mut self) -> LayerStatus {
        let status = LayerStatus::new();
        self.stack.read(&status);
        self.stack.write(&status);
        self.stack.pending(&status);
        status
    }

    /// Collect a diagnostic report from the live prefix and the registered storage entries
    pub fn diag(&mut self) -> LayerReport {
        let mut report = LayerReport::new();
        self.stack.diag(&mut report);
        self.logger.log(&mut report);
        report
    }

    /// Register a storage entry with the diagnostic logger
    pub fn add_diag_entry(
        &mut self,
        node_id: NodeId,
        index: u16,
        sub: u8,
        cached: bool,
    ) -> Result<(), StorageError> {
        let storage = self
            .storages
            .get(&node_id.raw())
            .ok_or(StorageError::NoSuchEntry {
                key: crate::dictionary::ObjectKey::new(index, sub),
            })?;
        self.logger.add_entry(storage, index, sub, cached)
    }

    /// The live storage of one node
    pub fn storage(&self, node_id: NodeId) -> Option<&Arc<ObjectStorage>> {
        self.storages.get(&node_id.raw())
    }

    /// The underlying layer stack
    pub fn stack(&mut self) -> &mut LayerStack {
        &mut self.stack
    }
}
