//! SYNC producer layer
//!

use std::sync::Arc;

use ferrocan_common::{messages::SyncObject, traits::CanInterface};

use crate::{
    layer::Layer,
    status::{LayerReport, LayerStatus},
};

/// Emits the bus-wide SYNC frame pacing synchronous PDO exchange
///
/// The interval is counted in driver cycles; the driver thread's cycle period defines the SYNC
/// period. An overflow of 0 sends the counterless one-byte-shorter form.
pub struct SyncLayer {
    name: String,
    interface: Arc<dyn CanInterface>,
    interval: u32,
    overflow: u8,
    cycles: u32,
    counter: u8,
    sent: u64,
    running: bool,
}

impl core::fmt::Debug for SyncLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncLayer")
            .field("interval", &self.interval)
            .field("overflow", &self.overflow)
            .finish_non_exhaustive()
    }
}

impl SyncLayer {
    /// Create a producer sending every `interval` cycles with counter overflow `overflow`
    pub fn new(interface: Arc<dyn CanInterface>, interval: u32, overflow: u8) -> Self {
        Self {
            name: "sync".to_string(),
            interface,
            interval,
            overflow,
            cycles: 0,
            counter: 0,
            sent: 0,
            running: false,
        }
    }

    fn next_count(&mut self) -> Option<u8> {
        if self.overflow == 0 {
            return None;
        }
        self.counter = if self.counter >= self.overflow {
            1
        } else {
            self.counter + 1
        };
        Some(self.counter)
    }
}

impl Layer for SyncLayer {
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
        let count = self.next_count();
        if self.interface.send(&SyncObject { count }.into()) {
            self.sent += 1;
        } else {
            status.error("SYNC transmission failed");
        }
    }

    fn pending(&mut self, _status: &LayerStatus) {}

    fn diag(&mut self, report: &mut LayerReport) {
        report.add("syncs_sent", self.sent);
    }

    fn init(&mut self, _status: &LayerStatus) {
        self.cycles = 0;
        self.counter = 0;
        self.running = true;
    }

    fn shutdown(&mut self, _status: &LayerStatus) {
        self.running = false;
    }

    fn halt(&mut self, _status: &LayerStatus) {
        self.running = false;
    }

    fn recover(&mut self, _status: &LayerStatus) {
        self.cycles = 0;
        self.running = true;
    }
}
