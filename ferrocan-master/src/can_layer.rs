//! Bottom layer: the CAN driver
//!

use std::sync::{Arc, Mutex};

use ferrocan_common::traits::{BusState, CanInterface, StateListener};

use crate::{
    layer::Layer,
    status::{LayerReport, LayerStatus},
};

/// Owns the bus for the stack: tracks the driver's reported state and gates every cycle on it
pub struct CanDriverLayer {
    name: String,
    interface: Arc<dyn CanInterface>,
    bus_state: Arc<Mutex<BusState>>,
    listener: Option<StateListener>,
}

impl core::fmt::Debug for CanDriverLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CanDriverLayer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CanDriverLayer {
    /// Create the layer for a driver; `device` names it in reports
    pub fn new(device: &str, interface: Arc<dyn CanInterface>) -> Self {
        Self {
            name: format!("can:{device}"),
            bus_state: Arc::new(Mutex::new(interface.state())),
            interface,
            listener: None,
        }
    }

    fn current_state(&self) -> BusState {
        *self.bus_state.lock().unwrap()
    }

    fn check(&self, status: &LayerStatus) {
        match self.current_state() {
            BusState::Active => {}
            BusState::ErrorPassive => status.warn("CAN controller is error-passive"),
            BusState::BusOff => status.error("CAN controller is bus-off"),
        }
    }
}

impl Layer for CanDriverLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, status: &LayerStatus) {
        self.check(status);
    }

    fn write(&mut self, status: &LayerStatus) {
        self.check(status);
    }

    fn pending(&mut self, _status: &LayerStatus) {}

    fn diag(&mut self, report: &mut LayerReport) {
        report.add("bus_state", format!("{:?}", self.current_state()));
    }

    fn init(&mut self, status: &LayerStatus) {
        let bus_state = self.bus_state.clone();
        let name = self.name.clone();
        *bus_state.lock().unwrap() = self.interface.state();
        self.listener = Some(self.interface.subscribe_state(Box::new(move |state| {
            log::info!("{name}: bus state {state:?}");
            *bus_state.lock().unwrap() = state;
        })));
        self.check(status);
    }

    fn shutdown(&mut self, _status: &LayerStatus) {
        self.listener.take();
    }

    fn halt(&mut self, _status: &LayerStatus) {
        // The driver keeps running; containment happens in the layers above
    }

    fn recover(&mut self, status: &LayerStatus) {
        *self.bus_state.lock().unwrap() = self.interface.state();
        self.check(status);
    }
}
