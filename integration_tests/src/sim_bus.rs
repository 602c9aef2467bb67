//! A simulated CAN bus for driving the master in tests
//!
//! Frames "received" from the bus are injected by the test and fan out through the shared
//! dispatcher exactly like the socketcan receive thread would deliver them. Frames the master
//! sends land in a channel the test drains and asserts on.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use ferrocan_common::{
    dispatch::FrameDispatcher,
    messages::{CanFrame, CanId},
    traits::{BusState, CanInterface, FrameCallback, FrameListener, StateCallback, StateListener},
};

/// A loopback-free simulated bus
pub struct SimBus {
    dispatcher: FrameDispatcher,
    sent_tx: Sender<CanFrame>,
    sent_rx: Receiver<CanFrame>,
    state: Mutex<BusState>,
    fail_send: AtomicBool,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// Create an idle bus in the error-active state
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = unbounded();
        Self {
            dispatcher: FrameDispatcher::new(),
            sent_tx,
            sent_rx,
            state: Mutex::new(BusState::Active),
            fail_send: AtomicBool::new(false),
        }
    }

    /// Deliver a frame to the master as if it arrived from the bus
    pub fn inject(&self, frame: CanFrame) {
        self.dispatcher.dispatch(&frame);
    }

    /// Change the simulated controller state and notify listeners
    pub fn set_state(&self, state: BusState) {
        *self.state.lock().unwrap() = state;
        self.dispatcher.dispatch_state(state);
    }

    /// Make every subsequent send fail
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::Relaxed);
    }

    /// Drain every frame the master has sent so far
    pub fn take_sent(&self) -> Vec<CanFrame> {
        self.sent_rx.try_iter().collect()
    }

    /// Drain sent frames carrying `id`
    pub fn take_sent_with_id(&self, id: CanId) -> Vec<CanFrame> {
        self.take_sent()
            .into_iter()
            .filter(|f| f.id() == id)
            .collect()
    }
}

impl CanInterface for SimBus {
    fn send(&self, frame: &CanFrame) -> bool {
        if self.fail_send.load(Ordering::Relaxed) {
            return false;
        }
        self.sent_tx.send(*frame).is_ok()
    }

    fn subscribe(&self, id: CanId, callback: FrameCallback) -> FrameListener {
        self.dispatcher.subscribe(id, callback)
    }

    fn subscribe_state(&self, callback: StateCallback) -> StateListener {
        self.dispatcher.subscribe_state(callback)
    }

    fn state(&self) -> BusState {
        *self.state.lock().unwrap()
    }
}
