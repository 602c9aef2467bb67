//! The CAN driver abstraction consumed by the master
//!

use crate::messages::{CanFrame, CanId};

/// Health of the CAN controller as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Error-active, normal operation
    Active,
    /// Controller is error-passive
    ErrorPassive,
    /// Controller is bus-off; no traffic until recovery
    BusOff,
}

/// Callback invoked for every received frame matching a subscription
pub type FrameCallback = Box<dyn Fn(&CanFrame) + Send + Sync>;

/// Callback invoked on bus state changes
pub type StateCallback = Box<dyn Fn(BusState) + Send + Sync>;

/// Registration handle returned by [CanInterface::subscribe]
///
/// Dropping the handle deregisters the callback; delivery stops after the drop, at the next
/// dispatch at the latest.
pub struct FrameListener {
    // Owns the only strong reference; the dispatcher holds a weak one
    _callback: std::sync::Arc<FrameCallback>,
}

impl FrameListener {
    pub(crate) fn new(callback: std::sync::Arc<FrameCallback>) -> Self {
        Self {
            _callback: callback,
        }
    }
}

impl core::fmt::Debug for FrameListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameListener").finish_non_exhaustive()
    }
}

/// Registration handle returned by [CanInterface::subscribe_state]
pub struct StateListener {
    _callback: std::sync::Arc<StateCallback>,
}

impl StateListener {
    pub(crate) fn new(callback: std::sync::Arc<StateCallback>) -> Self {
        Self {
            _callback: callback,
        }
    }
}

impl core::fmt::Debug for StateListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateListener").finish_non_exhaustive()
    }
}

/// A CAN driver as seen by the master
///
/// The driver owns the physical (or simulated) bus. It serializes transmission internally and
/// delivers received frames to ID-filtered listeners from its own receive context.
pub trait CanInterface: Send + Sync {
    /// Queue a frame for transmission
    ///
    /// Returns false if the frame could not be handed to the driver. May block briefly while the
    /// driver drains its queue; callers must not hold protocol locks across this call.
    fn send(&self, frame: &CanFrame) -> bool;

    /// Register a callback for all received frames carrying `id`
    fn subscribe(&self, id: CanId, callback: FrameCallback) -> FrameListener;

    /// Register a callback for bus state changes
    fn subscribe_state(&self, callback: StateCallback) -> StateListener;

    /// The current bus state
    fn state(&self) -> BusState;
}
