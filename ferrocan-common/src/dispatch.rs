//! ID-filtered frame dispatch
//!
//! Backs every [CanInterface](crate::traits::CanInterface) implementation in the workspace: the
//! socketcan driver and the simulated test bus both register callbacks here and feed received
//! frames through [FrameDispatcher::dispatch].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    messages::{CanFrame, CanId},
    traits::{BusState, FrameCallback, FrameListener, StateCallback, StateListener},
};

/// Registry of ID-filtered frame listeners and bus state listeners
///
/// Listeners are held weakly; dropping the handle returned at registration deregisters the
/// callback. Dead registrations are pruned on the next dispatch for their ID.
#[derive(Default)]
pub struct FrameDispatcher {
    frame_listeners: Mutex<HashMap<CanId, Vec<Weak<FrameCallback>>>>,
    state_listeners: Mutex<Vec<Weak<StateCallback>>>,
}

impl core::fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameDispatcher").finish_non_exhaustive()
    }
}

impl FrameDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for frames carrying `id`
    pub fn subscribe(&self, id: CanId, callback: FrameCallback) -> FrameListener {
        let callback = Arc::new(callback);
        self.frame_listeners
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(Arc::downgrade(&callback));
        FrameListener::new(callback)
    }

    /// Register a bus state callback
    pub fn subscribe_state(&self, callback: StateCallback) -> StateListener {
        let callback = Arc::new(callback);
        self.state_listeners
            .lock()
            .unwrap()
            .push(Arc::downgrade(&callback));
        StateListener::new(callback)
    }

    /// Deliver a received frame to all live listeners registered for its ID
    ///
    /// Callbacks run outside the registry lock, so a callback may register or drop listeners
    /// without deadlocking.
    pub fn dispatch(&self, frame: &CanFrame) {
        let callbacks: Vec<Arc<FrameCallback>> = {
            let mut listeners = self.frame_listeners.lock().unwrap();
            match listeners.get_mut(&frame.id()) {
                Some(entries) => {
                    entries.retain(|weak| weak.strong_count() > 0);
                    entries.iter().filter_map(Weak::upgrade).collect()
                }
                None => return,
            }
        };
        for callback in callbacks {
            callback(frame);
        }
    }

    /// Deliver a bus state change to all live state listeners
    pub fn dispatch_state(&self, state: BusState) {
        let callbacks: Vec<Arc<StateCallback>> = {
            let mut listeners = self.state_listeners.lock().unwrap();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in callbacks {
            callback(state);
        }
    }
}
