use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use socketcan::{CanSocket, EmbeddedFrame, Frame, Socket, SocketOptions};

use crate::{
    dispatch::FrameDispatcher,
    messages::{CanFrame, CanId},
    traits::{BusState, CanInterface, FrameCallback, FrameListener, StateCallback, StateListener},
};

fn socketcan_id_to_ferrocan_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn ferrocan_id_to_socketcan_id(id: CanId) -> socketcan::CanId {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).unwrap().into(),
        CanId::Std(id) => socketcan::StandardId::new(id).unwrap().into(),
    }
}

fn socketcan_frame_to_ferrocan_frame(frame: socketcan::CanFrame) -> Option<CanFrame> {
    match frame {
        socketcan::CanFrame::Data(frame) => Some(CanFrame::new(
            socketcan_id_to_ferrocan_id(frame.can_id()),
            frame.data(),
        )),
        socketcan::CanFrame::Remote(frame) => Some(CanFrame::new_rtr(
            socketcan_id_to_ferrocan_id(frame.can_id()),
            frame.dlc() as u8,
        )),
        socketcan::CanFrame::Error(_) => None,
    }
}

fn ferrocan_frame_to_socketcan_frame(frame: &CanFrame) -> socketcan::CanFrame {
    let id = ferrocan_id_to_socketcan_id(frame.id());
    if frame.is_rtr() {
        socketcan::CanFrame::new_remote(id, frame.dlc as usize).unwrap()
    } else {
        socketcan::CanFrame::new(id, frame.data()).unwrap()
    }
}

// Error class bits of an error frame ID, per linux/can/error.h
const ERR_CRTL: u32 = 0x04;
const ERR_BUSOFF: u32 = 0x40;
const ERR_RESTARTED: u32 = 0x100;

fn bus_state_from_error_bits(bits: u32) -> Option<BusState> {
    if bits & ERR_BUSOFF != 0 {
        Some(BusState::BusOff)
    } else if bits & ERR_RESTARTED != 0 {
        Some(BusState::Active)
    } else if bits & ERR_CRTL != 0 {
        Some(BusState::ErrorPassive)
    } else {
        None
    }
}

/// A [CanInterface] backed by a Linux SocketCAN device
///
/// Opening the interface spawns a receive thread which feeds frames into the dispatcher and
/// tracks the controller state from error frames. The thread is joined on drop.
pub struct SocketCanInterface {
    socket: Arc<CanSocket>,
    dispatcher: Arc<FrameDispatcher>,
    state: Arc<Mutex<BusState>>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for SocketCanInterface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketCanInterface").finish_non_exhaustive()
    }
}

impl SocketCanInterface {
    /// Open a socketcan device, e.g. "can0" or "vcan0", and start the receive thread
    pub fn open(device: &str) -> std::io::Result<Self> {
        let socket = CanSocket::open(device)?;
        socket.set_error_filter_accept_all()?;
        socket.set_read_timeout(Duration::from_millis(100))?;
        let socket = Arc::new(socket);

        let dispatcher = Arc::new(FrameDispatcher::new());
        let state = Arc::new(Mutex::new(BusState::Active));
        let running = Arc::new(AtomicBool::new(true));

        let rx_thread = {
            let socket = socket.clone();
            let dispatcher = dispatcher.clone();
            let state = state.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let frame = match socket.read_frame() {
                        Ok(frame) => frame,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue
                        }
                        Err(e) => {
                            log::error!("CAN receive failed: {e}");
                            break;
                        }
                    };
                    if let socketcan::CanFrame::Error(err_frame) = &frame {
                        if let Some(new_state) = bus_state_from_error_bits(err_frame.error_bits()) {
                            let changed = {
                                let mut state = state.lock().unwrap();
                                let changed = *state != new_state;
                                *state = new_state;
                                changed
                            };
                            if changed {
                                log::warn!("CAN bus state changed: {new_state:?}");
                                dispatcher.dispatch_state(new_state);
                            }
                        }
                        continue;
                    }
                    if let Some(frame) = socketcan_frame_to_ferrocan_frame(frame) {
                        dispatcher.dispatch(&frame);
                    }
                }
            })
        };

        Ok(Self {
            socket,
            dispatcher,
            state,
            running,
            rx_thread: Some(rx_thread),
        })
    }
}

impl Drop for SocketCanInterface {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            handle.join().ok();
        }
    }
}

impl CanInterface for SocketCanInterface {
    fn send(&self, frame: &CanFrame) -> bool {
        let socketcan_frame = ferrocan_frame_to_socketcan_frame(frame);
        match self.socket.write_frame(&socketcan_frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("CAN send failed: {e}");
                false
            }
        }
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
