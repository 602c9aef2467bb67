//! PDO mapping subsystem
//!
//! Parses the PDO descriptors out of a node's object dictionary, (re)programs them on the
//! device through object storage, and shuttles bytes between storage entries and raw CAN frames
//! at synchronization time. Role flip: the device's TPDOs are received by the master (RPDO here),
//! the device's RPDOs are transmitted by the master (TPDO here).

use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use ferrocan_common::{
    messages::{CanFrame, CanId},
    traits::{CanInterface, FrameListener},
};
use snafu::{ResultExt, Snafu};

use crate::{
    dictionary::{DictEntry, ScalarValue, Value},
    status::LayerStatus,
    storage::{BufferSnafu, ObjectStorage, ReadDelegate, StorageError, WriteDelegate},
};

const SUB_COM_NUM: u8 = 0;
const SUB_COM_COB_ID: u8 = 1;
const SUB_COM_TRANSMISSION_TYPE: u8 = 2;
const SUB_COM_RESERVED: u8 = 4;

const SUB_MAP_NUM: u8 = 0;

/// Communication parameter base for RPDOs on the device (transmitted by the master)
pub const RPDO_COM_BASE: u16 = 0x1400;
/// Mapping parameter base for RPDOs on the device
pub const RPDO_MAP_BASE: u16 = 0x1600;
/// Communication parameter base for TPDOs on the device (received by the master)
pub const TPDO_COM_BASE: u16 = 0x1800;
/// Mapping parameter base for TPDOs on the device
pub const TPDO_MAP_BASE: u16 = 0x1A00;

// Indices below 0x1000 in a mapping entry denote dummy (padding) slots; only the standard
// dummy type indices are accepted.
const DUMMY_INDEX_MIN: u16 = 0x0002;
const DUMMY_INDEX_MAX: u16 = 0x0007;

/// Decoded COB-ID word of a PDO communication parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoCobId {
    /// The 29-bit CAN identifier
    pub id: u32,
    /// Bit 29: extended frame format
    pub extended: bool,
    /// Bit 30: RTR is not allowed on this PDO
    pub no_rtr: bool,
    /// Bit 31: PDO disabled
    pub invalid: bool,
}

impl PdoCobId {
    /// Decode from the 32-bit dictionary word
    pub fn from_word(word: u32) -> Self {
        Self {
            id: word & 0x1FFF_FFFF,
            extended: word & (1 << 29) != 0,
            no_rtr: word & (1 << 30) != 0,
            invalid: word & (1 << 31) != 0,
        }
    }

    /// Encode to the 32-bit dictionary word
    pub fn to_word(&self) -> u32 {
        let mut word = self.id & 0x1FFF_FFFF;
        if self.extended {
            word |= 1 << 29;
        }
        if self.no_rtr {
            word |= 1 << 30;
        }
        if self.invalid {
            word |= 1 << 31;
        }
        word
    }

    /// The frame identifier this COB-ID addresses
    pub fn can_id(&self) -> CanId {
        if self.extended {
            CanId::Extended(self.id)
        } else {
            CanId::Std((self.id & 0x7FF) as u16)
        }
    }
}

/// Decoded mapping word: `{length:8, sub:8, index:16}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoMapEntry {
    /// Index of the mapped object
    pub index: u16,
    /// Sub index of the mapped object
    pub sub: u8,
    /// Mapped length in bits
    pub length_bits: u8,
}

impl PdoMapEntry {
    /// Decode from the 32-bit dictionary word
    pub fn from_word(word: u32) -> Self {
        Self {
            index: (word >> 16) as u16,
            sub: ((word >> 8) & 0xFF) as u8,
            length_bits: (word & 0xFF) as u8,
        }
    }

    /// Encode to the 32-bit dictionary word
    pub fn to_word(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.sub as u32) << 8) | self.length_bits as u32
    }

    /// Mapped length in whole bytes
    pub fn length_bytes(&self) -> usize {
        self.length_bits as usize / 8
    }

    /// Return true for a padding slot not tied to a real object
    pub fn is_dummy(&self) -> bool {
        self.index < 0x1000
    }
}

/// Faults raised by buffer access
#[derive(Debug, Snafu)]
pub enum BufferError {
    /// The access length does not match the slot size
    #[snafu(display("size mismatch: slot holds {expected} bytes, access carried {actual}"))]
    SizeMismatch {
        /// The slot size in bytes
        expected: usize,
        /// The length the access provided
        actual: usize,
    },
    /// No data arrived before the deadline
    #[snafu(display("timed out waiting for data"))]
    Timeout,
}

#[derive(Debug)]
struct BufferState {
    data: Vec<u8>,
    /// Never written since creation
    empty: bool,
    /// Written since the last consumer read
    dirty: bool,
}

/// A fixed-size byte slab backing one PDO slot
///
/// Frames write into it from the receive thread; storage reads drain it from the driver thread,
/// blocking up to one second for fresh data. `empty` clears on the first write and never comes
/// back; `dirty` tracks writes since the last consumer read.
#[derive(Debug)]
pub struct Buffer {
    size: usize,
    state: Mutex<BufferState>,
    cond: Condvar,
}

/// Deadline for blocking entry reads
const READ_DEADLINE: Duration = Duration::from_secs(1);

impl Buffer {
    /// Create a zeroed buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BufferState {
                data: vec![0; size],
                empty: true,
                dirty: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// The slot size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Clear the dirty flag, e.g. after a priming write during setup
    pub fn clean(&self) {
        self.state.lock().unwrap().dirty = false;
    }

    /// Frame-side write: copy the first `size` bytes of `bytes`
    ///
    /// Shorter input is a protocol violation.
    pub fn write_slice(&self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() < self.size {
            return SizeMismatchSnafu {
                expected: self.size,
                actual: bytes.len(),
            }
            .fail();
        }
        {
            let mut state = self.state.lock().unwrap();
            state.data.copy_from_slice(&bytes[..self.size]);
            state.empty = false;
            state.dirty = true;
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Frame-side read: copy into the first `size` bytes of `out`
    ///
    /// Returns the previous dirty state and clears it; returns false without copying while the
    /// buffer has never been written.
    pub fn read_slice(&self, out: &mut [u8]) -> Result<bool, BufferError> {
        if out.len() < self.size {
            return SizeMismatchSnafu {
                expected: self.size,
                actual: out.len(),
            }
            .fail();
        }
        let mut state = self.state.lock().unwrap();
        if state.empty {
            return Ok(false);
        }
        out[..self.size].copy_from_slice(&state.data);
        let was_dirty = state.dirty;
        state.dirty = false;
        Ok(was_dirty)
    }

    /// Storage-side read: block until the buffer is non-empty or the 1 s deadline expires
    ///
    /// `data` must match the slot size exactly; it is overwritten only if the buffer is dirty,
    /// and the dirty flag is cleared.
    pub fn read_entry(&self, data: &mut Vec<u8>) -> Result<(), BufferError> {
        if data.len() != self.size {
            return SizeMismatchSnafu {
                expected: self.size,
                actual: data.len(),
            }
            .fail();
        }
        let deadline = Instant::now() + READ_DEADLINE;
        let mut state = self.state.lock().unwrap();
        while state.empty {
            let now = Instant::now();
            if now >= deadline {
                return TimeoutSnafu.fail();
            }
            let (guard, result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if result.timed_out() && state.empty {
                return TimeoutSnafu.fail();
            }
        }
        if state.dirty {
            data.copy_from_slice(&state.data);
            state.dirty = false;
        }
        Ok(())
    }

    /// Storage-side write: overwrite the slot and wake blocked readers
    ///
    /// `data` must match the slot size exactly.
    pub fn write_entry(&self, data: &[u8]) -> Result<(), BufferError> {
        if data.len() != self.size {
            return SizeMismatchSnafu {
                expected: self.size,
                actual: data.len(),
            }
            .fail();
        }
        {
            let mut state = self.state.lock().unwrap();
            state.data.copy_from_slice(data);
            state.empty = false;
            state.dirty = true;
        }
        self.cond.notify_all();
        Ok(())
    }
}

/// Faults constructing a single PDO
#[derive(Debug, Snafu)]
pub enum PdoError {
    /// A storage access failed
    #[snafu(context(false))]
    Storage {
        /// The underlying storage fault
        source: StorageError,
    },
    /// The COB-ID invalid bit is set; the PDO is disabled on the device
    #[snafu(display("PDO is disabled"))]
    Disabled,
    /// The mapping resolved to no slots
    #[snafu(display("PDO maps no objects"))]
    NoBuffers,
    /// The mapped slots exceed the 8 byte frame payload
    #[snafu(display("mapping exceeds frame payload: {dlc} bytes"))]
    MappingTooLong {
        /// Total mapped byte count
        dlc: usize,
    },
    /// The mapped byte count disagrees with the storage entry size
    #[snafu(display(
        "slot size mismatch for {index:04X}sub{sub}: mapped {mapped} bytes, entry holds {actual}"
    ))]
    SlotSizeMismatch {
        /// Mapped object index
        index: u16,
        /// Mapped object sub index
        sub: u8,
        /// Byte count from the mapping word
        mapped: usize,
        /// Byte count of the storage entry
        actual: usize,
    },
    /// A dummy mapping names an index outside the standard dummy type range
    #[snafu(display("invalid dummy mapping index {index:04X}"))]
    InvalidDummy {
        /// The offending index
        index: u16,
    },
    /// The dictionary carries no COB-ID for this PDO
    #[snafu(display("no COB-ID value for communication index {com_index:04X}"))]
    NoCobId {
        /// The communication parameter index
        com_index: u16,
    },
    /// The dictionary carries no transmission type for this PDO
    #[snafu(display("no transmission type for communication index {com_index:04X}"))]
    NoTransmissionType {
        /// The communication parameter index
        com_index: u16,
    },
}

fn check_com_changed(storage: &ObjectStorage, com_index: u16) -> bool {
    let dict = storage.dict();
    (0..=6).any(|sub| {
        dict.get(com_index, sub)
            .map(|e| e.init_val.is_some())
            .unwrap_or(false)
    })
}

fn check_map_changed(map_num: u8, storage: &ObjectStorage, map_index: u16) -> bool {
    let dict = storage.dict();
    if map_num <= 0x40 {
        (1..=map_num).any(|sub| {
            dict.get(map_index, sub)
                .map(|e| e.init_val.is_some())
                .unwrap_or(false)
        })
    } else {
        // Record mode: the count itself comes from the device
        dict.get(map_index, SUB_MAP_NUM)
            .map(|e| e.init_val.is_none())
            .unwrap_or(false)
    }
}

/// Read, (re)program and mount the mapping of one PDO
///
/// Returns the buffer slots in mapping-sub order. While any communication or mapping parameter
/// is being rewritten the COB-ID invalid bit is held set on the device, and the mapping count
/// is cleared before entries are written, per DS-301.
fn parse_and_set_mapping(
    storage: &ObjectStorage,
    com_index: u16,
    map_index: u16,
    read: bool,
    write: bool,
) -> Result<Vec<Arc<Buffer>>, PdoError> {
    let dict = storage.dict().clone();

    let num_entry = storage.entry::<u8>(map_index, SUB_MAP_NUM)?;
    let map_num = match dict.get(map_index, SUB_MAP_NUM).and_then(|e| e.init_val.clone()) {
        Some(Value::U8(n)) => n,
        _ => 0,
    };

    let map_changed = check_map_changed(map_num, storage, map_index);
    let com_changed = check_com_changed(storage, com_index);

    let cob_id = storage.entry::<u32>(com_index, SUB_COM_COB_ID)?;

    if map_changed || com_changed {
        // Disable the PDO on the device while it is reprogrammed
        let current = match cob_id.get_cached() {
            Ok(word) => word,
            Err(StorageError::NoValue { .. }) => dict
                .get(com_index, SUB_COM_COB_ID)
                .and_then(|e| e.resolved_init_val(storage.node_id()))
                .and_then(|v| u32::from_value(&v))
                .ok_or(PdoError::NoCobId { com_index })?,
            Err(e) => return Err(e.into()),
        };
        let mut disabled = PdoCobId::from_word(current);
        disabled.invalid = true;
        cob_id.set(disabled.to_word())?;
    }

    let mut buffers: Vec<Arc<Buffer>> = Vec::new();
    let mut dlc = 0usize;

    if (1..=0x40).contains(&map_num) {
        if map_changed {
            // The count must be cleared before mapping entries are rewritten
            num_entry.set(0)?;
        }
        for sub in 1..=map_num {
            let map_entry = storage.entry::<u32>(map_index, sub)?;
            if let Some(Value::U32(init)) =
                dict.get(map_index, sub).and_then(|e| e.init_val.clone())
            {
                map_entry.set(init)?;
            }
            let param = PdoMapEntry::from_word(map_entry.get_cached()?);
            let buffer = Arc::new(Buffer::new(param.length_bytes()));
            if param.is_dummy() {
                if !(DUMMY_INDEX_MIN..=DUMMY_INDEX_MAX).contains(&param.index) {
                    return InvalidDummySnafu { index: param.index }.fail();
                }
                // Padding slot: contributes bytes to the frame but maps no object
            } else {
                let read_delegate: Option<ReadDelegate> = read.then(|| {
                    let b = buffer.clone();
                    Box::new(move |entry: &DictEntry, data: &mut Vec<u8>| {
                        b.read_entry(data).context(BufferSnafu { key: entry.key })
                    }) as ReadDelegate
                });
                // The write delegate doubles as buffer setup for the receive direction
                let write_delegate: Option<WriteDelegate> = (read || write).then(|| {
                    let b = buffer.clone();
                    Box::new(move |entry: &DictEntry, data: &[u8]| {
                        b.write_entry(data).context(BufferSnafu { key: entry.key })
                    }) as WriteDelegate
                });
                let mounted = storage.map(param.index, param.sub, read_delegate, write_delegate)?;
                if mounted != param.length_bytes() {
                    return SlotSizeMismatchSnafu {
                        index: param.index,
                        sub: param.sub,
                        mapped: param.length_bytes(),
                        actual: mounted,
                    }
                    .fail();
                }
            }
            dlc += buffer.size();
            if dlc > 8 {
                return MappingTooLongSnafu { dlc }.fail();
            }
            buffer.clean();
            buffers.push(buffer);
        }
    }

    if com_changed {
        let subs = match dict.get(com_index, SUB_COM_NUM).and_then(|e| e.init_val.clone()) {
            Some(Value::U8(n)) => n,
            _ => 0,
        };
        for sub in (SUB_COM_NUM + 1)..=subs {
            if sub == SUB_COM_COB_ID || sub == SUB_COM_RESERVED {
                continue;
            }
            match storage.init(com_index, sub) {
                Ok(()) => {}
                // The device does not provide this sub, skip it
                Err(StorageError::NoSuchEntry { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    if map_changed {
        num_entry.set(map_num)?;
    }
    if com_changed || map_changed {
        storage.init(com_index, SUB_COM_COB_ID)?;
        // Re-enable with the node-relative COB-ID
        let word = dict
            .get(com_index, SUB_COM_COB_ID)
            .and_then(|e| e.resolved_init_val(storage.node_id()))
            .and_then(|v| u32::from_value(&v))
            .ok_or(PdoError::NoCobId { com_index })?;
        cob_id.set(word)?;
    }

    Ok(buffers)
}

fn resolved_cob_id(storage: &ObjectStorage, com_index: u16) -> Result<PdoCobId, PdoError> {
    let word = storage
        .dict()
        .get(com_index, SUB_COM_COB_ID)
        .and_then(|e| e.resolved_init_val(storage.node_id()))
        .and_then(|v| u32::from_value(&v))
        .ok_or(PdoError::NoCobId { com_index })?;
    Ok(PdoCobId::from_word(word))
}

fn dict_transmission_type(storage: &ObjectStorage, com_index: u16) -> Result<u8, PdoError> {
    match storage
        .dict()
        .get(com_index, SUB_COM_TRANSMISSION_TYPE)
        .and_then(|e| e.init_val.clone())
    {
        Some(Value::U8(tt)) => Ok(tt),
        _ => Err(PdoError::NoTransmissionType { com_index }),
    }
}

fn is_cyclic(transmission_type: u8) -> bool {
    (1..=240).contains(&transmission_type)
}

fn is_rtr_type(transmission_type: u8) -> bool {
    transmission_type == 0xFC || transmission_type == 0xFD
}

#[derive(Debug)]
struct RpdoState {
    frame: CanFrame,
    transmission_type: u8,
    /// Cycles until "RPDO timeout"; negative disables the watchdog
    timeout: i32,
    buffers: Vec<Arc<Buffer>>,
}

impl RpdoState {
    fn handle_frame(&mut self, frame: &CanFrame) {
        let data = frame.data();
        let mut offset = 0;
        for buffer in &self.buffers {
            if offset + buffer.size() <= data.len() {
                if let Err(e) = buffer.write_slice(&data[offset..offset + buffer.size()]) {
                    log::error!("RPDO {:?}: slot write failed: {e}", frame.id());
                }
                offset += buffer.size();
            } else {
                log::error!(
                    "RPDO {:?}: frame carries {} bytes, mapping expects more",
                    frame.id(),
                    data.len()
                );
                break;
            }
        }
        if offset != data.len() {
            log::error!(
                "RPDO {:?}: frame carries {} bytes, mapping consumed {offset}",
                frame.id(),
                data.len()
            );
        }
        if is_cyclic(self.transmission_type) {
            self.timeout = self.transmission_type as i32 + 2;
        } else if is_rtr_type(self.transmission_type) && self.frame.is_rtr() {
            self.timeout = 3;
        }
    }
}

/// A PDO received by the master (a TPDO of the device)
pub struct Rpdo {
    interface: Arc<dyn CanInterface>,
    state: Arc<Mutex<RpdoState>>,
    // Released before the state it feeds is dropped
    listener: Option<FrameListener>,
}

impl core::fmt::Debug for Rpdo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rpdo").finish_non_exhaustive()
    }
}

impl Drop for Rpdo {
    fn drop(&mut self) {
        self.listener.take();
    }
}

impl Rpdo {
    fn init(
        interface: Arc<dyn CanInterface>,
        storage: &ObjectStorage,
        com_index: u16,
        map_index: u16,
    ) -> Result<Self, PdoError> {
        let buffers = parse_and_set_mapping(storage, com_index, map_index, true, false)?;

        let pdo_id = resolved_cob_id(storage, com_index)?;
        if buffers.is_empty() {
            return NoBuffersSnafu.fail();
        }
        if pdo_id.invalid {
            return DisabledSnafu.fail();
        }

        let mut frame = CanFrame::default();
        frame.id = pdo_id.can_id();
        frame.rtr = !pdo_id.no_rtr;
        frame.dlc = buffers.iter().map(|b| b.size() as u8).sum();

        let transmission_type = dict_transmission_type(storage, com_index)?;
        let timeout = if is_cyclic(transmission_type) {
            transmission_type as i32 + 2
        } else if transmission_type == 0xFC {
            3
        } else {
            -1
        };

        let state = Arc::new(Mutex::new(RpdoState {
            frame,
            transmission_type,
            timeout,
            buffers,
        }));

        let listener = {
            let state = state.clone();
            interface.subscribe(
                pdo_id.can_id(),
                Box::new(move |frame| state.lock().unwrap().handle_frame(frame)),
            )
        };

        Ok(Self {
            interface,
            state,
            listener: Some(listener),
        })
    }

    /// Per-cycle tick: advance the timeout watchdog and issue RTR requests
    pub fn sync(&self, status: &LayerStatus) {
        // Assemble under the lock, send outside it
        let rtr_request = {
            let mut state = self.state.lock().unwrap();
            if is_cyclic(state.transmission_type) || state.transmission_type == 0xFC {
                if state.timeout > 0 {
                    state.timeout -= 1;
                } else if state.timeout == 0 {
                    status.warn("RPDO timeout");
                }
            }
            (is_rtr_type(state.transmission_type) && state.frame.is_rtr())
                .then_some(state.frame)
        };
        if let Some(frame) = rtr_request {
            self.interface.send(&frame);
        }
    }

    /// Number of mapped slots
    pub fn buffer_count(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// Sizes of the mapped slots, in mapping order
    pub fn buffer_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .buffers
            .iter()
            .map(|b| b.size())
            .collect()
    }

    /// The receive frame template (ID and DLC)
    pub fn frame(&self) -> CanFrame {
        self.state.lock().unwrap().frame
    }

    /// The configured transmission type
    pub fn transmission_type(&self) -> u8 {
        self.state.lock().unwrap().transmission_type
    }
}

#[derive(Debug)]
struct TpdoState {
    frame: CanFrame,
    buffers: Vec<Arc<Buffer>>,
}

/// A PDO transmitted by the master (an RPDO of the device)
pub struct Tpdo {
    interface: Arc<dyn CanInterface>,
    transmission_type: u8,
    state: Mutex<TpdoState>,
}

impl core::fmt::Debug for Tpdo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tpdo")
            .field("transmission_type", &self.transmission_type)
            .finish_non_exhaustive()
    }
}

impl Tpdo {
    fn init(
        interface: Arc<dyn CanInterface>,
        storage: &ObjectStorage,
        com_index: u16,
        map_index: u16,
    ) -> Result<Self, PdoError> {
        let buffers = parse_and_set_mapping(storage, com_index, map_index, false, true)?;

        let pdo_id = resolved_cob_id(storage, com_index)?;
        if buffers.is_empty() {
            return NoBuffersSnafu.fail();
        }
        if pdo_id.invalid {
            return DisabledSnafu.fail();
        }

        let mut frame = CanFrame::default();
        frame.id = pdo_id.can_id();
        frame.dlc = buffers.iter().map(|b| b.size() as u8).sum();

        let mut transmission_type = dict_transmission_type(storage, com_index)?;
        if (2..=240).contains(&transmission_type) {
            // The master paces every synchronous TPDO at every SYNC
            storage
                .entry::<u8>(com_index, SUB_COM_TRANSMISSION_TYPE)?
                .set(1)?;
            transmission_type = 1;
        }

        Ok(Self {
            interface,
            transmission_type,
            state: Mutex::new(TpdoState { frame, buffers }),
        })
    }

    /// Per-cycle tick: gather the mapped slots and transmit if any was updated
    pub fn sync(&self) {
        // Assemble under the lock, send outside it
        let frame_to_send = {
            let mut state = self.state.lock().unwrap();
            let TpdoState { frame, buffers } = &mut *state;
            let dlc = frame.dlc as usize;
            let mut updated = false;
            let mut offset = 0;
            for buffer in buffers.iter() {
                if offset + buffer.size() <= dlc {
                    match buffer.read_slice(&mut frame.data[offset..offset + buffer.size()]) {
                        Ok(was_dirty) => updated |= was_dirty,
                        Err(e) => log::error!("TPDO {:?}: slot read failed: {e}", frame.id()),
                    }
                    offset += buffer.size();
                } else {
                    log::error!("TPDO {:?}: mapping exceeds frame payload", frame.id());
                    return;
                }
            }
            if offset != dlc {
                log::error!(
                    "TPDO {:?}: mapping covers {offset} bytes of a {dlc} byte frame",
                    frame.id()
                );
            }
            updated.then_some(*frame)
        };
        if let Some(frame) = frame_to_send {
            self.interface.send(&frame);
        }
    }

    /// Number of mapped slots
    pub fn buffer_count(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// The transmit frame template (ID and DLC)
    pub fn frame(&self) -> CanFrame {
        self.state.lock().unwrap().frame
    }

    /// The effective transmission type after coercion
    pub fn transmission_type(&self) -> u8 {
        self.transmission_type
    }
}

/// Builds and drives the PDO set of one node
pub struct PdoMapper {
    interface: Arc<dyn CanInterface>,
    rpdos: Vec<Rpdo>,
    tpdos: Vec<Tpdo>,
}

impl core::fmt::Debug for PdoMapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PdoMapper")
            .field("rpdos", &self.rpdos.len())
            .field("tpdos", &self.tpdos.len())
            .finish()
    }
}

impl PdoMapper {
    /// Create an empty mapper
    pub fn new(interface: Arc<dyn CanInterface>) -> Self {
        Self {
            interface,
            rpdos: Vec::new(),
            tpdos: Vec::new(),
        }
    }

    /// (Re)build all PDOs from the node's dictionary
    ///
    /// The device's TPDO count yields the master's receive set, its RPDO count the transmit
    /// set. Descriptors whose init fails are skipped; unused slots (no mapping, or a COB-ID
    /// with the invalid bit) are normal and logged at debug level only.
    pub fn init(&mut self, storage: &ObjectStorage) {
        let node_id = storage.node_id();
        let device_info = storage.dict().device_info;

        self.rpdos.clear();
        for i in 0..device_info.nr_of_tx_pdo as u16 {
            match Rpdo::init(
                self.interface.clone(),
                storage,
                TPDO_COM_BASE + i,
                TPDO_MAP_BASE + i,
            ) {
                Ok(rpdo) => self.rpdos.push(rpdo),
                Err(e @ (PdoError::Disabled | PdoError::NoBuffers)) => {
                    log::debug!("node {node_id}: RPDO {i} not used: {e}");
                }
                Err(e) => log::warn!("node {node_id}: RPDO {i} rejected: {e}"),
            }
        }

        self.tpdos.clear();
        for i in 0..device_info.nr_of_rx_pdo as u16 {
            match Tpdo::init(
                self.interface.clone(),
                storage,
                RPDO_COM_BASE + i,
                RPDO_MAP_BASE + i,
            ) {
                Ok(tpdo) => self.tpdos.push(tpdo),
                Err(e @ (PdoError::Disabled | PdoError::NoBuffers)) => {
                    log::debug!("node {node_id}: TPDO {i} not used: {e}");
                }
                Err(e) => log::warn!("node {node_id}: TPDO {i} rejected: {e}"),
            }
        }

        log::info!(
            "node {node_id}: mapped {} RPDOs, {} TPDOs",
            self.rpdos.len(),
            self.tpdos.len()
        );
    }

    /// Drop all PDOs, releasing their frame listeners
    pub fn clear(&mut self) {
        self.rpdos.clear();
        self.tpdos.clear();
    }

    /// Read-cycle tick across all receive PDOs
    pub fn read(&self, status: &LayerStatus) {
        for rpdo in &self.rpdos {
            rpdo.sync(status);
        }
    }

    /// Write-cycle tick across all transmit PDOs
    pub fn write(&self, _status: &LayerStatus) {
        for tpdo in &self.tpdos {
            tpdo.sync();
        }
    }

    /// The receive PDOs
    pub fn rpdos(&self) -> &[Rpdo] {
        &self.rpdos
    }

    /// The transmit PDOs
    pub fn tpdos(&self) -> &[Tpdo] {
        &self.tpdos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cob_id_word_round_trip() {
        let id = PdoCobId::from_word(0xC000_0185);
        assert_eq!(id.id, 0x185);
        assert!(!id.extended);
        assert!(id.no_rtr);
        assert!(id.invalid);
        assert_eq!(id.to_word(), 0xC000_0185);
        assert_eq!(id.can_id(), CanId::Std(0x185));
    }

    #[test]
    fn test_map_entry_word_round_trip() {
        let entry = PdoMapEntry::from_word(0x2000_0110);
        assert_eq!(entry.index, 0x2000);
        assert_eq!(entry.sub, 1);
        assert_eq!(entry.length_bits, 0x10);
        assert_eq!(entry.length_bytes(), 2);
        assert!(!entry.is_dummy());
        assert_eq!(entry.to_word(), 0x2000_0110);
    }

    #[test]
    fn test_buffer_slice_round_trip() {
        let buffer = Buffer::new(2);
        let mut out = [0u8; 2];

        // Never written: no data, no copy
        assert!(!buffer.read_slice(&mut out).unwrap());

        buffer.write_slice(&[0xAA, 0xBB]).unwrap();
        assert!(buffer.read_slice(&mut out).unwrap());
        assert_eq!(out, [0xAA, 0xBB]);

        // Second read: data still there, but no longer dirty
        assert!(!buffer.read_slice(&mut out).unwrap());
        assert_eq!(out, [0xAA, 0xBB]);
    }

    #[test]
    fn test_buffer_size_mismatch_is_fatal() {
        let buffer = Buffer::new(4);
        assert!(matches!(
            buffer.write_slice(&[1, 2]),
            Err(BufferError::SizeMismatch { .. })
        ));
        let mut short = [0u8; 2];
        assert!(matches!(
            buffer.read_slice(&mut short),
            Err(BufferError::SizeMismatch { .. })
        ));
        assert!(matches!(
            buffer.write_entry(&[1, 2]),
            Err(BufferError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_buffer_clean_clears_dirty() {
        let buffer = Buffer::new(1);
        buffer.write_slice(&[7]).unwrap();
        buffer.clean();
        let mut out = [0u8];
        // Data is present but not fresh
        assert!(!buffer.read_slice(&mut out).unwrap());
        assert_eq!(out, [7]);
    }
}
