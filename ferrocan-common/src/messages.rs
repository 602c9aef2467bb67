//! CAN frame and CANopen service message types
//!
//! Process data frames are handled generically by the PDO machinery; the types here cover the
//! broadcast services the master produces or consumes (NMT, SYNC, EMCY, heartbeat).

use snafu::Snafu;

use crate::constants::{EMCY_BASE, HEARTBEAT_BASE, NMT_CMD_ID, SYNC_ID};

/// A CAN identifier, either 11-bit standard or 29-bit extended
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanId {
    /// 29-bit extended identifier
    Extended(u32),
    /// 11-bit standard identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the raw identifier bits
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Return true for an extended ID
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanFrame {
    /// Frame identifier
    pub id: CanId,
    /// Remote transmission request flag
    pub rtr: bool,
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// Frame payload
    pub data: [u8; MAX_DATA_LENGTH],
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: CanId::Std(0),
            rtr: false,
            dlc: 0,
            data: [0; MAX_DATA_LENGTH],
        }
    }
}

impl CanFrame {
    /// Create a data frame
    ///
    /// Panics if `data` is longer than 8 bytes.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        if data.len() > MAX_DATA_LENGTH {
            panic!(
                "Data length exceeds maximum size of {} bytes",
                MAX_DATA_LENGTH
            );
        }
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..data.len()].copy_from_slice(data);
        Self {
            id,
            rtr: false,
            dlc: data.len() as u8,
            data: buf,
        }
    }

    /// Create a remote (RTR) frame with the given DLC
    pub fn new_rtr(id: CanId, dlc: u8) -> Self {
        Self {
            id,
            rtr: true,
            dlc,
            ..Default::default()
        }
    }

    /// Get the frame identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Return true for a remote frame
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }

    /// Get the valid payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }
}

/// NMT command specifiers, per DS-301
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommandCmd {
    /// Enter Operational
    Start = 1,
    /// Enter Stopped
    Stop = 2,
    /// Enter Pre-Operational
    EnterPreOp = 128,
    /// Reset application
    ResetApp = 129,
    /// Reset communication
    ResetComm = 130,
}

impl NmtCommandCmd {
    /// Decode a command specifier byte
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        match b {
            1 => Ok(Self::Start),
            2 => Ok(Self::Stop),
            128 => Ok(Self::EnterPreOp),
            129 => Ok(Self::ResetApp),
            130 => Ok(Self::ResetComm),
            _ => Err(MessageError::InvalidField),
        }
    }
}

/// An NMT command addressed to one node, or to all nodes with `node == 0`
#[derive(Debug, Clone, Copy)]
pub struct NmtCommand {
    /// The command specifier
    pub cmd: NmtCommandCmd,
    /// Target node ID, 0 for broadcast
    pub node: u8,
}

impl TryFrom<CanFrame> for NmtCommand {
    type Error = MessageError;

    fn try_from(frame: CanFrame) -> Result<Self, Self::Error> {
        let payload = frame.data();
        if frame.id() != NMT_CMD_ID {
            Err(MessageError::UnexpectedId {
                cob_id: frame.id(),
                expected: NMT_CMD_ID,
            })
        } else if payload.len() >= 2 {
            let cmd = NmtCommandCmd::from_byte(payload[0])?;
            let node = payload[1];
            Ok(NmtCommand { cmd, node })
        } else {
            Err(MessageError::FrameTooShort)
        }
    }
}

impl From<NmtCommand> for CanFrame {
    fn from(cmd: NmtCommand) -> Self {
        CanFrame::new(NMT_CMD_ID, &[cmd.cmd as u8, cmd.node])
    }
}

/// NMT states as reported in heartbeat frames
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtState {
    /// Initial boot-up notification
    Bootup = 0,
    /// Stopped: no PDO or SDO traffic
    Stopped = 4,
    /// Operational: full traffic
    Operational = 5,
    /// Pre-operational: SDO only
    PreOperational = 127,
}

impl TryFrom<u8> for NmtState {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use NmtState::*;
        match value {
            x if x == Bootup as u8 => Ok(Bootup),
            x if x == Stopped as u8 => Ok(Stopped),
            x if x == Operational as u8 => Ok(Operational),
            x if x == PreOperational as u8 => Ok(PreOperational),
            _ => Err(MessageError::InvalidNmtState { value }),
        }
    }
}

/// A producer heartbeat frame
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// The producing node's ID
    pub node: u8,
    /// Toggle bit, used by the legacy node-guarding protocol
    pub toggle: bool,
    /// The producer's NMT state
    pub state: NmtState,
}

impl From<Heartbeat> for CanFrame {
    fn from(value: Heartbeat) -> Self {
        let mut byte = value.state as u8;
        if value.toggle {
            byte |= 1 << 7;
        }
        CanFrame::new(CanId::Std(HEARTBEAT_BASE | value.node as u16), &[byte])
    }
}

impl TryFrom<CanFrame> for Heartbeat {
    type Error = MessageError;

    fn try_from(frame: CanFrame) -> Result<Self, Self::Error> {
        let raw = frame.id().raw();
        if raw & !0x7F != HEARTBEAT_BASE as u32 {
            return Err(MessageError::UnrecognizedId { cob_id: frame.id() });
        }
        let payload = frame.data();
        if payload.is_empty() {
            return Err(MessageError::FrameTooShort);
        }
        let node = (raw & 0x7F) as u8;
        let toggle = (payload[0] & (1 << 7)) != 0;
        let state = (payload[0] & 0x7F).try_into()?;
        Ok(Heartbeat {
            node,
            toggle,
            state,
        })
    }
}

/// A SYNC object
///
/// One node on the bus acts as the SYNC producer, pacing synchronous PDO exchange. The optional
/// counter byte starts at 1 and wraps back to 1 after the configured overflow value.
#[derive(Debug, Clone, Copy)]
pub struct SyncObject {
    /// Counter value, or `None` when the producer sends no counter byte
    pub count: Option<u8>,
}

impl From<SyncObject> for CanFrame {
    fn from(value: SyncObject) -> Self {
        match value.count {
            Some(count) => CanFrame::new(SYNC_ID, &[count]),
            None => CanFrame::new(SYNC_ID, &[]),
        }
    }
}

/// An emergency frame as produced by a slave node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmcyMessage {
    /// The producing node's ID
    pub node: u8,
    /// Emergency error code; 0x0000 signals "error reset / no error"
    pub code: u16,
    /// Error register (object 0x1001) at the time of the emergency
    pub register: u8,
    /// Manufacturer specific error field
    pub vendor: [u8; 5],
}

impl EmcyMessage {
    /// Return true for the "error reset / no error" message
    pub fn is_reset(&self) -> bool {
        self.code == 0
    }
}

impl TryFrom<CanFrame> for EmcyMessage {
    type Error = MessageError;

    fn try_from(frame: CanFrame) -> Result<Self, Self::Error> {
        let raw = frame.id().raw();
        if raw & !0x7F != EMCY_BASE as u32 || raw & 0x7F == 0 {
            return Err(MessageError::UnrecognizedId { cob_id: frame.id() });
        }
        let payload = frame.data();
        if payload.len() < 8 {
            return Err(MessageError::FrameTooShort);
        }
        let mut vendor = [0u8; 5];
        vendor.copy_from_slice(&payload[3..8]);
        Ok(EmcyMessage {
            node: (raw & 0x7F) as u8,
            code: u16::from_le_bytes([payload[0], payload[1]]),
            register: payload[2],
            vendor,
        })
    }
}

impl From<EmcyMessage> for CanFrame {
    fn from(value: EmcyMessage) -> Self {
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&value.code.to_le_bytes());
        data[2] = value.register;
        data[3..8].copy_from_slice(&value.vendor);
        CanFrame::new(CanId::Std(EMCY_BASE | value.node as u16), &data)
    }
}

/// Errors converting raw frames into service messages
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum MessageError {
    /// The frame payload is shorter than the message requires
    FrameTooShort,
    /// The frame ID was not the expected value
    #[snafu(display("Unexpected COB-ID: {cob_id:?}, expected: {expected:?}"))]
    UnexpectedId {
        /// The ID found on the frame
        cob_id: CanId,
        /// The ID the conversion expected
        expected: CanId,
    },
    /// A field held a value outside its coded range
    InvalidField,
    /// The frame ID does not belong to this service
    UnrecognizedId {
        /// The ID found on the frame
        cob_id: CanId,
    },
    /// The NMT state byte is not a valid state
    InvalidNmtState {
        /// The offending byte
        value: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nmt_round_trip() {
        let cmd = NmtCommand {
            cmd: NmtCommandCmd::Start,
            node: 5,
        };
        let frame: CanFrame = cmd.into();
        assert_eq!(frame.id(), NMT_CMD_ID);
        assert_eq!(frame.data(), &[1, 5]);

        let decoded = NmtCommand::try_from(frame).unwrap();
        assert_eq!(decoded.cmd, NmtCommandCmd::Start);
        assert_eq!(decoded.node, 5);
    }

    #[test]
    fn test_heartbeat_decode() {
        let frame = CanFrame::new(CanId::Std(0x705), &[0x85]);
        let hb = Heartbeat::try_from(frame).unwrap();
        assert_eq!(hb.node, 5);
        assert!(hb.toggle);
        assert_eq!(hb.state, NmtState::Operational);
    }

    #[test]
    fn test_emcy_decode() {
        let frame = CanFrame::new(CanId::Std(0x081), &[0x00, 0x10, 0x81, 1, 2, 3, 4, 5]);
        let emcy = EmcyMessage::try_from(frame).unwrap();
        assert_eq!(emcy.node, 1);
        assert_eq!(emcy.code, 0x1000);
        assert_eq!(emcy.register, 0x81);
        assert_eq!(emcy.vendor, [1, 2, 3, 4, 5]);
        assert!(!emcy.is_reset());
    }

    #[test]
    fn test_sync_frame() {
        let frame: CanFrame = SyncObject { count: None }.into();
        assert_eq!(frame.id(), SYNC_ID);
        assert_eq!(frame.dlc, 0);

        let frame: CanFrame = SyncObject { count: Some(3) }.into();
        assert_eq!(frame.data(), &[3]);
    }
}
