//! Constants for the standard CANopen COB-ID layout
//!
//!

use crate::messages::CanId;

/// The NMT command COB-ID
pub const NMT_CMD_ID: CanId = CanId::Std(0);
/// The SYNC COB-ID
pub const SYNC_ID: CanId = CanId::Std(0x80);
/// Base COB-ID for emergency frames (producer node ID is added)
pub const EMCY_BASE: u16 = 0x80;
/// Base COB-ID for heartbeat frames (producer node ID is added)
pub const HEARTBEAT_BASE: u16 = 0x700;
/// Default base COB-ID for the first TPDO of a device (node ID is added)
pub const TPDO1_BASE: u16 = 0x180;
/// Default base COB-ID for the first RPDO of a device (node ID is added)
pub const RPDO1_BASE: u16 = 0x200;
/// Default base COB-ID for SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// Default base COB-ID for SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;
