//! Shared fixtures for the ferrocan integration tests

pub mod sim_bus;

use std::sync::Arc;

use ferrocan_common::NodeId;
use ferrocan_master::{
    dictionary::{DataType, DeviceInfo, DictEntry, ObjectDict, ObjectKey, Value},
    storage::ObjectStorage,
};

fn entry(
    index: u16,
    sub: u8,
    data_type: DataType,
    init_val: Option<Value>,
    node_id_offset: bool,
) -> DictEntry {
    DictEntry {
        key: ObjectKey::new(index, sub),
        desc: String::new(),
        data_type,
        init_val,
        node_id_offset,
    }
}

/// A device with one TPDO mapping two 16-bit objects, every SYNC, at `0x181 + node_id`
///
/// The master receives this PDO (one RPDO after mapper init).
pub fn tpdo_device_dict(transmission_type: u8) -> ObjectDict {
    let mut dict = ObjectDict::new(DeviceInfo {
        nr_of_tx_pdo: 1,
        nr_of_rx_pdo: 0,
        ..Default::default()
    });
    // TPDO1 communication parameters
    dict.insert(entry(0x1800, 0, DataType::UInt8, Some(Value::U8(5)), false));
    dict.insert(entry(
        0x1800,
        1,
        DataType::UInt32,
        Some(Value::U32(0x181)),
        true,
    ));
    dict.insert(entry(
        0x1800,
        2,
        DataType::UInt8,
        Some(Value::U8(transmission_type)),
        false,
    ));
    // TPDO1 mapping: 0x2000sub1 and 0x2000sub2, 16 bits each
    dict.insert(entry(0x1A00, 0, DataType::UInt8, Some(Value::U8(2)), false));
    dict.insert(entry(
        0x1A00,
        1,
        DataType::UInt32,
        Some(Value::U32(0x2000_0110)),
        false,
    ));
    dict.insert(entry(
        0x1A00,
        2,
        DataType::UInt32,
        Some(Value::U32(0x2000_0210)),
        false,
    ));
    // The mapped application objects
    dict.insert(entry(0x2000, 1, DataType::UInt16, None, false));
    dict.insert(entry(0x2000, 2, DataType::UInt16, None, false));
    dict
}

/// A device with one RPDO mapping a single 32-bit object at `0x201 + node_id`
///
/// The master transmits this PDO (one TPDO after mapper init).
pub fn rpdo_device_dict(transmission_type: u8) -> ObjectDict {
    let mut dict = ObjectDict::new(DeviceInfo {
        nr_of_tx_pdo: 0,
        nr_of_rx_pdo: 1,
        ..Default::default()
    });
    // RPDO1 communication parameters
    dict.insert(entry(0x1400, 0, DataType::UInt8, Some(Value::U8(2)), false));
    dict.insert(entry(
        0x1400,
        1,
        DataType::UInt32,
        Some(Value::U32(0x201)),
        true,
    ));
    dict.insert(entry(
        0x1400,
        2,
        DataType::UInt8,
        Some(Value::U8(transmission_type)),
        false,
    ));
    // RPDO1 mapping: 0x2100sub1, 32 bits
    dict.insert(entry(0x1600, 0, DataType::UInt8, Some(Value::U8(1)), false));
    dict.insert(entry(
        0x1600,
        1,
        DataType::UInt32,
        Some(Value::U32(0x2100_0120)),
        false,
    ));
    dict.insert(entry(0x2100, 1, DataType::UInt32, Some(Value::U32(0)), false));
    dict
}

/// Storage for `dict` on node `node_id`, with dictionary defaults applied
pub fn storage_for(dict: ObjectDict, node_id: u8) -> Arc<ObjectStorage> {
    let storage = Arc::new(ObjectStorage::new(
        Arc::new(dict),
        NodeId::new(node_id).unwrap(),
    ));
    storage.init_all().unwrap();
    storage
}
