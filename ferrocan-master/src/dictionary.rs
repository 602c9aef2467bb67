//! Object dictionary model
//!
//! The dictionary describes a slave device's parameter table: per-(index, sub) entries with a
//! data type, a human description and an optional init value that the master programs onto the
//! device during bring-up. Dictionaries are immutable once built; live values belong to
//! [ObjectStorage](crate::storage::ObjectStorage).

use std::collections::BTreeMap;

use ferrocan_common::NodeId;

/// Address of a dictionary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// 16-bit object index
    pub index: u16,
    /// 8-bit sub index
    pub sub: u8,
}

impl ObjectKey {
    /// Create a key
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl core::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04X}sub{}", self.index, self.sub)
    }
}

/// CANopen data types supported for dictionary entries, with their DS-301 type codes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum DataType {
    /// INTEGER8
    Int8 = 2,
    /// INTEGER16
    Int16 = 3,
    /// INTEGER32
    Int32 = 4,
    /// UNSIGNED8
    UInt8 = 5,
    /// UNSIGNED16
    UInt16 = 6,
    /// UNSIGNED32
    UInt32 = 7,
    /// REAL32
    Real32 = 8,
    /// VISIBLE_STRING
    VisibleString = 9,
}

impl DataType {
    /// Encoded size in bytes, or `None` for variable-length types
    pub fn size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Real32 => Some(4),
            DataType::VisibleString => None,
        }
    }
}

/// A typed dictionary or storage value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// UNSIGNED8
    U8(u8),
    /// UNSIGNED16
    U16(u16),
    /// UNSIGNED32
    U32(u32),
    /// INTEGER8
    I8(i8),
    /// INTEGER16
    I16(i16),
    /// INTEGER32
    I32(i32),
    /// REAL32
    F32(f32),
    /// VISIBLE_STRING
    VisibleString(String),
}

impl Value {
    /// The data type tag of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::U8(_) => DataType::UInt8,
            Value::U16(_) => DataType::UInt16,
            Value::U32(_) => DataType::UInt32,
            Value::I8(_) => DataType::Int8,
            Value::I16(_) => DataType::Int16,
            Value::I32(_) => DataType::Int32,
            Value::F32(_) => DataType::Real32,
            Value::VisibleString(_) => DataType::VisibleString,
        }
    }

    /// Wire encoding, little-endian per DS-301
    pub fn raw(&self) -> Vec<u8> {
        match self {
            Value::U8(v) => vec![*v],
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::I8(v) => vec![*v as u8],
            Value::I16(v) => v.to_le_bytes().to_vec(),
            Value::I32(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::VisibleString(s) => s.as_bytes().to_vec(),
        }
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            Value::VisibleString(s) => s.len(),
            other => other.data_type().size().unwrap(),
        }
    }

    /// Decode a value of the given type from its wire encoding
    ///
    /// Fails on a length mismatch, or on non-UTF8 bytes for strings.
    pub fn from_raw(data_type: DataType, raw: &[u8]) -> Option<Value> {
        if let Some(size) = data_type.size() {
            if raw.len() != size {
                return None;
            }
        }
        let value = match data_type {
            DataType::UInt8 => Value::U8(raw[0]),
            DataType::UInt16 => Value::U16(u16::from_le_bytes(raw.try_into().ok()?)),
            DataType::UInt32 => Value::U32(u32::from_le_bytes(raw.try_into().ok()?)),
            DataType::Int8 => Value::I8(raw[0] as i8),
            DataType::Int16 => Value::I16(i16::from_le_bytes(raw.try_into().ok()?)),
            DataType::Int32 => Value::I32(i32::from_le_bytes(raw.try_into().ok()?)),
            DataType::Real32 => Value::F32(f32::from_le_bytes(raw.try_into().ok()?)),
            DataType::VisibleString => {
                Value::VisibleString(String::from_utf8(raw.to_vec()).ok()?)
            }
        };
        Some(value)
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::VisibleString(s) => write!(f, "{s}"),
        }
    }
}

/// Conversion between Rust scalars and [Value], used by the typed storage accessors
pub trait ScalarValue: Sized {
    /// The dictionary type tag of this scalar
    const DATA_TYPE: DataType;

    /// Wrap into a [Value]
    fn into_value(self) -> Value;
    /// Extract from a [Value] of the matching variant
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_scalar_value {
    ($ty:ty, $variant:ident, $data_type:ident) => {
        impl ScalarValue for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_scalar_value!(u8, U8, UInt8);
impl_scalar_value!(u16, U16, UInt16);
impl_scalar_value!(u32, U32, UInt32);
impl_scalar_value!(i8, I8, Int8);
impl_scalar_value!(i16, I16, Int16);
impl_scalar_value!(i32, I32, Int32);
impl_scalar_value!(f32, F32, Real32);
impl_scalar_value!(String, VisibleString, VisibleString);

/// One dictionary entry
#[derive(Debug, Clone)]
pub struct DictEntry {
    /// The entry's address
    pub key: ObjectKey,
    /// Human readable description
    pub desc: String,
    /// Concrete type of the entry
    pub data_type: DataType,
    /// Value to program during bring-up; `None` when the device default is kept
    pub init_val: Option<Value>,
    /// When set, numeric init values are node-relative: the node ID is added on resolution
    pub node_id_offset: bool,
}

impl DictEntry {
    /// The init value, resolved for the given node
    ///
    /// COB-IDs are typically specified as `base + node_id`; entries flagged with
    /// `node_id_offset` get the node ID added to the raw numeric value, flag bits preserved.
    pub fn resolved_init_val(&self, node_id: NodeId) -> Option<Value> {
        let value = self.init_val.as_ref()?;
        if !self.node_id_offset {
            return Some(value.clone());
        }
        let offset = node_id.raw();
        let value = match value {
            Value::U8(v) => Value::U8(v.wrapping_add(offset)),
            Value::U16(v) => Value::U16(v.wrapping_add(offset as u16)),
            Value::U32(v) => Value::U32(v.wrapping_add(offset as u32)),
            other => other.clone(),
        };
        Some(value)
    }

    /// Byte size of the entry: the fixed type size, or the init value length for strings
    pub fn byte_size(&self) -> Option<usize> {
        self.data_type
            .size()
            .or_else(|| self.init_val.as_ref().map(Value::size))
    }
}

/// Identity and capability summary of a device
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo {
    /// Number of TPDOs the device produces
    pub nr_of_tx_pdo: u8,
    /// Number of RPDOs the device consumes
    pub nr_of_rx_pdo: u8,
    /// Vendor ID from the identity object
    pub vendor_id: u32,
    /// Product code from the identity object
    pub product_code: u32,
}

/// An immutable per-device object dictionary
#[derive(Debug, Clone, Default)]
pub struct ObjectDict {
    /// Device identity and PDO counts
    pub device_info: DeviceInfo,
    entries: BTreeMap<ObjectKey, DictEntry>,
}

impl ObjectDict {
    /// Create an empty dictionary for a device
    pub fn new(device_info: DeviceInfo) -> Self {
        Self {
            device_info,
            entries: BTreeMap::new(),
        }
    }

    /// Insert an entry, replacing any previous entry at the same key
    pub fn insert(&mut self, entry: DictEntry) {
        self.entries.insert(entry.key, entry);
    }

    /// Look up an entry
    pub fn get(&self, index: u16, sub: u8) -> Option<&DictEntry> {
        self.entries.get(&ObjectKey::new(index, sub))
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &DictEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return true if the dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip() {
        let value = Value::U32(0x12345678);
        assert_eq!(value.raw(), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(
            Value::from_raw(DataType::UInt32, &value.raw()),
            Some(value)
        );
    }

    #[test]
    fn test_from_raw_length_check() {
        assert!(Value::from_raw(DataType::UInt16, &[1]).is_none());
        assert!(Value::from_raw(DataType::UInt16, &[1, 2, 3]).is_none());
    }

    #[test]
    fn test_node_id_offset() {
        let entry = DictEntry {
            key: ObjectKey::new(0x1800, 1),
            desc: "COB-ID".into(),
            data_type: DataType::UInt32,
            init_val: Some(Value::U32(0x180)),
            node_id_offset: true,
        };
        let resolved = entry.resolved_init_val(NodeId::new(5).unwrap()).unwrap();
        assert_eq!(resolved, Value::U32(0x185));
    }

    #[test]
    fn test_no_offset_when_unflagged() {
        let entry = DictEntry {
            key: ObjectKey::new(0x1800, 2),
            desc: "transmission type".into(),
            data_type: DataType::UInt8,
            init_val: Some(Value::U8(1)),
            node_id_offset: false,
        };
        let resolved = entry.resolved_init_val(NodeId::new(5).unwrap()).unwrap();
        assert_eq!(resolved, Value::U8(1));
    }
}
