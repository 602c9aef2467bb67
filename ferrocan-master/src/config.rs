//! Master configuration
//!
//! A `MasterConfig` is loaded from a TOML file and describes the bus settings plus, per node,
//! the object dictionary seeds the master programs during bring-up (PDO communication and
//! mapping parameters, application object defaults).
//!
//! # An example TOML file
//!
//! ```toml
//! [bus]
//! device = "vcan0"
//! sync_interval = 1
//! heartbeat_interval = 100
//! master_node_id = 127
//!
//! [[nodes]]
//! id = 5
//! name = "drive"
//! nr_of_tx_pdo = 1
//! nr_of_rx_pdo = 1
//!
//! [[nodes.objects]]
//! index = 0x1800
//! sub = 1
//! type = "u32"
//! value = 0x180
//! node_id_offset = true
//! desc = "TPDO1 COB-ID"
//! ```

use std::{collections::HashSet, path::Path};

use ferrocan_common::{node_id::InvalidNodeIdError, NodeId};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::dictionary::{DataType, DeviceInfo, DictEntry, ObjectDict, ObjectKey, Value};

/// Error returned when loading a master configuration fails
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// An IO error occurred while reading the file
    #[snafu(display("IO error loading {path}: {source}"))]
    Io {
        /// The offending path
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The TOML parser rejected the file
    #[snafu(display("TOML parse error: {source}"))]
    TomlParsing {
        /// The underlying TOML error
        source: toml::de::Error,
    },
    /// A node carries an out-of-range ID
    #[snafu(display("Invalid node ID {id}"))]
    InvalidNodeId {
        /// The offending ID
        id: u8,
        /// The validation failure
        source: InvalidNodeIdError,
    },
    /// Two node sections share one ID
    #[snafu(display("Duplicate node ID {id}"))]
    DuplicateNodeId {
        /// The duplicated ID
        id: u8,
    },
    /// An object seed value does not fit its declared type
    #[snafu(display("Invalid value for object {index:04X}sub{sub}: expected {expected}"))]
    InvalidValue {
        /// The object index
        index: u16,
        /// The object sub index
        sub: u8,
        /// What the declared type required
        expected: &'static str,
    },
}

/// Bus-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Interface to open, e.g. "can0"
    pub device: String,
    /// Driver cycles per SYNC frame; 0 disables the producer
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u32,
    /// SYNC counter overflow; 0 sends no counter byte
    #[serde(default)]
    pub sync_overflow: u8,
    /// Driver cycles per master heartbeat; 0 disables the producer
    #[serde(default)]
    pub heartbeat_interval: u32,
    /// The master's own node ID, used as heartbeat source
    #[serde(default = "default_master_node_id")]
    pub master_node_id: u8,
}

fn default_sync_interval() -> u32 {
    1
}

fn default_master_node_id() -> u8 {
    127
}

/// Declared type of an object seed
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedType {
    /// UNSIGNED8
    U8,
    /// UNSIGNED16
    U16,
    /// UNSIGNED32
    U32,
    /// INTEGER8
    I8,
    /// INTEGER16
    I16,
    /// INTEGER32
    I32,
    /// REAL32
    F32,
    /// VISIBLE_STRING
    String,
}

impl From<SeedType> for DataType {
    fn from(value: SeedType) -> Self {
        match value {
            SeedType::U8 => DataType::UInt8,
            SeedType::U16 => DataType::UInt16,
            SeedType::U32 => DataType::UInt32,
            SeedType::I8 => DataType::Int8,
            SeedType::I16 => DataType::Int16,
            SeedType::I32 => DataType::Int32,
            SeedType::F32 => DataType::Real32,
            SeedType::String => DataType::VisibleString,
        }
    }
}

/// One dictionary entry seed
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectSeed {
    /// Object index
    pub index: u16,
    /// Object sub index
    pub sub: u8,
    /// Declared data type
    #[serde(rename = "type")]
    pub ty: SeedType,
    /// Init value programmed during bring-up; omit to keep the device default
    #[serde(default)]
    pub value: Option<toml::Value>,
    /// Human readable description
    #[serde(default)]
    pub desc: String,
    /// Numeric init values are node-relative (COB-ID style `base + node_id`)
    #[serde(default)]
    pub node_id_offset: bool,
}

fn integer_in_range<T: TryFrom<i64>>(
    raw: &toml::Value,
    index: u16,
    sub: u8,
    expected: &'static str,
) -> Result<T, ConfigError> {
    raw.as_integer()
        .and_then(|v| T::try_from(v).ok())
        .ok_or(ConfigError::InvalidValue {
            index,
            sub,
            expected,
        })
}

impl ObjectSeed {
    fn init_val(&self) -> Result<Option<Value>, ConfigError> {
        let Some(raw) = &self.value else {
            return Ok(None);
        };
        let (index, sub) = (self.index, self.sub);
        let value = match self.ty {
            SeedType::U8 => Value::U8(integer_in_range(raw, index, sub, "an integer in [0..2^8]")?),
            SeedType::U16 => {
                Value::U16(integer_in_range(raw, index, sub, "an integer in [0..2^16]")?)
            }
            SeedType::U32 => {
                Value::U32(integer_in_range(raw, index, sub, "an integer in [0..2^32]")?)
            }
            SeedType::I8 => Value::I8(integer_in_range(raw, index, sub, "an 8-bit integer")?),
            SeedType::I16 => Value::I16(integer_in_range(raw, index, sub, "a 16-bit integer")?),
            SeedType::I32 => Value::I32(integer_in_range(raw, index, sub, "a 32-bit integer")?),
            SeedType::F32 => {
                let value = raw.as_float().ok_or(ConfigError::InvalidValue {
                    index,
                    sub,
                    expected: "a float",
                })?;
                Value::F32(value as f32)
            }
            SeedType::String => {
                let value = raw.as_str().ok_or(ConfigError::InvalidValue {
                    index,
                    sub,
                    expected: "a string",
                })?;
                Value::VisibleString(value.to_string())
            }
        };
        Ok(Some(value))
    }
}

/// Configuration of one slave node
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// The node's ID (1..=127)
    pub id: u8,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Number of TPDOs the device produces (received by the master)
    #[serde(default)]
    pub nr_of_tx_pdo: u8,
    /// Number of RPDOs the device consumes (transmitted by the master)
    #[serde(default)]
    pub nr_of_rx_pdo: u8,
    /// Expected vendor ID from the identity object, 0 when unchecked
    #[serde(default)]
    pub vendor_id: u32,
    /// Expected product code from the identity object, 0 when unchecked
    #[serde(default)]
    pub product_code: u32,
    /// Dictionary entry seeds
    #[serde(default)]
    pub objects: Vec<ObjectSeed>,
}

impl NodeConfig {
    /// The validated node ID
    pub fn node_id(&self) -> Result<NodeId, ConfigError> {
        NodeId::new(self.id).context(InvalidNodeIdSnafu { id: self.id })
    }

    /// Build the node's object dictionary from the seeds
    pub fn build_dict(&self) -> Result<ObjectDict, ConfigError> {
        let mut dict = ObjectDict::new(DeviceInfo {
            nr_of_tx_pdo: self.nr_of_tx_pdo,
            nr_of_rx_pdo: self.nr_of_rx_pdo,
            vendor_id: self.vendor_id,
            product_code: self.product_code,
        });
        for seed in &self.objects {
            dict.insert(DictEntry {
                key: ObjectKey::new(seed.index, seed.sub),
                desc: seed.desc.clone(),
                data_type: seed.ty.into(),
                init_val: seed.init_val()?,
                node_id_offset: seed.node_id_offset,
            });
        }
        Ok(dict)
    }
}

/// The full master configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    /// Bus-wide settings
    pub bus: BusConfig,
    /// The nodes on the fieldbus
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl MasterConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<MasterConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<MasterConfig, ConfigError> {
        let config: MasterConfig = toml::from_str(s).context(TomlParsingSnafu)?;
        let mut seen = HashSet::new();
        for node in &config.nodes {
            node.node_id()?;
            if !seen.insert(node.id) {
                return DuplicateNodeIdSnafu { id: node.id }.fail();
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_config_parse() {
        let str = r#"
        [bus]
        device = "vcan0"
        sync_interval = 1
        heartbeat_interval = 100

        [[nodes]]
        id = 5
        name = "drive"
        nr_of_tx_pdo = 1

        [[nodes.objects]]
        index = 0x1800
        sub = 1
        type = "u32"
        value = 0x180
        node_id_offset = true
        desc = "TPDO1 COB-ID"

        [[nodes.objects]]
        index = 0x2000
        sub = 1
        type = "u16"
        desc = "speed"
        "#;

        let config = MasterConfig::load_from_str(str).unwrap();
        assert_eq!(config.bus.device, "vcan0");
        assert_eq!(config.bus.master_node_id, 127);
        assert_eq!(config.nodes.len(), 1);

        let dict = config.nodes[0].build_dict().unwrap();
        assert_eq!(dict.device_info.nr_of_tx_pdo, 1);
        assert_eq!(dict.device_info.nr_of_rx_pdo, 0);
        let cob = dict.get(0x1800, 1).unwrap();
        assert_eq!(cob.init_val, Some(Value::U32(0x180)));
        assert!(cob.node_id_offset);
        // Type-only seed: entry exists with no init value
        assert!(dict.get(0x2000, 1).unwrap().init_val.is_none());
    }

    #[test]
    fn test_out_of_range_value() {
        let str = r#"
        [bus]
        device = "vcan0"

        [[nodes]]
        id = 1

        [[nodes.objects]]
        index = 0x2000
        sub = 0
        type = "u8"
        value = 256
        "#;

        let config = MasterConfig::load_from_str(str).unwrap();
        let result = config.nodes[0].build_dict();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let str = r#"
        [bus]
        device = "vcan0"

        [[nodes]]
        id = 3

        [[nodes]]
        id = 3
        "#;

        assert!(matches!(
            MasterConfig::load_from_str(str),
            Err(ConfigError::DuplicateNodeId { id: 3 })
        ));
    }

    #[test]
    fn test_invalid_node_id_rejected() {
        let str = r#"
        [bus]
        device = "vcan0"

        [[nodes]]
        id = 0
        "#;

        assert!(matches!(
            MasterConfig::load_from_str(str),
            Err(ConfigError::InvalidNodeId { id: 0, .. })
        ));
    }
}
