//! Core of a CANopen master: a layered lifecycle engine and the PDO mapping subsystem that
//! together drive a fieldbus of slave nodes over a CAN transport.
//!
//! The crate provides:
//!
//! - The [Layer](layer::Layer) lifecycle contract with [LayerStack](layer::LayerStack) and
//!   [LayerGroup](layer::LayerGroup) composition, driving `init / read / write / pending /
//!   diag / recover / halt / shutdown` across the stack with strict forward/reverse ordering.
//! - The [PdoMapper](pdo::PdoMapper), which parses PDO descriptors out of a node's object
//!   dictionary, (re)programs them on the device, and moves process data between typed
//!   [ObjectStorage](storage::ObjectStorage) entries and raw CAN frames.
//! - The [Master](master::Master) facade assembling a full stack from a TOML
//!   [MasterConfig](config::MasterConfig) and exposing the supervisory commands.
//!
//! The CAN transport is abstracted behind
//! [CanInterface](ferrocan_common::traits::CanInterface); a SocketCAN implementation is
//! available behind the `socketcan` feature.
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod can_layer;
pub mod config;
pub mod dictionary;
pub mod emcy;
pub mod heartbeat;
pub mod layer;
pub mod master;
pub mod node;
pub mod pdo;
pub mod status;
pub mod storage;
pub mod sync_layer;

pub use ferrocan_common as common;

pub use config::MasterConfig;
pub use layer::{Layer, LayerGroup, LayerGroupNoDiag, LayerStack};
pub use master::{CommandError, Master};
pub use pdo::PdoMapper;
pub use status::{LayerReport, LayerStatus, Severity};
pub use storage::ObjectStorage;
