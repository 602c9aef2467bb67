//! Common functionality shared among the ferrocan crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `ferrocan-master`.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod constants;
pub mod dispatch;
pub mod messages;
pub mod node_id;
pub mod traits;

#[cfg(feature = "socketcan")]
mod socketcan;

#[cfg(feature = "socketcan")]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::SocketCanInterface;

pub use messages::{CanFrame, CanId};
pub use node_id::NodeId;
