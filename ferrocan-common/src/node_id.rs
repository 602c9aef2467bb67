//! Node ID newtype
//!

use snafu::Snafu;

/// A validated CANopen node ID (1..=127)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

/// Error for converting a u8 to a [NodeId]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Node ID must be in range 1..=127"))]
pub struct InvalidNodeIdError;

impl NodeId {
    /// Try to create a new NodeId
    ///
    /// Fails if value is outside 1..=127.
    pub fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if (1..=127).contains(&value) {
            Ok(NodeId(value))
        } else {
            Err(InvalidNodeIdError)
        }
    }

    /// Get the raw node ID as a u8
    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(128).is_err());
        assert_eq!(NodeId::new(127).unwrap().raw(), 127);
    }
}
