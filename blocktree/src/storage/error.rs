//! Engine-wide error type.

use crate::storage::block::BlockId;
use crate::storage::btree::NodeError;
use crate::storage::device::DeviceError;
use crate::storage::superblock::SuperblockError;

/// Errors that can occur during store operations.
///
/// Duplicate inserts and removals of absent keys are not errors; they are
/// reported through [`InsertOutcome`](crate::storage::InsertOutcome) and
/// [`RemoveOutcome`](crate::storage::RemoveOutcome).
#[derive(Debug)]
pub enum StoreError {
    /// Block device failure (short read/write, injected fault, bounds).
    Device(DeviceError),
    /// A node block could not be decoded.
    Node(NodeError),
    /// The superblock could not be decoded.
    Superblock(SuperblockError),
    /// The bitmap cannot track any more blocks.
    CapacityExceeded { total_blocks: u64 },
    /// Attempt to free the superblock.
    ReservedBlock(BlockId),
    /// The tree structure contradicts itself.
    Corruption(String),
    /// The store actor has shut down.
    ActorClosed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(e) => write!(f, "device error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::CapacityExceeded { total_blocks } => {
                write!(f, "store is full: bitmap cannot track more than {total_blocks} blocks")
            }
            Self::ReservedBlock(block_id) => write!(f, "block {block_id} is reserved"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::ActorClosed => write!(f, "store actor has shut down"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::CapacityExceeded { .. }
            | Self::ReservedBlock(_)
            | Self::Corruption(_)
            | Self::ActorClosed => None,
        }
    }
}

impl From<DeviceError> for StoreError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<NodeError> for StoreError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::CapacityExceeded { total_blocks: 8 }.to_string(),
            "store is full: bitmap cannot track more than 8 blocks"
        );
        assert_eq!(StoreError::ReservedBlock(0).to_string(), "block 0 is reserved");
    }

    #[test]
    fn test_device_error_source() {
        let err = StoreError::from(DeviceError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short read",
        )));
        assert!(err.to_string().contains("short read"));
        assert!(err.source().is_some());
    }
}
