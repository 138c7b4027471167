//! B-tree node type and its block codec.
//!
//! Every node occupies exactly one block with a fixed layout:
//! - `is_leaf`: 1 byte (0 = internal, 1 = leaf)
//! - reserved: 1 byte
//! - `key_count`: 2 bytes
//! - reserved: 4 bytes
//! - `disk_index`: 8 bytes (self-reference, informational only)
//! - `keys`: `MAX_KEYS` x 8 bytes (slots past `key_count` are zero)
//! - `children`: (`MAX_KEYS` + 1) x 8 bytes (unused slots hold `ABSENT_CHILD`)
//!
//! The rest of the block is padding.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BLOCK_SIZE, Block, BlockId};

/// Minimum degree `t`: every non-root node holds between `t - 1` and `2t - 1` keys.
pub const MIN_DEGREE: usize = 3;

/// Maximum number of keys in a node.
pub const MAX_KEYS: usize = 2 * MIN_DEGREE - 1;

/// Minimum number of keys in a non-root node.
pub const MIN_KEYS: usize = MIN_DEGREE - 1;

/// Maximum number of children of an internal node.
pub const MAX_CHILDREN: usize = MAX_KEYS + 1;

/// Tree keys. Every `i64` is a valid key; slot occupancy is tracked by length.
pub type Key = i64;

/// Marker for an unused child slot on disk.
pub const ABSENT_CHILD: u64 = u64::MAX;

mod offsets {
    use super::MAX_KEYS;

    pub const IS_LEAF: usize = 0;
    pub const KEY_COUNT: usize = 2;
    pub const DISK_INDEX: usize = 8;
    pub const KEYS: usize = 16;
    pub const CHILDREN: usize = KEYS + MAX_KEYS * 8;
    pub const END: usize = CHILDREN + (MAX_KEYS + 1) * 8;
}

const _: () = assert!(offsets::END <= BLOCK_SIZE, "node layout must fit in one block");
const _: () = assert!(MIN_DEGREE >= 2, "minimum degree must be at least 2");

/// A B-tree node.
///
/// Children are referenced by block index only; loading a child always goes
/// through the pager, so there is no in-memory pointer graph to keep in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    /// Keys in strictly increasing order.
    pub keys: Vec<Key>,
    /// Child block indices. Empty for leaves, `keys.len() + 1` entries otherwise.
    pub children: Vec<BlockId>,
    /// The block this node occupies, once allocated.
    pub disk_index: Option<BlockId>,
}

impl Node {
    /// Create a new empty leaf with no block assigned.
    #[must_use]
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::with_capacity(MAX_KEYS),
            children: Vec::new(),
            disk_index: None,
        }
    }

    /// Create a new empty internal node with no block assigned.
    #[must_use]
    pub fn new_internal() -> Self {
        Self {
            is_leaf: false,
            keys: Vec::with_capacity(MAX_KEYS),
            children: Vec::with_capacity(MAX_CHILDREN),
            disk_index: None,
        }
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Check if the node holds `MAX_KEYS` keys.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }

    /// Check if the node can give up a key without dropping below `MIN_KEYS`.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn can_lend(&self) -> bool {
        self.keys.len() >= MIN_DEGREE
    }

    /// Index of the first key `>= key` (or `key_count` if none).
    ///
    /// For internal nodes this is also the child whose subtree may hold `key`.
    #[must_use]
    pub fn lower_bound(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Check if `keys[idx] == key`.
    #[must_use]
    pub fn has_key_at(&self, idx: usize, key: Key) -> bool {
        self.keys.get(idx) == Some(&key)
    }

    /// Serialize the node into a whole block.
    #[must_use]
    pub fn encode(&self) -> Block {
        let mut block = Block::new();

        block.write_u8(offsets::IS_LEAF, u8::from(self.is_leaf));
        block.write_u16(offsets::KEY_COUNT, self.keys.len() as u16);
        block.write_u64(offsets::DISK_INDEX, self.disk_index.unwrap_or(ABSENT_CHILD));

        for (i, &key) in self.keys.iter().enumerate() {
            block.write_i64(offsets::KEYS + i * 8, key);
        }

        for slot in 0..MAX_CHILDREN {
            let child = self.children.get(slot).copied().unwrap_or(ABSENT_CHILD);
            block.write_u64(offsets::CHILDREN + slot * 8, child);
        }

        block
    }

    /// Deserialize a node read from `block_id`.
    ///
    /// `block_id` is authoritative over the self-reference stored in the block.
    pub fn decode(block: &Block, block_id: BlockId) -> Result<Self, NodeError> {
        let is_leaf = match block.read_u8(offsets::IS_LEAF) {
            0 => false,
            1 => true,
            other => return Err(NodeError::InvalidLeafFlag { block_id, flag: other }),
        };

        let key_count = usize::from(block.read_u16(offsets::KEY_COUNT));
        if key_count > MAX_KEYS {
            return Err(NodeError::KeyCountOutOfRange {
                block_id,
                key_count,
            });
        }

        let keys = (0..key_count)
            .map(|i| block.read_i64(offsets::KEYS + i * 8))
            .collect();

        let children = if is_leaf {
            Vec::new()
        } else {
            let mut children = Vec::with_capacity(MAX_CHILDREN);
            for slot in 0..=key_count {
                let child = block.read_u64(offsets::CHILDREN + slot * 8);
                if child == ABSENT_CHILD {
                    return Err(NodeError::MissingChild { block_id, slot });
                }
                children.push(child);
            }
            children
        };

        let stored_index = block.read_u64(offsets::DISK_INDEX);
        if stored_index != block_id {
            tracing::debug!(block_id, stored_index, "node self-reference disagrees with its block");
        }

        Ok(Self {
            is_leaf,
            keys,
            children,
            disk_index: Some(block_id),
        })
    }
}

/// Errors that can occur when decoding a B-tree node.
#[derive(Debug)]
pub enum NodeError {
    /// The leaf flag is neither 0 nor 1.
    InvalidLeafFlag { block_id: BlockId, flag: u8 },
    /// More keys than a node can hold.
    KeyCountOutOfRange { block_id: BlockId, key_count: usize },
    /// An internal node is missing one of its `key_count + 1` children.
    MissingChild { block_id: BlockId, slot: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLeafFlag { block_id, flag } => {
                write!(f, "block {block_id}: invalid leaf flag 0x{flag:02x}")
            }
            Self::KeyCountOutOfRange {
                block_id,
                key_count,
            } => write!(
                f,
                "block {block_id}: key count {key_count} exceeds maximum {MAX_KEYS}"
            ),
            Self::MissingChild { block_id, slot } => {
                write!(f, "block {block_id}: child slot {slot} is empty")
            }
        }
    }
}

impl std::error::Error for NodeError {}
