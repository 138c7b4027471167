//! Structural consistency checks for a stored tree.
//!
//! Walks every reachable node and compares what it finds against the
//! allocation bitmap. Problems are collected rather than returned as
//! errors so a single pass reports everything wrong with a file.

use std::collections::HashSet;

use crate::storage::block::{BlockId, SUPERBLOCK_ID};
use crate::storage::btree::node::{Key, MAX_KEYS, MIN_KEYS};
use crate::storage::btree::tree::BTree;
use crate::storage::device::BlockDevice;
use crate::storage::error::StoreError;

/// A broken tree or allocation invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A non-root node outside `MIN_KEYS..=MAX_KEYS`, or an empty root.
    KeyCount {
        block_id: BlockId,
        key_count: usize,
        is_root: bool,
    },
    /// Keys within a node are not strictly increasing.
    Unordered { block_id: BlockId },
    /// A key outside the range its ancestors' separators allow.
    OutOfRange { block_id: BlockId, key: Key },
    /// An internal node without exactly `key_count + 1` children.
    ChildCount {
        block_id: BlockId,
        key_count: usize,
        child_count: usize,
    },
    /// Leaves at different depths.
    LeafDepth {
        block_id: BlockId,
        depth: usize,
        expected: usize,
    },
    /// A node reference to a free block, the superblock, or past the end.
    Unallocated { block_id: BlockId },
    /// A block reached through more than one parent.
    SharedBlock { block_id: BlockId },
    /// An allocated block that no node references.
    Leaked { block_id: BlockId },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyCount {
                block_id,
                key_count,
                is_root,
            } => {
                let role = if *is_root { "root" } else { "node" };
                write!(f, "{role} {block_id} holds {key_count} keys")
            }
            Self::Unordered { block_id } => write!(f, "node {block_id} has unordered keys"),
            Self::OutOfRange { block_id, key } => {
                write!(f, "node {block_id}: key {key} violates separator bounds")
            }
            Self::ChildCount {
                block_id,
                key_count,
                child_count,
            } => write!(
                f,
                "node {block_id}: {key_count} keys but {child_count} children"
            ),
            Self::LeafDepth {
                block_id,
                depth,
                expected,
            } => write!(f, "leaf {block_id} at depth {depth}, expected {expected}"),
            Self::Unallocated { block_id } => {
                write!(f, "block {block_id} is referenced but not allocated")
            }
            Self::SharedBlock { block_id } => {
                write!(f, "block {block_id} is referenced more than once")
            }
            Self::Leaked { block_id } => {
                write!(f, "block {block_id} is allocated but unreachable")
            }
        }
    }
}

/// A node waiting to be checked, with the open key range it must respect.
struct Pending {
    block_id: BlockId,
    depth: usize,
    low: Option<Key>,
    high: Option<Key>,
}

impl<D: BlockDevice> BTree<'_, D> {
    /// Check every structural invariant, returning all violations found.
    ///
    /// Errors are reserved for blocks that cannot be read or decoded.
    pub fn verify(&mut self) -> Result<Vec<Violation>, StoreError> {
        let mut violations = Vec::new();
        let mut reachable = HashSet::new();
        let mut leaf_depth = None;

        let root = self.pager.root();
        let mut stack: Vec<Pending> = root
            .map(|block_id| Pending {
                block_id,
                depth: 0,
                low: None,
                high: None,
            })
            .into_iter()
            .collect();

        while let Some(pending) = stack.pop() {
            let block_id = pending.block_id;

            if block_id == SUPERBLOCK_ID || !self.pager.is_allocated(block_id) {
                violations.push(Violation::Unallocated { block_id });
                continue;
            }
            if !reachable.insert(block_id) {
                violations.push(Violation::SharedBlock { block_id });
                continue;
            }

            let node = self.pager.load(block_id)?;
            let key_count = node.keys.len();
            let is_root = root == Some(block_id);

            let too_few = if is_root {
                key_count == 0
            } else {
                key_count < MIN_KEYS
            };
            if too_few || key_count > MAX_KEYS {
                violations.push(Violation::KeyCount {
                    block_id,
                    key_count,
                    is_root,
                });
            }

            if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                violations.push(Violation::Unordered { block_id });
            }

            for &key in &node.keys {
                let above_low = pending.low.is_none_or(|low| key > low);
                let below_high = pending.high.is_none_or(|high| key < high);
                if !(above_low && below_high) {
                    violations.push(Violation::OutOfRange { block_id, key });
                }
            }

            if node.is_leaf {
                match leaf_depth {
                    None => leaf_depth = Some(pending.depth),
                    Some(expected) if expected != pending.depth => {
                        violations.push(Violation::LeafDepth {
                            block_id,
                            depth: pending.depth,
                            expected,
                        });
                    }
                    Some(_) => {}
                }
                continue;
            }

            if node.children.len() != key_count + 1 {
                violations.push(Violation::ChildCount {
                    block_id,
                    key_count,
                    child_count: node.children.len(),
                });
            }

            for (i, &child) in node.children.iter().enumerate() {
                let low = match i.checked_sub(1) {
                    Some(prev) => node.keys.get(prev).copied(),
                    None => pending.low,
                };
                let high = node.keys.get(i).copied().or(pending.high);
                stack.push(Pending {
                    block_id: child,
                    depth: pending.depth + 1,
                    low,
                    high,
                });
            }
        }

        violations.extend(
            self.pager
                .superblock()
                .allocator
                .allocated_blocks()
                .filter(|&block_id| block_id != SUPERBLOCK_ID && !reachable.contains(&block_id))
                .map(|block_id| Violation::Leaked { block_id }),
        );

        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "tree verification found violations");
        }
        Ok(violations)
    }
}
