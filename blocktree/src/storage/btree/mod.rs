//! Disk-based B-tree over `i64` keys.
//!
//! # Structure
//!
//! Each node lives in its own block and refers to its children by block
//! index. With minimum degree `t`:
//! - every node except the root holds `t - 1 ..= 2t - 1` keys
//! - an internal node with `n` keys has `n + 1` children
//! - all leaves sit at the same depth
//!
//! # Usage
//!
//! ```
//! use blocktree::storage::btree::{BTree, InsertOutcome};
//! use blocktree::storage::{BlockDevice, MemoryDevice, Pager, Superblock};
//!
//! let mut device = MemoryDevice::new(0);
//! device.set_block_count(16).unwrap();
//! let mut pager = Pager::new(device, Superblock::new(16), 16, 8);
//! pager.persist_superblock().unwrap();
//!
//! let mut tree = BTree::new(&mut pager);
//! assert_eq!(tree.insert(7).unwrap(), InsertOutcome::Inserted);
//! assert!(tree.search(7).unwrap().found);
//! ```

mod node;
mod tree;
mod verify;

pub use node::{Key, MAX_CHILDREN, MAX_KEYS, MIN_DEGREE, MIN_KEYS, Node, NodeError};
pub use tree::{BTree, InsertOutcome, LevelEntry, RemoveOutcome, SearchResult, TreeStats};
pub use verify::Violation;
