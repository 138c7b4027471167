//! Persistent B-tree storage engine.
//!
//! A single file of fixed-size blocks holds one B-tree of `i64` keys.
//!
//! # File Format
//!
//! The store is a single file with 4KB blocks:
//!
//! - Block 0: Superblock (magic, version, root block, block count, and the
//!   allocation bitmap)
//! - Blocks 1-N: B-tree nodes, one per block, or free
//!
//! When every block is in use the file grows by a configurable number of
//! blocks. The bitmap lives entirely in block 0, which caps the file at
//! [`MAX_TRACKED_BLOCKS`] blocks.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use blocktree::storage::{Store, StoreOptions};
//!
//! let mut store = Store::open(Path::new("keys.db"), StoreOptions::default())?;
//! store.insert(42)?;
//! assert!(store.contains(42)?);
//! store.close()?;
//! # Ok::<(), blocktree::storage::StoreError>(())
//! ```

mod actor;
mod allocator;
mod block;
pub mod btree;
mod device;
mod error;
mod memory;
mod pager;
mod store;
mod superblock;

pub use actor::StoreHandle;
pub use allocator::BlockAllocator;
pub use block::{BLOCK_SIZE, Block, BlockId, SUPERBLOCK_ID};
pub use btree::{InsertOutcome, Key, LevelEntry, RemoveOutcome, SearchResult, TreeStats, Violation};
pub use device::{BlockDevice, DeviceError, FileDevice};
pub use error::StoreError;
pub use memory::{FaultConfig, MemoryDevice, MemoryDeviceStats};
pub use pager::Pager;
pub use store::{Store, StoreOptions};
pub use superblock::{MAX_TRACKED_BLOCKS, Superblock, SuperblockError};
