//! High-level store interface.
//!
//! A `Store` owns one block device holding one tree. Opening a device whose
//! block 0 is not a valid superblock initializes a fresh, empty store there.

use std::fmt::Write as _;
use std::path::Path;

use crate::storage::block::{BlockId, SUPERBLOCK_ID};
use crate::storage::btree::{
    BTree, InsertOutcome, Key, LevelEntry, RemoveOutcome, SearchResult, TreeStats, Violation,
};
use crate::storage::device::{BlockDevice, FileDevice};
use crate::storage::error::StoreError;
use crate::storage::pager::Pager;
use crate::storage::superblock::{MAX_TRACKED_BLOCKS, Superblock};

/// Tunables for opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Blocks added each time the store runs out of space. Also the size of
    /// a freshly initialized store.
    pub growth_blocks: u64,
    /// Number of decoded nodes kept in memory.
    pub cache_nodes: usize,
}

impl StoreOptions {
    pub const DEFAULT_GROWTH_BLOCKS: u64 = 1024;
    pub const DEFAULT_CACHE_NODES: usize = 256;
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            growth_blocks: Self::DEFAULT_GROWTH_BLOCKS,
            cache_nodes: Self::DEFAULT_CACHE_NODES,
        }
    }
}

/// A persistent set of `i64` keys.
///
/// Every operation takes `&mut self`; a store has exactly one user at a time.
/// See [`StoreHandle`](crate::storage::StoreHandle) for sharing one across tasks.
pub struct Store<D: BlockDevice = FileDevice> {
    pager: Pager<D>,
}

impl Store<FileDevice> {
    /// Open the store file at `path`, creating it if it doesn't exist.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        let device = FileDevice::open_or_create(path)?;
        tracing::info!(path = %path.display(), "opening store file");
        Self::with_device(device, options)
    }
}

impl<D: BlockDevice> Store<D> {
    /// Open a store on an arbitrary device.
    ///
    /// If block 0 does not hold a valid superblock, the device is resized to
    /// `growth_blocks` blocks and an empty tree is written to it.
    pub fn with_device(mut device: D, options: StoreOptions) -> Result<Self, StoreError> {
        let existing = if device.block_count() > 0 {
            let block = device.read_block(SUPERBLOCK_ID)?;
            match Superblock::from_block(&block) {
                Ok(superblock) => Some(superblock),
                Err(e) => {
                    tracing::warn!(error = %e, "superblock is invalid, initializing a fresh store");
                    None
                }
            }
        } else {
            None
        };

        let pager = match existing {
            Some(superblock) => {
                let total_blocks = superblock.total_blocks();
                if device.block_count() < total_blocks {
                    // Torn growth: the bitmap was persisted before the resize finished
                    device.set_block_count(total_blocks)?;
                }
                tracing::info!(
                    root = ?superblock.root_block,
                    total_blocks,
                    allocated = superblock.allocator.allocated_count(),
                    "opened existing store"
                );
                Pager::new(device, superblock, options.growth_blocks, options.cache_nodes)
            }
            None => {
                let total_blocks = options.growth_blocks.clamp(2, MAX_TRACKED_BLOCKS);
                device.set_block_count(total_blocks)?;

                let mut pager = Pager::new(
                    device,
                    Superblock::new(total_blocks),
                    options.growth_blocks,
                    options.cache_nodes,
                );
                pager.persist_superblock()?;
                pager.sync()?;
                tracing::info!(total_blocks, "created new store");
                pager
            }
        };

        Ok(Self { pager })
    }

    fn tree(&mut self) -> BTree<'_, D> {
        BTree::new(&mut self.pager)
    }

    /// Add a key. Inserting a key that is already present changes nothing.
    pub fn insert(&mut self, key: Key) -> Result<InsertOutcome, StoreError> {
        self.tree().insert(key)
    }

    /// Remove a key. Removing an absent key changes nothing.
    pub fn remove(&mut self, key: Key) -> Result<RemoveOutcome, StoreError> {
        self.tree().remove(key)
    }

    pub fn search(&mut self, key: Key) -> Result<SearchResult, StoreError> {
        self.tree().search(key)
    }

    pub fn contains(&mut self, key: Key) -> Result<bool, StoreError> {
        Ok(self.search(key)?.found)
    }

    /// All keys in ascending order.
    pub fn keys(&mut self) -> Result<Vec<Key>, StoreError> {
        self.tree().keys()
    }

    /// Nodes grouped by depth, root first.
    pub fn levels(&mut self) -> Result<Vec<Vec<LevelEntry>>, StoreError> {
        self.tree().levels()
    }

    /// Breadth-first dump, one line per level: `level N: block:[keys] ...`.
    pub fn render_levels(&mut self) -> Result<String, StoreError> {
        let mut out = String::new();
        for (depth, level) in self.levels()?.iter().enumerate() {
            let _ = write!(out, "level {depth}:");
            for entry in level {
                let _ = write!(out, " {}:{:?}", entry.block_id, entry.keys);
            }
            out.push('\n');
        }
        Ok(out)
    }

    pub fn stats(&mut self) -> Result<TreeStats, StoreError> {
        self.tree().stats()
    }

    /// Check the tree and the bitmap, returning every problem found.
    pub fn verify(&mut self) -> Result<Vec<Violation>, StoreError> {
        self.tree().verify()
    }

    #[must_use]
    pub const fn root(&self) -> Option<BlockId> {
        self.pager.root()
    }

    #[must_use]
    pub const fn total_blocks(&self) -> u64 {
        self.pager.superblock().total_blocks()
    }

    #[must_use]
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        self.pager.is_allocated(block_id)
    }

    /// Persist the superblock and flush the device.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.pager.persist_superblock()?;
        self.pager.sync()
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), StoreError> {
        self.into_device().map(drop)
    }

    /// Flush the store and hand back its device.
    pub fn into_device(mut self) -> Result<D, StoreError> {
        self.sync()?;
        tracing::info!(
            root = ?self.pager.root(),
            total_blocks = self.total_blocks(),
            "closed store"
        );
        Ok(self.pager.into_device())
    }
}
