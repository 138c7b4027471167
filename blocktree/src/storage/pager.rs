//! Node-level access to the block device.
//!
//! The pager owns the device and the superblock. It allocates and frees
//! node blocks through the bitmap, growing the device when the bitmap runs
//! out of free blocks, and keeps a write-through cache of decoded nodes
//! keyed by block index.
//!
//! # Invariants
//!
//! - The superblock is rewritten after every allocation, deallocation,
//!   growth step and root change.
//! - Every node write goes to the device before the call returns; the cache
//!   never holds state the device doesn't, so dropping it costs only re-reads.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::storage::block::{BlockId, SUPERBLOCK_ID};
use crate::storage::btree::Node;
use crate::storage::device::BlockDevice;
use crate::storage::error::StoreError;
use crate::storage::superblock::{MAX_TRACKED_BLOCKS, Superblock};

/// Allocates, frees, reads and writes node blocks.
pub struct Pager<D: BlockDevice> {
    device: D,
    superblock: Superblock,
    cache: LruCache<BlockId, Node>,
    growth_blocks: u64,
}

impl<D: BlockDevice> Pager<D> {
    /// Wrap a device whose block 0 already holds `superblock`.
    #[must_use]
    pub fn new(device: D, superblock: Superblock, growth_blocks: u64, cache_nodes: usize) -> Self {
        Self {
            device,
            superblock,
            cache: LruCache::new(NonZeroUsize::new(cache_nodes).unwrap_or(NonZeroUsize::MIN)),
            growth_blocks: growth_blocks.max(1),
        }
    }

    #[must_use]
    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// The root block, or `None` if the tree is empty.
    #[must_use]
    pub const fn root(&self) -> Option<BlockId> {
        self.superblock.root_block
    }

    /// Record a new root and persist the superblock.
    pub fn set_root(&mut self, root: Option<BlockId>) -> Result<(), StoreError> {
        tracing::debug!(old = ?self.superblock.root_block, new = ?root, "root changed");
        self.superblock.root_block = root;
        self.persist_superblock()
    }

    /// Check if a block is marked used in the bitmap.
    #[must_use]
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        self.superblock.allocator.is_allocated(block_id)
    }

    /// Load the node stored in `block_id`.
    pub fn load(&mut self, block_id: BlockId) -> Result<Node, StoreError> {
        if let Some(node) = self.cache.get(&block_id) {
            return Ok(node.clone());
        }

        if block_id == SUPERBLOCK_ID || !self.is_allocated(block_id) {
            return Err(StoreError::Corruption(format!(
                "block {block_id} is referenced as a node but is not an allocated node block"
            )));
        }

        let block = self.device.read_block(block_id)?;
        let node = Node::decode(&block, block_id)?;
        self.cache.put(block_id, node.clone());
        Ok(node)
    }

    /// Overwrite a node's block with its current contents.
    pub fn write(&mut self, node: &Node) -> Result<(), StoreError> {
        let block_id = node.disk_index.ok_or_else(|| {
            StoreError::Corruption("attempted to write a node with no block".to_string())
        })?;

        self.device.write_block(block_id, &node.encode())?;
        self.cache.put(block_id, node.clone());
        Ok(())
    }

    /// Give `node` a fresh block and write it there.
    ///
    /// Grows the store if no block is free. The bitmap update is persisted
    /// before the node content is written.
    pub fn allocate(&mut self, node: &mut Node) -> Result<BlockId, StoreError> {
        let block_id = match self.superblock.allocator.find_free_block() {
            Some(block_id) => block_id,
            None => {
                self.grow()?;
                self.superblock.allocator.find_free_block().ok_or(
                    StoreError::CapacityExceeded {
                        total_blocks: self.superblock.total_blocks(),
                    },
                )?
            }
        };

        self.superblock.allocator.mark_allocated(block_id);
        self.persist_superblock()?;

        node.disk_index = Some(block_id);
        self.write(node)?;

        tracing::trace!(block_id, is_leaf = node.is_leaf, "allocated node block");
        Ok(block_id)
    }

    /// Return a node block to the free pool.
    ///
    /// Refuses to free the superblock. Freeing an unallocated block is ignored.
    pub fn deallocate(&mut self, block_id: BlockId) -> Result<(), StoreError> {
        if block_id == SUPERBLOCK_ID {
            tracing::warn!("refusing to free the superblock");
            return Err(StoreError::ReservedBlock(block_id));
        }

        self.cache.pop(&block_id);
        if !self.superblock.allocator.release(block_id) {
            tracing::warn!(block_id, "ignoring free of unallocated block");
            return Ok(());
        }

        tracing::trace!(block_id, "freed node block");
        self.persist_superblock()
    }

    /// Add `growth_blocks` blocks to the store, up to what the bitmap can track.
    fn grow(&mut self) -> Result<(), StoreError> {
        let total_blocks = self.superblock.total_blocks();
        let new_total = total_blocks
            .saturating_add(self.growth_blocks)
            .min(MAX_TRACKED_BLOCKS);

        if new_total <= total_blocks {
            return Err(StoreError::CapacityExceeded { total_blocks });
        }

        if self.device.block_count() < new_total {
            self.device.set_block_count(new_total)?;
        }
        self.superblock.allocator.grow(new_total);
        self.persist_superblock()?;

        tracing::info!(from = total_blocks, to = new_total, "grew block store");
        Ok(())
    }

    /// Write the superblock to block 0.
    pub fn persist_superblock(&mut self) -> Result<(), StoreError> {
        self.device
            .write_block(SUPERBLOCK_ID, &self.superblock.to_block())?;
        Ok(())
    }

    /// Flush pending device writes.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.device.sync()?;
        Ok(())
    }

    /// Drop every cached node.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Give up the pager, returning the device.
    #[must_use]
    pub fn into_device(self) -> D {
        self.device
    }
}
