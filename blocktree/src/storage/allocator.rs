//! Block allocator using a bitmap to track free/used blocks.
//!
//! The bitmap is persisted inside the superblock (block 0).
//! Each bit represents one block: 0 = free, 1 = used. Bit 0 is always set.

// Block IDs are u64 but bitmap indices are usize. On 64-bit systems these are the same size,
// and the bitmap is bounded by what fits in one block anyway.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BlockId, SUPERBLOCK_ID};

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// Number of bitmap bytes needed to track `total_blocks` blocks.
#[must_use]
pub const fn bitmap_len(total_blocks: u64) -> usize {
    (total_blocks as usize).div_ceil(BITS_PER_BYTE)
}

/// A block allocation bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAllocator {
    /// The bitmap data.
    bitmap: Vec<u8>,
    /// Total number of blocks being tracked.
    total_blocks: u64,
    /// Number of free blocks.
    free_count: u64,
}

impl BlockAllocator {
    /// Create an allocator for a fresh store.
    ///
    /// Only the superblock is marked as used.
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        let total_blocks = total_blocks.max(1);
        let mut bitmap = vec![0u8; bitmap_len(total_blocks)];
        set_bit(&mut bitmap, SUPERBLOCK_ID as usize);

        Self {
            bitmap,
            total_blocks,
            free_count: total_blocks - 1,
        }
    }

    /// Rebuild an allocator from persisted bitmap bytes.
    ///
    /// Bits beyond `total_blocks` are ignored and bit 0 is forced on.
    #[must_use]
    pub fn from_bitmap(bytes: &[u8], total_blocks: u64) -> Self {
        let total_blocks = total_blocks.max(1);
        let mut bitmap = vec![0u8; bitmap_len(total_blocks)];
        let copy_len = bitmap.len().min(bytes.len());
        bitmap[..copy_len].copy_from_slice(&bytes[..copy_len]);

        let tail_bits = (total_blocks as usize) % BITS_PER_BYTE;
        if tail_bits != 0 {
            if let Some(last) = bitmap.last_mut() {
                *last &= (1u8 << tail_bits) - 1;
            }
        }
        set_bit(&mut bitmap, SUPERBLOCK_ID as usize);

        let used_count: u64 = bitmap.iter().map(|b| u64::from(b.count_ones())).sum();

        Self {
            bitmap,
            total_blocks,
            free_count: total_blocks - used_count,
        }
    }

    /// The raw bitmap bytes, for persisting.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bitmap
    }

    /// Find the lowest free block, scanning from block 1 upward.
    ///
    /// Returns `None` if every tracked block is in use.
    #[must_use]
    pub fn find_free_block(&self) -> Option<BlockId> {
        if self.free_count == 0 {
            return None;
        }
        (1..self.total_blocks).find(|&block_id| !get_bit(&self.bitmap, block_id as usize))
    }

    /// Mark a block as used.
    ///
    /// Returns `false` if the block was already used or is out of range.
    pub fn mark_allocated(&mut self, block_id: BlockId) -> bool {
        if block_id >= self.total_blocks || get_bit(&self.bitmap, block_id as usize) {
            return false;
        }
        set_bit(&mut self.bitmap, block_id as usize);
        self.free_count -= 1;
        true
    }

    /// Mark a block as free.
    ///
    /// The superblock can never be released. Returns `false` if nothing changed.
    pub fn release(&mut self, block_id: BlockId) -> bool {
        if block_id == SUPERBLOCK_ID
            || block_id >= self.total_blocks
            || !get_bit(&self.bitmap, block_id as usize)
        {
            return false;
        }
        clear_bit(&mut self.bitmap, block_id as usize);
        self.free_count += 1;
        true
    }

    /// Check if a block is allocated.
    #[must_use]
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        if block_id >= self.total_blocks {
            return false;
        }
        get_bit(&self.bitmap, block_id as usize)
    }

    /// Iterate over every allocated block, including the superblock.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.total_blocks).filter(|&block_id| get_bit(&self.bitmap, block_id as usize))
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the number of used blocks, including the superblock.
    #[must_use]
    pub const fn allocated_count(&self) -> u64 {
        self.total_blocks - self.free_count
    }

    /// Get the total number of blocks being tracked.
    #[must_use]
    pub const fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Expand the allocator to track more blocks.
    ///
    /// The new blocks are marked as free.
    pub fn grow(&mut self, new_total_blocks: u64) {
        if new_total_blocks <= self.total_blocks {
            return;
        }

        self.bitmap.resize(bitmap_len(new_total_blocks), 0);
        self.free_count += new_total_blocks - self.total_blocks;
        self.total_blocks = new_total_blocks;
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}
