//! Superblock structure and serialization.
//!
//! The superblock occupies block 0 and records where the root node lives,
//! how many blocks the store tracks, and the allocation bitmap.

// BLOCK_SIZE and MIN_DEGREE are compile-time constants that fit in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::allocator::{BlockAllocator, bitmap_len};
use crate::storage::block::{BLOCK_SIZE, Block, BlockId, SUPERBLOCK_ID};
use crate::storage::btree::MIN_DEGREE;

/// Magic number identifying a blocktree file: "BLKTREE\0"
pub const MAGIC: [u8; 8] = *b"BLKTREE\0";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// On-disk value of `root_block` when the tree is empty.
pub const EMPTY_ROOT: u64 = u64::MAX;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const BLOCK_SIZE: usize = 12;
    pub const MIN_DEGREE: usize = 16;
    pub const CHECKSUM: usize = 20;
    pub const ROOT_BLOCK: usize = 24;
    pub const TOTAL_BLOCKS: usize = 32;
    pub const BITMAP: usize = 40;
}

/// Largest number of blocks the in-superblock bitmap can track.
pub const MAX_TRACKED_BLOCKS: u64 = ((BLOCK_SIZE - offsets::BITMAP) * 8) as u64;

/// The superblock contains all metadata about the store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Block holding the root node, or `None` when the tree is empty.
    pub root_block: Option<BlockId>,
    /// Free-space bitmap; also owns `total_blocks`.
    pub allocator: BlockAllocator,
}

impl Superblock {
    /// Create a superblock for a fresh, empty store.
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        Self {
            root_block: None,
            allocator: BlockAllocator::new(total_blocks.min(MAX_TRACKED_BLOCKS)),
        }
    }

    /// Total number of blocks tracked by the bitmap.
    #[must_use]
    pub const fn total_blocks(&self) -> u64 {
        self.allocator.total_blocks()
    }

    /// Serialize the superblock to a block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut block = Block::new();

        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        block.write_u32(offsets::BLOCK_SIZE, BLOCK_SIZE as u32);
        block.write_u32(offsets::MIN_DEGREE, MIN_DEGREE as u32);
        block.write_u64(offsets::ROOT_BLOCK, self.root_block.unwrap_or(EMPTY_ROOT));
        block.write_u64(offsets::TOTAL_BLOCKS, self.total_blocks());
        block.write_bytes(offsets::BITMAP, self.allocator.as_bytes());

        let checksum = block.checksum_excluding(offsets::CHECKSUM);
        block.write_u32(offsets::CHECKSUM, checksum);

        block
    }

    /// Deserialize and validate a superblock.
    pub fn from_block(block: &Block) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(block.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let format_version = block.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let block_size = block.read_u32(offsets::BLOCK_SIZE);
        if block_size != BLOCK_SIZE as u32 {
            return Err(SuperblockError::InvalidBlockSize(block_size));
        }

        let min_degree = block.read_u32(offsets::MIN_DEGREE);
        if min_degree != MIN_DEGREE as u32 {
            return Err(SuperblockError::DegreeMismatch(min_degree));
        }

        let stored = block.read_u32(offsets::CHECKSUM);
        let computed = block.checksum_excluding(offsets::CHECKSUM);
        if stored != computed {
            return Err(SuperblockError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let total_blocks = block.read_u64(offsets::TOTAL_BLOCKS);
        if total_blocks == 0 || total_blocks > MAX_TRACKED_BLOCKS {
            return Err(SuperblockError::BitmapTooLarge(total_blocks));
        }

        let bitmap = block.read_bytes(offsets::BITMAP, bitmap_len(total_blocks));
        let allocator = BlockAllocator::from_bitmap(bitmap, total_blocks);

        let root_block = match block.read_u64(offsets::ROOT_BLOCK) {
            EMPTY_ROOT => None,
            root if root != SUPERBLOCK_ID && allocator.is_allocated(root) => Some(root),
            root => return Err(SuperblockError::RootNotAllocated(root)),
        };

        Ok(Self {
            root_block,
            allocator,
        })
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Written with a different block size.
    InvalidBlockSize(u32),
    /// Written with a different minimum degree.
    DegreeMismatch(u32),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Block count is zero or exceeds what the bitmap can track.
    BitmapTooLarge(u64),
    /// The recorded root is not an allocated node block.
    RootNotAllocated(BlockId),
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidBlockSize(s) => write!(f, "invalid block size: {s}"),
            Self::DegreeMismatch(d) => {
                write!(f, "minimum degree mismatch: file has {d}, expected {MIN_DEGREE}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::BitmapTooLarge(n) => {
                write!(f, "invalid block count {n} (max {MAX_TRACKED_BLOCKS})")
            }
            Self::RootNotAllocated(b) => write!(f, "root block {b} is not allocated"),
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new(128);
        sb.allocator.mark_allocated(5);
        sb.allocator.mark_allocated(6);
        sb.root_block = Some(5);

        let restored = Superblock::from_block(&sb.to_block()).expect("should parse");

        assert_eq!(restored, sb);
        assert_eq!(restored.total_blocks(), 128);
        assert_eq!(restored.root_block, Some(5));
        assert!(restored.allocator.is_allocated(6));
        assert!(!restored.allocator.is_allocated(7));
    }

    #[test]
    fn test_empty_root_sentinel() {
        let sb = Superblock::new(16);
        let block = sb.to_block();
        assert_eq!(block.read_u64(offsets::ROOT_BLOCK), EMPTY_ROOT);

        let restored = Superblock::from_block(&block).expect("should parse");
        assert_eq!(restored.root_block, None);
    }

    #[test]
    fn test_new_clamps_to_bitmap_capacity() {
        let sb = Superblock::new(MAX_TRACKED_BLOCKS * 2);
        assert_eq!(sb.total_blocks(), MAX_TRACKED_BLOCKS);

        let restored = Superblock::from_block(&sb.to_block()).expect("should parse");
        assert_eq!(restored.total_blocks(), MAX_TRACKED_BLOCKS);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut block = Block::new();
        block.write_bytes(0, b"BADMAGIC");

        let result = Superblock::from_block(&block);
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_superblock_checksum_mismatch() {
        let mut block = Superblock::new(64).to_block();
        block.write_u8(offsets::BITMAP + 3, 0xFF);

        let result = Superblock::from_block(&block);
        assert!(matches!(
            result,
            Err(SuperblockError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_superblock_degree_mismatch() {
        let mut block = Superblock::new(64).to_block();
        block.write_u32(offsets::MIN_DEGREE, 7);

        let result = Superblock::from_block(&block);
        assert!(matches!(result, Err(SuperblockError::DegreeMismatch(7))));
    }

    #[test]
    fn test_superblock_unallocated_root() {
        let mut sb = Superblock::new(64);
        sb.root_block = Some(9);

        let result = Superblock::from_block(&sb.to_block());
        assert!(matches!(result, Err(SuperblockError::RootNotAllocated(9))));
    }
}
