//! Block device abstraction and the file-backed implementation.
//!
//! The `BlockDevice` trait is the minimal surface the engine needs from its
//! backing store: whole-block reads and writes, resizing, and sync. The real
//! engine runs on `FileDevice`; tests can swap in
//! [`MemoryDevice`](crate::storage::MemoryDevice) to inject faults.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::block::{BLOCK_SIZE_U64, Block, BlockId};

/// Whole-block storage backing a store.
///
/// Every write is a full overwrite of one block at `block_id * BLOCK_SIZE`.
/// There are no partial writes.
pub trait BlockDevice {
    /// Read one block.
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, DeviceError>;

    /// Overwrite one block.
    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), DeviceError>;

    /// Resize the device to hold exactly `count` blocks.
    fn set_block_count(&mut self, count: u64) -> Result<(), DeviceError>;

    /// Number of blocks the device currently holds.
    fn block_count(&self) -> u64;

    /// Flush all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), DeviceError>;
}

/// A block device backed by a single file.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    block_count: u64,
}

impl FileDevice {
    /// Open the file at `path`, creating an empty one if it doesn't exist.
    ///
    /// A trailing partial block (from a torn resize) is ignored.
    pub fn open_or_create(path: &Path) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(DeviceError::Io)?;

        let len = file.metadata().map_err(DeviceError::Io)?.len();

        Ok(Self {
            file,
            block_count: len / BLOCK_SIZE_U64,
        })
    }

    fn check_bounds(&self, block_id: BlockId) -> Result<(), DeviceError> {
        if block_id >= self.block_count {
            return Err(DeviceError::BlockOutOfBounds {
                block_id,
                total_blocks: self.block_count,
            });
        }
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, DeviceError> {
        self.check_bounds(block_id)?;

        let mut block = Block::new();
        self.file
            .seek(SeekFrom::Start(block_id * BLOCK_SIZE_U64))
            .map_err(DeviceError::Io)?;
        self.file
            .read_exact(block.as_bytes_mut())
            .map_err(DeviceError::Io)?;

        Ok(block)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), DeviceError> {
        self.check_bounds(block_id)?;

        self.file
            .seek(SeekFrom::Start(block_id * BLOCK_SIZE_U64))
            .map_err(DeviceError::Io)?;
        self.file
            .write_all(block.as_bytes())
            .map_err(DeviceError::Io)?;

        Ok(())
    }

    fn set_block_count(&mut self, count: u64) -> Result<(), DeviceError> {
        self.file
            .set_len(count * BLOCK_SIZE_U64)
            .map_err(DeviceError::Io)?;
        self.block_count = count;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        self.file.sync_all().map_err(DeviceError::Io)
    }
}

/// Errors that can occur during block device operations.
#[derive(Debug)]
pub enum DeviceError {
    /// I/O error, including short reads and writes.
    Io(std::io::Error),
    /// Block ID out of bounds.
    BlockOutOfBounds { block_id: BlockId, total_blocks: u64 },
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfBounds {
                block_id,
                total_blocks,
            } => write!(
                f,
                "block {block_id} out of bounds (total blocks: {total_blocks})"
            ),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BlockOutOfBounds { .. } | Self::InjectedFault(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_file_is_empty() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");

        let device = FileDevice::open_or_create(&path).expect("open device");
        assert_eq!(device.block_count(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_write_and_read_block() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");

        let mut device = FileDevice::open_or_create(&path).expect("open device");
        device.set_block_count(4).expect("resize");

        let mut block = Block::new();
        block.write_bytes(0, b"hello world");
        device.write_block(3, &block).expect("write block");

        let read = device.read_block(3).expect("read block");
        assert_eq!(read.read_bytes(0, 11), b"hello world");
    }

    #[test]
    fn test_block_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");

        let mut device = FileDevice::open_or_create(&path).expect("open device");
        device.set_block_count(2).expect("resize");

        let result = device.read_block(2);
        assert!(matches!(
            result,
            Err(DeviceError::BlockOutOfBounds {
                block_id: 2,
                total_blocks: 2
            })
        ));
        assert!(device.write_block(7, &Block::new()).is_err());
    }

    #[test]
    fn test_block_count_survives_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");

        {
            let mut device = FileDevice::open_or_create(&path).expect("open device");
            device.set_block_count(5).expect("resize");
            let mut block = Block::new();
            block.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
            device.write_block(1, &block).expect("write");
            device.sync().expect("sync");
        }

        let mut device = FileDevice::open_or_create(&path).expect("reopen device");
        assert_eq!(device.block_count(), 5);
        let block = device.read_block(1).expect("read");
        assert_eq!(block.read_u64(100), 0xDEAD_BEEF_CAFE_BABE);
    }
}
