//! In-memory block device with fault injection.
//!
//! Supports deterministic testing of the engine's I/O failure paths:
//! - Block-level read errors
//! - Block-level write errors
//! - Sync failures
//!
//! All randomness comes from a seeded RNG, so a given seed always produces
//! the same sequence of faults.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::block::{Block, BlockId};
use crate::storage::device::{BlockDevice, DeviceError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Every write fails.
    #[must_use]
    pub const fn failing_writes() -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: 1.0,
            sync_error_rate: 0.0,
        }
    }
}

/// Statistics about device operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryDeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub syncs: u64,
    pub injected_faults: u64,
}

/// Block storage held entirely in memory.
///
/// Blocks that were never written read back as zeroes, like a sparse file.
pub struct MemoryDevice {
    blocks: HashMap<BlockId, Block>,
    block_count: u64,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryDeviceStats,
}

impl MemoryDevice {
    /// Create an empty device with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, FaultConfig::no_faults())
    }

    /// Create an empty device with the given fault configuration.
    #[must_use]
    pub fn with_faults(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            block_count: 0,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryDeviceStats::default(),
        }
    }

    /// Replace the fault configuration.
    pub const fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    #[must_use]
    pub const fn stats(&self) -> &MemoryDeviceStats {
        &self.stats
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let inject = self.rng.random::<f64>() < rate;
        if inject {
            self.stats.injected_faults += 1;
        }
        inject
    }

    const fn check_bounds(&self, block_id: BlockId) -> Result<(), DeviceError> {
        if block_id >= self.block_count {
            return Err(DeviceError::BlockOutOfBounds {
                block_id,
                total_blocks: self.block_count,
            });
        }
        Ok(())
    }
}

impl BlockDevice for MemoryDevice {
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, DeviceError> {
        self.stats.reads += 1;
        self.check_bounds(block_id)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            return Err(DeviceError::InjectedFault(format!(
                "simulated read error on block {block_id}"
            )));
        }

        Ok(self.blocks.get(&block_id).cloned().unwrap_or_default())
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), DeviceError> {
        self.stats.writes += 1;
        self.check_bounds(block_id)?;

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            return Err(DeviceError::InjectedFault(format!(
                "simulated write error on block {block_id}"
            )));
        }

        self.blocks.insert(block_id, block.clone());
        Ok(())
    }

    fn set_block_count(&mut self, count: u64) -> Result<(), DeviceError> {
        self.blocks.retain(|&id, _| id < count);
        self.block_count = count;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            return Err(DeviceError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_blocks_read_as_zero() {
        let mut device = MemoryDevice::new(1);
        device.set_block_count(3).expect("resize");

        let block = device.read_block(2).expect("read");
        assert_eq!(block, Block::new());
    }

    #[test]
    fn test_write_then_read() {
        let mut device = MemoryDevice::new(1);
        device.set_block_count(3).expect("resize");

        let mut block = Block::new();
        block.write_u64(8, 77);
        device.write_block(1, &block).expect("write");

        assert_eq!(device.read_block(1).expect("read").read_u64(8), 77);
        assert_eq!(device.stats().writes, 1);
        assert_eq!(device.stats().reads, 1);
    }

    #[test]
    fn test_shrinking_drops_blocks() {
        let mut device = MemoryDevice::new(1);
        device.set_block_count(4).expect("resize");
        let mut block = Block::new();
        block.write_u8(0, 9);
        device.write_block(3, &block).expect("write");

        device.set_block_count(2).expect("shrink");
        device.set_block_count(4).expect("grow");
        assert_eq!(device.read_block(3).expect("read"), Block::new());
    }

    #[test]
    fn test_failing_writes() {
        let mut device = MemoryDevice::with_faults(7, FaultConfig::failing_writes());
        device.set_block_count(2).expect("resize");

        let result = device.write_block(1, &Block::new());
        assert!(matches!(result, Err(DeviceError::InjectedFault(_))));
        assert_eq!(device.stats().injected_faults, 1);

        device.set_fault_config(FaultConfig::no_faults());
        device.write_block(1, &Block::new()).expect("write after faults cleared");
    }

    #[test]
    fn test_fault_injection_is_deterministic() {
        let config = FaultConfig {
            read_error_rate: 0.5,
            write_error_rate: 0.0,
            sync_error_rate: 0.0,
        };

        let run = |seed| {
            let mut device = MemoryDevice::with_faults(seed, config);
            device.set_block_count(1).expect("resize");
            (0..32)
                .map(|_| device.read_block(0).is_ok())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(42), run(42));
    }
}
