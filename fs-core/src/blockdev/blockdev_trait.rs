//! Block device trait definitions for WalFS

use std::io;
use thiserror::Error;

/// Block size in bytes (4KB). Shared by the log header and every log slot.
pub const BLOCK_SIZE: usize = 4096;

/// Error type for block device operations
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    /// Operating system I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Block number past the end of the device
    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(u64),
    /// Buffer is not exactly one block
    #[error("Invalid block size: {0} (expected {BLOCK_SIZE})")]
    InvalidBlockSize(usize),
    /// Write to a device opened read-only
    #[error("Device is read-only")]
    ReadOnly,
    /// I/O after `close`
    #[error("Device is already closed")]
    DeviceClosed,
    /// Simulated power cut of a [`super::MemoryBlockDevice`]
    #[error("Write to block {0} lost: device powered off")]
    PowerLoss(u64),
}

/// Result type for block device operations
pub type Result<T> = std::result::Result<T, BlockDeviceError>;

/// Trait for block device operations
///
/// Writes are whole-block and synchronous from the caller's point of view:
/// once `write_block` returns `Ok`, a later `read_block` of the same block
/// observes the data, and `sync` makes everything written so far durable.
#[async_trait::async_trait]
pub trait BlockDevice: Send + Sync + 'static {
    /// Read a block from the device
    async fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<()>;

    /// Write a block to the device
    async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()>;

    /// Get the total number of blocks in the device
    fn block_count(&self) -> u64;

    /// Get the block size in bytes
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Sync any pending writes to the device
    async fn sync(&self) -> Result<()>;

    /// Close the device
    async fn close(&mut self) -> Result<()>;

    /// Check if the device is read-only
    fn is_read_only(&self) -> bool {
        false
    }
}

/// Reject out-of-range block numbers and wrongly sized buffers.
pub(crate) fn check_io(block_num: u64, block_count: u64, len: usize) -> Result<()> {
    if block_num >= block_count {
        return Err(BlockDeviceError::InvalidBlockNumber(block_num));
    }
    if len != BLOCK_SIZE {
        return Err(BlockDeviceError::InvalidBlockSize(len));
    }
    Ok(())
}
