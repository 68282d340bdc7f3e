//! In-memory block device with simulated power loss

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{check_io, BlockDevice, BlockDeviceError, Result, BLOCK_SIZE};

struct MemoryImage {
    data: Vec<u8>,
    /// Writes still allowed before the device "loses power"; `None` is unlimited.
    write_budget: Option<u64>,
    writes: u64,
}

/// A RAM-backed block device.
///
/// Crash testing works by arming a write budget: after that many successful
/// writes every further write fails with [`BlockDeviceError::PowerLoss`] and is
/// dropped. The image keeps whatever reached it before the cut, so a new
/// cache and log opened over the same device see exactly what a reboot would.
pub struct MemoryBlockDevice {
    image: Mutex<MemoryImage>,
    block_count: u64,
}

impl MemoryBlockDevice {
    /// Create a zero-filled device of `block_count` blocks
    pub fn new(block_count: u64) -> Self {
        Self {
            image: Mutex::new(MemoryImage {
                data: vec![0u8; block_count as usize * BLOCK_SIZE],
                write_budget: None,
                writes: 0,
            }),
            block_count,
        }
    }

    /// Allow only `budget` more writes; `None` restores normal operation
    pub fn set_write_budget(&self, budget: Option<u64>) {
        self.image.lock().write_budget = budget;
    }

    /// Total number of writes that reached the image
    pub fn writes(&self) -> u64 {
        self.image.lock().writes
    }

    /// Copy of a block straight from the image, bypassing any cache
    pub fn snapshot_block(&self, block_num: u64) -> Vec<u8> {
        let image = self.image.lock();
        let start = block_num as usize * BLOCK_SIZE;
        image.data[start..start + BLOCK_SIZE].to_vec()
    }
}

#[async_trait]
impl BlockDevice for MemoryBlockDevice {
    async fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<()> {
        check_io(block_num, self.block_count, buf.len())?;
        let image = self.image.lock();
        let start = block_num as usize * BLOCK_SIZE;
        buf.copy_from_slice(&image.data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()> {
        check_io(block_num, self.block_count, data.len())?;
        let mut image = self.image.lock();
        if let Some(left) = image.write_budget.as_mut() {
            if *left == 0 {
                return Err(BlockDeviceError::PowerLoss(block_num));
            }
            *left -= 1;
        }
        let start = block_num as usize * BLOCK_SIZE;
        image.data[start..start + BLOCK_SIZE].copy_from_slice(data);
        image.writes += 1;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
