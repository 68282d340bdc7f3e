//! Block cache for WalFS
//!
//! A bounded LRU of block buffers sitting between the log and the device.
//! Blocks staged by a transaction are pinned until their commit installs
//! them; unpinned blocks are always clean, so evicting one never needs I/O.

use std::num::NonZeroUsize;
use std::sync::Arc;

use arrayref::array_ref;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;

use crate::blockdev::{BlockDevice, BlockDeviceError, BLOCK_SIZE};

/// Error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The device underneath failed
    #[error("Block device error: {0}")]
    BlockDevice(#[from] BlockDeviceError),
    /// No buffer can be evicted
    #[error("Cache is full: all {0} buffers are pinned")]
    CacheFull(usize),
    /// Block number past the end of the device
    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(u64),
    /// `unpin` without a matching `pin`
    #[error("Block {0} is not pinned")]
    NotPinned(u64),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// A caller's private copy of one block.
///
/// Obtained from [`BlockCache::read_block`]; mutate it through
/// [`Block::data_mut`] and hand it to the log to make the change part of the
/// open transaction.
#[derive(Clone)]
pub struct Block {
    block_num: u64,
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Block number on the device
    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    /// Current contents
    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Mutable contents
    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block").field("block_num", &self.block_num).finish()
    }
}

struct CachedBlock {
    data: Box<[u8; BLOCK_SIZE]>,
    dirty: bool,
    pins: u32,
}

impl CachedBlock {
    fn evictable(&self) -> bool {
        self.pins == 0 && !self.dirty
    }
}

/// A block cache that maintains a fixed-size in-memory cache of blocks
pub struct BlockCache {
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    cache: Mutex<LruCache<u64, CachedBlock>>,
}

impl BlockCache {
    /// Create a new block cache with the given capacity (in number of blocks)
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            device,
            capacity,
            // Never let the LRU evict on its own; `make_room` picks victims.
            cache: Mutex::new(LruCache::unbounded()),
        }
    }

    /// The device underneath
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// Maximum number of resident buffers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_block(&self, block_num: u64) -> Result<()> {
        if block_num >= self.device.block_count() {
            return Err(CacheError::InvalidBlockNumber(block_num));
        }
        Ok(())
    }

    /// Drop the least recently used evictable buffer if the cache is at capacity.
    /// Returns false when every resident buffer is pinned.
    fn make_room(cache: &mut LruCache<u64, CachedBlock>, capacity: usize) -> bool {
        if cache.len() < capacity {
            return true;
        }
        let victim = cache
            .iter()
            .rev()
            .find(|(_, block)| block.evictable())
            .map(|(block_num, _)| *block_num);
        match victim {
            Some(block_num) => {
                cache.pop(&block_num);
                true
            }
            None => false,
        }
    }

    /// Read a block, from the cache if resident.
    ///
    /// A miss that finds every buffer pinned still succeeds; the block is just
    /// not kept.
    pub async fn read_block(&self, block_num: u64) -> Result<Block> {
        self.check_block(block_num)?;

        let hit = self.cache.lock().get(&block_num).map(|block| block.data.clone());
        if let Some(data) = hit {
            return Ok(Block { block_num, data });
        }

        let mut data = Box::new([0u8; BLOCK_SIZE]);
        self.device.read_block(block_num, &mut data[..]).await?;

        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&block_num) {
            // Someone staged or read it while we were on the device.
            return Ok(Block {
                block_num,
                data: existing.data.clone(),
            });
        }
        if Self::make_room(&mut cache, self.capacity) {
            cache.put(
                block_num,
                CachedBlock {
                    data: data.clone(),
                    dirty: false,
                    pins: 0,
                },
            );
        }
        Ok(Block { block_num, data })
    }

    /// Write a block through to the device and keep a clean cached copy.
    /// Pins held on the block survive the write.
    pub async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()> {
        self.check_block(block_num)?;
        if data.len() != BLOCK_SIZE {
            return Err(BlockDeviceError::InvalidBlockSize(data.len()).into());
        }

        self.device.write_block(block_num, data).await?;

        let block_data = Box::new(*array_ref!(data, 0, BLOCK_SIZE));
        let mut cache = self.cache.lock();
        if let Some(block) = cache.get_mut(&block_num) {
            block.data = block_data;
            block.dirty = false;
        } else if Self::make_room(&mut cache, self.capacity) {
            cache.put(
                block_num,
                CachedBlock {
                    data: block_data,
                    dirty: false,
                    pins: 0,
                },
            );
        }
        Ok(())
    }

    /// Replace the in-memory contents of a block without touching the device.
    ///
    /// The buffer is marked dirty; the caller is expected to pin it until the
    /// data has been written somewhere durable.
    pub fn stage_block(&self, block: &Block) -> Result<()> {
        self.check_block(block.block_num)?;
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get_mut(&block.block_num) {
            cached.data.copy_from_slice(&block.data[..]);
            cached.dirty = true;
            return Ok(());
        }
        if !Self::make_room(&mut cache, self.capacity) {
            return Err(CacheError::CacheFull(self.capacity));
        }
        cache.put(
            block.block_num,
            CachedBlock {
                data: block.data.clone(),
                dirty: true,
                pins: 0,
            },
        );
        Ok(())
    }

    /// Keep a resident block from being evicted
    pub fn pin(&self, block_num: u64) -> Result<()> {
        let mut cache = self.cache.lock();
        let block = cache
            .peek_mut(&block_num)
            .ok_or(CacheError::InvalidBlockNumber(block_num))?;
        block.pins += 1;
        Ok(())
    }

    /// Release one pin taken by [`BlockCache::pin`]
    pub fn unpin(&self, block_num: u64) -> Result<()> {
        let mut cache = self.cache.lock();
        match cache.peek_mut(&block_num) {
            Some(block) if block.pins > 0 => {
                block.pins -= 1;
                Ok(())
            }
            _ => Err(CacheError::NotPinned(block_num)),
        }
    }

    /// Number of pins currently held on a block (0 if not resident)
    pub fn pin_count(&self, block_num: u64) -> u32 {
        self.cache.lock().peek(&block_num).map_or(0, |block| block.pins)
    }

    /// Number of resident buffers
    pub fn resident(&self) -> usize {
        self.cache.lock().len()
    }
}
