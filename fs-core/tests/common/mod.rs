#![allow(dead_code)]

use std::sync::Arc;

use walfs::blockdev::BLOCK_SIZE;
use walfs::format::format_device;
use walfs::{BlockCache, LogConfig, LogManager, ManualTicks, MemoryBlockDevice};

pub const DEV: u32 = 1;
pub const DEVICE_BLOCKS: u64 = 512;
pub const LOG_BLOCKS: u64 = 30;
pub const LOG_START: u64 = 1;
pub const DATA_START: u64 = 100;
pub const CACHE_BLOCKS: usize = 128;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Harness {
    pub device: Arc<MemoryBlockDevice>,
    pub cache: Arc<BlockCache>,
    pub clock: Arc<ManualTicks>,
    pub log: Arc<LogManager>,
}

pub async fn formatted_device() -> Arc<MemoryBlockDevice> {
    init_logging();
    let device = Arc::new(MemoryBlockDevice::new(DEVICE_BLOCKS));
    format_device(device.as_ref(), LOG_BLOCKS).await.unwrap();
    device
}

/// Open the log over `device` with a fresh cache, as a reboot would
pub async fn try_mount(
    device: Arc<MemoryBlockDevice>,
    config: LogConfig,
) -> walfs::Result<Harness> {
    let cache = Arc::new(BlockCache::new(device.clone(), CACHE_BLOCKS));
    let clock = Arc::new(ManualTicks::new());
    let log = LogManager::open(DEV, cache.clone(), clock.clone(), config).await?;
    Ok(Harness {
        device,
        cache,
        clock,
        log: Arc::new(log),
    })
}

pub async fn mount(device: Arc<MemoryBlockDevice>, config: LogConfig) -> Harness {
    try_mount(device, config).await.unwrap()
}

pub async fn fresh(config: LogConfig) -> Harness {
    mount(formatted_device().await, config).await
}

impl Harness {
    /// Fill `block_num` with `byte` inside the open transaction
    pub async fn write(&self, block_num: u64, byte: u8) {
        let mut block = self.cache.read_block(block_num).await.unwrap();
        block.data_mut().fill(byte);
        self.log.log_write(&block).unwrap();
    }

    /// One complete operation writing each `(block, byte)` pair
    pub async fn op(&self, writes: &[(u64, u8)]) -> walfs::Result<()> {
        self.log.begin_op().await;
        for &(block_num, byte) in writes {
            self.write(block_num, byte).await;
        }
        self.log.end_op().await
    }

    /// The byte a block is filled with on the device itself
    pub fn on_disk(&self, block_num: u64) -> u8 {
        disk_byte(&self.device, block_num)
    }
}

pub fn disk_byte(device: &MemoryBlockDevice, block_num: u64) -> u8 {
    let block = device.snapshot_block(block_num);
    assert!(
        block.iter().all(|&b| b == block[0]),
        "block {} is not uniformly filled",
        block_num
    );
    block[0]
}

/// Put a committed-but-uninstalled transaction on the device by hand
pub async fn plant_committed_log(device: &MemoryBlockDevice, entries: &[(u64, u8)]) {
    use walfs::BlockDevice;

    let mut header = vec![0u8; BLOCK_SIZE];
    header[..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    for (slot, &(home, byte)) in entries.iter().enumerate() {
        device
            .write_block(LOG_START + 1 + slot as u64, &vec![byte; BLOCK_SIZE])
            .await
            .unwrap();
        let at = 4 + slot * 8;
        header[at..at + 8].copy_from_slice(&home.to_le_bytes());
    }
    device.write_block(LOG_START, &header).await.unwrap();
}
