//! Subcommands

pub mod bench;
pub mod format;
pub mod inspect;
pub mod recover;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use walfs::{BlockCache, FileBackedBlockDevice, LogConfig, LogManager, SystemTicks};

/// Buffers in the block cache of a mounted image
pub const CACHE_BLOCKS: usize = 256;

/// Device number the CLI mounts images as
pub const DEV: u32 = 1;

/// Load a log configuration, or the defaults without a file
pub fn load_config(path: Option<&Path>) -> Result<LogConfig> {
    match path {
        Some(path) => LogConfig::from_json_file(path)
            .with_context(|| format!("Failed to load log configuration: {}", path.display())),
        None => Ok(LogConfig::default()),
    }
}

/// Open an image and mount its log, replaying any committed transaction
pub async fn mount(image: &Path, config: LogConfig) -> Result<Arc<LogManager>> {
    let device = FileBackedBlockDevice::open(image, false)
        .await
        .with_context(|| format!("Failed to open image: {}", image.display()))?;
    let cache = Arc::new(BlockCache::new(Arc::new(device), CACHE_BLOCKS));
    let clock = Arc::new(SystemTicks::from_millis(config.tick_millis));

    let log = LogManager::open(DEV, cache, clock, config)
        .await
        .with_context(|| format!("Failed to mount log of {}", image.display()))?;
    Ok(Arc::new(log))
}
