//! Block device I/O for WalFS
//!
//! Two devices are provided: [`FileBackedBlockDevice`] for image files and raw
//! block devices, and [`MemoryBlockDevice`], an in-memory image that can be
//! told to "lose power" after a number of writes.

mod blockdev_trait;
mod memory;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

pub(crate) use self::blockdev_trait::check_io;
pub use self::blockdev_trait::{BlockDevice, BlockDeviceError, Result, BLOCK_SIZE};
pub use self::memory::MemoryBlockDevice;

/// A block device that is backed by a file on the filesystem
#[derive(Debug)]
pub struct FileBackedBlockDevice {
    file: Mutex<Option<File>>,
    path: PathBuf,
    block_count: u64,
    read_only: bool,
}

impl FileBackedBlockDevice {
    /// Create (or truncate) an image file holding `block_count` zeroed blocks
    pub async fn create(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        file.set_len(block_count * BLOCK_SIZE as u64).await?;
        log::debug!("Created image {} with {} blocks", path.display(), block_count);

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            block_count,
            read_only: false,
        })
    }

    /// Open an existing image file or block device
    pub async fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .await?;

        let size = Self::device_size(&path)?;
        let block_count = size / BLOCK_SIZE as u64;

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            block_count,
            read_only,
        })
    }

    /// Size in bytes, asking the kernel for raw block devices
    #[cfg(unix)]
    fn device_size(path: &Path) -> Result<u64> {
        use std::os::unix::fs::FileTypeExt;
        use std::os::unix::io::AsRawFd;

        let metadata = std::fs::metadata(path)?;
        if !metadata.file_type().is_block_device() {
            return Ok(metadata.len());
        }

        let file = std::fs::File::open(path)?;
        // BLKGETSIZE64 on Linux
        const BLKGETSIZE64: libc::c_ulong = 0x80081272;

        let mut size: u64 = 0;
        let result = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size as *mut u64) };
        if result == -1 {
            return Err(BlockDeviceError::Io(std::io::Error::last_os_error()));
        }

        Ok(size)
    }

    #[cfg(not(unix))]
    fn device_size(path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockDevice for FileBackedBlockDevice {
    async fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<()> {
        check_io(block_num, self.block_count, buf.len())?;

        let offset = block_num * BLOCK_SIZE as u64;
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(buf).await?;
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    async fn write_block(&self, block_num: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(BlockDeviceError::ReadOnly);
        }
        check_io(block_num, self.block_count, data.len())?;

        let offset = block_num * BLOCK_SIZE as u64;
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    async fn sync(&self) -> Result<()> {
        let mut file_guard = self.file.lock().await;

        if let Some(file) = &mut *file_guard {
            file.sync_all().await?;
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut file_guard = self.file.lock().await;

        if file_guard.take().is_some() {
            Ok(())
        } else {
            Err(BlockDeviceError::DeviceClosed)
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
