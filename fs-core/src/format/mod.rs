//! WalFS on-disk format: the superblock and the initial log region

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::blockdev::{BlockDevice, BlockDeviceError, BLOCK_SIZE};

/// Magic number for WalFS images
const WALFS_MAGIC: &[u8; 8] = b"WALFS\x00\x00\x00";
/// Current format version
const FS_VERSION: u32 = 1;

/// Block holding the superblock
pub const SUPERBLOCK_BLOCK: u64 = 0;

/// Image descriptor stored in block 0.
///
/// The log region starts at `log_start` and spans `log_blocks` blocks: one
/// header block followed by the payload slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Superblock {
    /// Magic number (WALFS\0\0\0)
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Number of blocks on the device
    pub block_count: u64,
    /// First block of the log region (the log header)
    pub log_start: u64,
    /// Length of the log region in blocks, header included
    pub log_blocks: u64,
    /// Image UUID
    pub uuid: [u8; 16],
    /// Creation time, seconds since the epoch
    pub created: i64,
}

/// Error type for format operations
#[derive(Error, Debug)]
pub enum FormatError {
    /// Encoding or decoding failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The device refused a read or write
    #[error("Block device error: {0}")]
    BlockDevice(#[from] BlockDeviceError),
    /// Block 0 does not start with the WalFS magic
    #[error("Invalid magic number")]
    InvalidMagic,
    /// Written by a newer or older format
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),
    /// The stored CRC32 does not match the superblock fields
    #[error("Superblock checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC32 found on disk
        stored: u32,
        /// CRC32 of the fields as read
        computed: u32,
    },
    /// The log region does not fit the device
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
    /// No randomness for the image UUID
    #[error("Failed to generate UUID: {0}")]
    Uuid(String),
}

impl Superblock {
    /// Encoded size in bytes, checksum excluded
    pub const SIZE: usize = 8 + 4 + 8 + 8 + 8 + 16 + 8;

    /// Describe a new image of `block_count` blocks whose log region directly
    /// follows the superblock.
    pub fn new(block_count: u64, log_blocks: u64) -> Result<Self, FormatError> {
        let log_start = SUPERBLOCK_BLOCK + 1;
        check_layout(block_count, log_start, log_blocks)?;

        let mut uuid = [0u8; 16];
        getrandom::getrandom(&mut uuid).map_err(|e| FormatError::Uuid(e.to_string()))?;

        Ok(Self {
            magic: *WALFS_MAGIC,
            version: FS_VERSION,
            block_count,
            log_start,
            log_blocks,
            uuid,
            created: Utc::now().timestamp(),
        })
    }

    /// First block after the log region
    pub fn first_data_block(&self) -> u64 {
        self.log_start + self.log_blocks
    }

    /// Creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created, 0).single()
    }

    /// UUID in the usual 8-4-4-4-12 form
    pub fn uuid_string(&self) -> String {
        let hex: String = self.uuid.iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    fn write_fields<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u64::<LittleEndian>(self.block_count)?;
        writer.write_u64::<LittleEndian>(self.log_start)?;
        writer.write_u64::<LittleEndian>(self.log_blocks)?;
        writer.write_all(&self.uuid)?;
        writer.write_i64::<LittleEndian>(self.created)?;
        Ok(())
    }

    /// Write the superblock followed by its CRC32
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut fields = Vec::with_capacity(Self::SIZE);
        self.write_fields(&mut fields)?;
        writer.write_all(&fields)?;
        writer.write_u32::<LittleEndian>(crc32fast::hash(&fields))?;
        Ok(())
    }

    /// Read and validate a superblock
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut fields = [0u8; Self::SIZE];
        reader.read_exact(&mut fields)?;
        let stored = reader.read_u32::<LittleEndian>()?;

        let mut cursor = Cursor::new(&fields[..]);
        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        if &magic != WALFS_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let computed = crc32fast::hash(&fields);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch { stored, computed });
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != FS_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let block_count = cursor.read_u64::<LittleEndian>()?;
        let log_start = cursor.read_u64::<LittleEndian>()?;
        let log_blocks = cursor.read_u64::<LittleEndian>()?;
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        let created = cursor.read_i64::<LittleEndian>()?;
        check_layout(block_count, log_start, log_blocks)?;

        Ok(Self {
            magic,
            version,
            block_count,
            log_start,
            log_blocks,
            uuid,
            created,
        })
    }

    /// Encode into a full block
    pub fn to_block(&self) -> io::Result<Vec<u8>> {
        let mut block = Vec::with_capacity(BLOCK_SIZE);
        self.write_to(&mut block)?;
        block.resize(BLOCK_SIZE, 0);
        Ok(block)
    }

    /// Decode from a full block
    pub fn from_block(block: &[u8]) -> Result<Self, FormatError> {
        Self::read_from(&mut Cursor::new(block))
    }
}

/// The log region must hold a header and a slot, and sit between the
/// superblock and the end of the device.
fn check_layout(block_count: u64, log_start: u64, log_blocks: u64) -> Result<(), FormatError> {
    if log_blocks < 2 {
        return Err(FormatError::InvalidLayout(format!(
            "log region needs a header and at least one slot, got {} blocks",
            log_blocks
        )));
    }
    if log_start <= SUPERBLOCK_BLOCK {
        return Err(FormatError::InvalidLayout(format!(
            "log region starts at block {}, on top of the superblock",
            log_start
        )));
    }
    match log_start.checked_add(log_blocks) {
        Some(end) if end <= block_count => Ok(()),
        _ => Err(FormatError::InvalidLayout(format!(
            "log region of {} blocks at {} does not fit in {} blocks",
            log_blocks, log_start, block_count
        ))),
    }
}

/// Read the superblock of a device
pub async fn read_superblock(device: &dyn BlockDevice) -> Result<Superblock, FormatError> {
    let mut block = vec![0u8; BLOCK_SIZE];
    device.read_block(SUPERBLOCK_BLOCK, &mut block).await?;
    Superblock::from_block(&block)
}

/// Format a device: write the superblock and an empty log header.
///
/// Only the superblock and the header block are written; the payload slots
/// are meaningless until a header names them.
pub async fn format_device(
    device: &dyn BlockDevice,
    log_blocks: u64,
) -> Result<Superblock, FormatError> {
    if device.is_read_only() {
        return Err(BlockDeviceError::ReadOnly.into());
    }
    let superblock = Superblock::new(device.block_count(), log_blocks)?;

    device
        .write_block(SUPERBLOCK_BLOCK, &superblock.to_block()?)
        .await?;
    device
        .write_block(superblock.log_start, &vec![0u8; BLOCK_SIZE])
        .await?;
    device.sync().await?;

    log::info!(
        "Formatted {} blocks: log at {}..{}, uuid {}",
        superblock.block_count,
        superblock.log_start,
        superblock.first_data_block(),
        superblock.uuid_string()
    );
    Ok(superblock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdev::MemoryBlockDevice;

    #[tokio::test]
    async fn test_format_and_read_back() {
        let device = MemoryBlockDevice::new(64);
        let written = format_device(&device, 30).await.unwrap();
        let read = read_superblock(&device).await.unwrap();

        assert_eq!(written, read);
        assert_eq!(read.log_start, 1);
        assert_eq!(read.log_blocks, 30);
        assert_eq!(read.first_data_block(), 31);
        assert_eq!(device.snapshot_block(1), vec![0u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_layout_must_fit() {
        assert!(matches!(Superblock::new(10, 10), Err(FormatError::InvalidLayout(_))));
        assert!(matches!(Superblock::new(10, 1), Err(FormatError::InvalidLayout(_))));
        assert!(Superblock::new(11, 10).is_ok());
    }

    #[test]
    fn test_corruption_is_detected() {
        let sb = Superblock::new(100, 8).unwrap();
        let mut block = sb.to_block().unwrap();
        block[20] ^= 0xFF;
        assert!(matches!(
            Superblock::from_block(&block),
            Err(FormatError::ChecksumMismatch { .. })
        ));

        block[0] = b'X';
        assert!(matches!(Superblock::from_block(&block), Err(FormatError::InvalidMagic)));
    }

    #[test]
    fn test_bad_layout_is_rejected_on_read() {
        let good = Superblock::new(100, 8).unwrap();
        for (log_start, log_blocks) in [(1, 0), (1, 1), (0, 8), (1, 100), (2, u64::MAX)] {
            let sb = Superblock {
                log_start,
                log_blocks,
                ..good.clone()
            };
            // Checksum is valid, so only the layout check can catch it.
            assert!(matches!(
                Superblock::from_block(&sb.to_block().unwrap()),
                Err(FormatError::InvalidLayout(_))
            ));
        }
        assert_eq!(Superblock::from_block(&good.to_block().unwrap()).unwrap(), good);
    }

    #[tokio::test]
    async fn test_unformatted_device() {
        let device = MemoryBlockDevice::new(4);
        assert!(matches!(
            read_superblock(&device).await,
            Err(FormatError::InvalidMagic)
        ));
    }
}
