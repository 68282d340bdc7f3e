use std::fmt;
use std::io;

use crate::blockdev::BlockDeviceError;
use crate::cache::CacheError;
use crate::format::FormatError;

/// Recoverable WalFS errors.
///
/// Contract violations inside the log (writing outside a transaction,
/// overflowing the log) are not represented here: they panic.
#[derive(Debug)]
pub enum Error {
    /// Operating system I/O failure
    Io(io::Error),
    /// Device-level failure other than plain I/O
    BlockDevice(BlockDeviceError),
    /// Block cache failure
    Cache(CacheError),
    /// Block 0 does not describe a usable image
    InvalidSuperblock(String),
    /// The on-disk log header cannot be decoded
    InvalidLogHeader(String),
    /// Rejected configuration
    InvalidConfig(String),
    /// Anything else
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BlockDevice(e) => write!(f, "Block device error: {}", e),
            Error::Cache(e) => write!(f, "Block cache error: {}", e),
            Error::InvalidSuperblock(msg) => write!(f, "Invalid superblock: {}", msg),
            Error::InvalidLogHeader(msg) => write!(f, "Invalid log header: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::BlockDevice(e) => Some(e),
            Error::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<BlockDeviceError> for Error {
    fn from(err: BlockDeviceError) -> Self {
        match err {
            BlockDeviceError::Io(e) => Error::Io(e),
            other => Error::BlockDevice(other),
        }
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::BlockDevice(e) => e.into(),
            other => Error::Cache(other),
        }
    }
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(e) => Error::Io(e),
            FormatError::BlockDevice(e) => e.into(),
            other => Error::InvalidSuperblock(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Result type for WalFS operations
pub type Result<T> = std::result::Result<T, Error>;
