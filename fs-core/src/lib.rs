//! WalFS Core - transactional durability and lookup acceleration for a
//! minimal filesystem
//!
//! This crate provides a write-ahead log that batches filesystem operations
//! into group commits ([`modules::journaling`]), and a fixed-size cache of
//! path-component lookups ([`modules::namecache`]). The block device, block
//! cache, superblock and tick clock underneath them live in their own
//! modules.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rust_2018_idioms)]

pub mod blockdev;
pub mod cache;
pub mod clock;
pub mod error;
pub mod format;
pub mod modules;

// Re-export the error types
pub use error::{Error, Result};

pub use blockdev::{BlockDevice, FileBackedBlockDevice, MemoryBlockDevice, BLOCK_SIZE};
pub use cache::{Block, BlockCache};
pub use clock::{ManualTicks, SystemTicks, TickSource};
pub use modules::{LogConfig, LogManager, NameCache};

/// Re-export common types and traits
pub mod prelude {
    pub use crate::blockdev::BlockDevice;
    pub use crate::clock::TickSource;
    pub use crate::error::Result;
}
