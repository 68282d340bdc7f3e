//! WalFS feature modules
//!
//! The write-ahead log and the name cache. Both are service objects: build
//! one per mounted device at startup and share it by `Arc`.

pub mod journaling;
pub mod namecache;

// Re-export journaling types
pub use journaling::{LogConfig, LogHeader, LogManager, LogStats, LogStatus};

// Re-export name cache types
pub use namecache::{NameCache, NameCacheEntryInfo, NameCacheReport, NameCacheStats};
