//! Write-ahead logging with group commit for WalFS
//!
//! The log is a physical redo log. Its on-disk format is a header block that
//! names the home location of each logged block, followed by the logged
//! blocks themselves:
//!
//! ```text
//!   log_start + 0   header: n, home[0], home[1], ...
//!   log_start + 1   copy of block home[0]
//!   log_start + 2   copy of block home[1]
//!   ...
//! ```
//!
//! A filesystem operation brackets its block updates with
//! [`LogManager::begin_op`] and [`LogManager::end_op`] and registers every
//! block it modifies with [`LogManager::log_write`]. Several operations may be
//! open at once; the log only ever commits when none is, so a commit never
//! has to reason about half-finished operations. Commits are batched: the
//! operation that drains the log consults the group-commit policy and may
//! leave its updates in memory for a later, larger commit.
//!
//! Writing the header is the commit point. A crash before it loses the whole
//! batch; a crash after it is repaired at the next [`LogManager::open`], which
//! replays the header.

mod header;

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::blockdev::BLOCK_SIZE;
use crate::cache::{Block, BlockCache};
use crate::clock::TickSource;
use crate::error::{Error, Result};
use crate::format::{Superblock, SUPERBLOCK_BLOCK};

pub use header::LogHeader;

/// Default log size in blocks, header included
pub const LOGSIZE: usize = 30;
/// Most distinct blocks a single operation is expected to write
pub const MAXOPBLOCKS: usize = 10;
/// Operations to accumulate before a group commit
pub const BATCH_THRESHOLD: usize = 3;
/// Ticks a batch may wait before it is committed anyway
pub const COMMIT_DELAY_TICKS: u64 = 2;
/// Default tick length for [`crate::clock::SystemTicks`]
pub const TICK_MILLIS: u64 = 10;

/// Log manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log size in blocks (header included); capped by the on-disk region
    pub log_size: usize,
    /// Worst-case number of distinct blocks per operation, used for admission
    pub max_op_blocks: usize,
    /// Pending operations that trigger a commit
    pub batch_threshold: usize,
    /// Ticks after the last commit at which pending operations are committed
    pub commit_delay_ticks: u64,
    /// Length of a tick in milliseconds when running on the system clock
    pub tick_millis: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_size: LOGSIZE,
            max_op_blocks: MAXOPBLOCKS,
            batch_threshold: BATCH_THRESHOLD,
            commit_delay_ticks: COMMIT_DELAY_TICKS,
            tick_millis: TICK_MILLIS,
        }
    }
}

impl LogConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn validate(&self, log_size: usize) -> Result<()> {
        if log_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "log needs a header block and at least one slot, got {} blocks",
                log_size
            )));
        }
        if self.max_op_blocks == 0 || self.max_op_blocks >= log_size {
            return Err(Error::InvalidConfig(format!(
                "max_op_blocks must be in 1..{}, got {}",
                log_size, self.max_op_blocks
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of the log state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogStatus {
    /// Open transactions
    pub outstanding: usize,
    /// A commit is running
    pub committing: bool,
    /// Operations admitted since the last commit
    pub pending_writes: usize,
    /// Blocks recorded in the in-memory header
    pub header_len: usize,
    /// The next idle transition commits unconditionally
    pub force_commit: bool,
    /// Tick at which the last commit finished
    pub last_commit_tick: u64,
}

/// Log instrumentation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    /// Commits that wrote at least one block
    pub commits: u64,
    /// Idle transitions where the policy chose to wait
    pub deferred: u64,
    /// Commits that failed with an I/O error
    pub failed_commits: u64,
    /// Blocks installed by commits
    pub blocks_committed: u64,
    /// Blocks replayed by recovery at open
    pub blocks_recovered: u64,
    /// Highest number of commits ever observed running at once
    pub peak_concurrent_commits: usize,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    deferred: AtomicU64,
    failed_commits: AtomicU64,
    blocks_committed: AtomicU64,
    blocks_recovered: AtomicU64,
    running_commits: AtomicUsize,
    peak_concurrent_commits: AtomicUsize,
}

struct LogState {
    header: LogHeader,
    outstanding: usize,
    committing: bool,
    pending_writes: usize,
    last_commit_tick: u64,
    force_commit: bool,
    /// A commit failed, so the on-disk header may still name a batch that
    /// was never fully installed
    unsettled: bool,
}

impl LogState {
    /// Room for one more operation assuming every open one writes its full quota
    fn admits(&self, max_op_blocks: usize, log_size: usize) -> bool {
        !self.committing && self.header.len() + (self.outstanding + 1) * max_op_blocks <= log_size
    }

    /// Group-commit policy, only meaningful when no operation is open
    fn should_commit(&self, now: u64, config: &LogConfig, log_size: usize) -> bool {
        if self.force_commit {
            return true;
        }
        if self.pending_writes >= config.batch_threshold {
            return true;
        }
        if self.pending_writes > 0
            && now.saturating_sub(self.last_commit_tick) >= config.commit_delay_ticks
        {
            return true;
        }
        // Close to full: commit before the next operation could overflow.
        self.header.len() + config.max_op_blocks > log_size.saturating_sub(config.batch_threshold)
    }
}

/// The write-ahead log of one device
pub struct LogManager {
    dev: u32,
    cache: Arc<BlockCache>,
    clock: Arc<dyn TickSource>,
    config: LogConfig,
    /// First block of the log region (the header)
    start: u64,
    /// Effective log size in blocks, header included
    size: usize,
    state: Mutex<LogState>,
    wakeup: Notify,
    counters: Counters,
}

impl LogManager {
    /// Mount the log of device `dev`: read the log region from the superblock
    /// and replay any committed but uninstalled transaction.
    ///
    /// # Panics
    ///
    /// If a header for the configured log size cannot fit in one block.
    pub async fn open(
        dev: u32,
        cache: Arc<BlockCache>,
        clock: Arc<dyn TickSource>,
        config: LogConfig,
    ) -> Result<Self> {
        let superblock = Superblock::from_block(cache.read_block(SUPERBLOCK_BLOCK).await?.data())?;
        let log_end = superblock.log_start.checked_add(superblock.log_blocks);
        if log_end.map_or(true, |end| end > cache.device().block_count()) {
            return Err(Error::InvalidSuperblock(format!(
                "log region {}+{} runs past the end of the device",
                superblock.log_start, superblock.log_blocks
            )));
        }

        let size = config.log_size.min(superblock.log_blocks as usize);
        if LogHeader::encoded_len(size.saturating_sub(1)) > BLOCK_SIZE {
            panic!("initlog: header for a {}-block log does not fit in one block", size);
        }
        config.validate(size)?;
        if cache.capacity() < size - 1 {
            return Err(Error::InvalidConfig(format!(
                "block cache holds {} buffers but a full log pins {}",
                cache.capacity(),
                size - 1
            )));
        }

        let log = Self {
            dev,
            start: superblock.log_start,
            size,
            state: Mutex::new(LogState {
                header: LogHeader::with_capacity(size - 1),
                outstanding: 0,
                committing: false,
                pending_writes: 0,
                last_commit_tick: 0,
                force_commit: false,
                unsettled: false,
            }),
            cache,
            clock,
            config,
            wakeup: Notify::new(),
            counters: Counters::default(),
        };

        log::info!(
            "dev {}: log at block {} with {} slots",
            log.dev,
            log.start,
            log.size - 1
        );
        log.recover().await?;
        Ok(log)
    }

    /// Read the header currently on disk without mounting the log
    pub async fn read_disk_header(cache: &BlockCache, superblock: &Superblock) -> Result<LogHeader> {
        let block = cache.read_block(superblock.log_start).await?;
        LogHeader::decode(block.data(), superblock.log_blocks.saturating_sub(1) as usize)
    }

    /// Effective configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Log size in blocks, header included
    pub fn log_size(&self) -> usize {
        self.size
    }

    /// First block of the log region
    pub fn log_start(&self) -> u64 {
        self.start
    }

    /// Device this log belongs to
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// Block cache the log stages into
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Snapshot of the transaction state
    pub fn status(&self) -> LogStatus {
        let state = self.state.lock();
        LogStatus {
            outstanding: state.outstanding,
            committing: state.committing,
            pending_writes: state.pending_writes,
            header_len: state.header.len(),
            force_commit: state.force_commit,
            last_commit_tick: state.last_commit_tick,
        }
    }

    /// Snapshot of the instrumentation counters
    pub fn stats(&self) -> LogStats {
        let c = &self.counters;
        LogStats {
            commits: c.commits.load(Ordering::SeqCst),
            deferred: c.deferred.load(Ordering::SeqCst),
            failed_commits: c.failed_commits.load(Ordering::SeqCst),
            blocks_committed: c.blocks_committed.load(Ordering::SeqCst),
            blocks_recovered: c.blocks_recovered.load(Ordering::SeqCst),
            peak_concurrent_commits: c.peak_concurrent_commits.load(Ordering::SeqCst),
        }
    }

    /// Open a transaction.
    ///
    /// Waits while a commit is running or while admitting one more operation
    /// could overflow the log. There is no timeout; dropping the returned
    /// future before it completes leaves the log untouched.
    pub async fn begin_op(&self) {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between the check and the
            // await is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.admits(self.config.max_op_blocks, self.size) {
                    state.outstanding += 1;
                    state.pending_writes += 1;
                    return;
                }
                log::trace!(
                    "begin_op waiting: committing={} outstanding={} logged={}",
                    state.committing,
                    state.outstanding,
                    state.header.len()
                );
            }
            notified.await;
        }
    }

    /// Record that `block` was modified by the open transaction.
    ///
    /// Its contents are staged in the block cache and pinned there until the
    /// commit installs them. Writing the same block again in the same batch
    /// reuses its slot; the slot always carries the newest contents.
    ///
    /// # Panics
    ///
    /// If no transaction is open, or if the block would need a slot beyond
    /// the log's capacity.
    pub fn log_write(&self, block: &Block) -> Result<()> {
        let block_num = block.block_num();
        let mut state = self.state.lock();
        if state.outstanding < 1 {
            panic!("log_write outside of transaction (block {})", block_num);
        }

        let absorbed = state.header.contains(block_num);
        if !absorbed && state.header.len() >= self.size - 1 {
            panic!(
                "too big a transaction: block {} needs slot {} of a {}-slot log",
                block_num,
                state.header.len() + 1,
                self.size - 1
            );
        }

        self.cache.stage_block(block)?;
        if !absorbed {
            self.cache.pin(block_num)?;
            state.header.push(block_num);
        }
        log::trace!(
            "dev {}: logged block {} ({})",
            self.dev,
            block_num,
            if absorbed { "absorbed" } else { "new slot" }
        );
        Ok(())
    }

    /// Make the next idle transition commit regardless of the batching policy
    pub fn force_commit(&self) {
        self.state.lock().force_commit = true;
    }

    /// Close a transaction; the last one to close may commit.
    ///
    /// The commit runs without the state lock held. The future must be driven
    /// to completion once the commit has started.
    pub async fn end_op(&self) -> Result<()> {
        let batch = {
            let mut state = self.state.lock();
            if state.outstanding == 0 {
                panic!("end_op without a matching begin_op");
            }
            if state.committing {
                panic!("log is already committing");
            }
            state.outstanding -= 1;

            if state.outstanding > 0 {
                None
            } else if state.should_commit(self.clock.ticks(), &self.config, self.size) {
                state.committing = true;
                state.pending_writes = 0;
                state.force_commit = false;
                Some((state.header.clone(), state.unsettled))
            } else {
                self.counters.deferred.fetch_add(1, Ordering::SeqCst);
                log::debug!(
                    "dev {}: commit deferred, {} ops pending, {} blocks logged",
                    self.dev,
                    state.pending_writes,
                    state.header.len()
                );
                None
            }
        };

        // Fewer open operations means more room; let waiters re-check.
        let Some((header, unsettled)) = batch else {
            self.wakeup.notify_waiters();
            return Ok(());
        };

        let result = self.commit(&header, unsettled).await;
        {
            let mut state = self.state.lock();
            state.committing = false;
            match result {
                Ok(()) => {
                    state.header.clear();
                    state.last_commit_tick = self.clock.ticks();
                    state.unsettled = false;
                }
                // Keep the batch; the redo is idempotent so the next idle
                // transition can simply try again.
                Err(_) => {
                    state.force_commit = true;
                    state.unsettled = true;
                }
            }
        }
        self.wakeup.notify_waiters();
        result
    }

    /// Commit everything logged so far, if no other transaction is open.
    /// Otherwise the commit happens when the last open transaction ends.
    pub async fn sync(&self) -> Result<()> {
        self.force_commit();
        self.begin_op().await;
        self.end_op().await
    }

    async fn commit(&self, header: &LogHeader, unsettled: bool) -> Result<()> {
        if header.is_empty() {
            return Ok(());
        }

        let running = self.counters.running_commits.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_concurrent_commits
            .fetch_max(running, Ordering::SeqCst);

        let result = self.write_and_install(header, unsettled).await;
        self.counters.running_commits.fetch_sub(1, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                self.counters.commits.fetch_add(1, Ordering::SeqCst);
                self.counters
                    .blocks_committed
                    .fetch_add(header.len() as u64, Ordering::SeqCst);
                log::debug!("dev {}: committed {} blocks", self.dev, header.len());
            }
            Err(e) => {
                self.counters.failed_commits.fetch_add(1, Ordering::SeqCst);
                log::error!(
                    "dev {}: commit of {} blocks failed: {}",
                    self.dev,
                    header.len(),
                    e
                );
            }
        }
        result
    }

    async fn write_and_install(&self, header: &LogHeader, unsettled: bool) -> Result<()> {
        if unsettled {
            self.settle_disk_log().await?;
        }
        self.write_log(header).await?;
        self.write_head(header).await?; // the commit point
        self.install_trans(header, false).await?;
        self.write_head(&LogHeader::default()).await
    }

    /// Copy the cached contents of every logged block into its log slot
    async fn write_log(&self, header: &LogHeader) -> Result<()> {
        // Slots are independent until the header names them, so order is free.
        let copies = header.blocks().iter().enumerate().map(|(slot, &home)| async move {
            let from = self.cache.read_block(home).await?;
            self.cache.write_block(self.slot_block(slot), from.data()).await?;
            log::trace!("dev {}: block {} -> log slot {}", self.dev, home, slot);
            Ok::<_, Error>(())
        });
        futures::future::try_join_all(copies).await?;
        self.cache.device().sync().await?;
        Ok(())
    }

    /// Finish whatever batch a failed commit left named by the on-disk
    /// header, then clear the header, so no slot it names is rewritten while
    /// recovery could still replay it.
    async fn settle_disk_log(&self) -> Result<()> {
        let on_disk = self.read_head().await?;
        if on_disk.is_empty() {
            return Ok(());
        }
        log::warn!(
            "dev {}: finishing {} blocks of an interrupted commit",
            self.dev,
            on_disk.len()
        );
        let device = self.cache.device();
        for (slot, &home) in on_disk.blocks().iter().enumerate() {
            let from = self.cache.read_block(self.slot_block(slot)).await?;
            // Bypass the cache: its copy of `home` may hold a newer staged update.
            device.write_block(home, from.data()).await?;
        }
        device.sync().await?;
        self.write_head(&LogHeader::default()).await
    }

    /// Copy every log slot to its home location
    async fn install_trans(&self, header: &LogHeader, recovering: bool) -> Result<()> {
        for (slot, &home) in header.blocks().iter().enumerate() {
            let from = self.cache.read_block(self.slot_block(slot)).await?;
            self.cache.write_block(home, from.data()).await?;
        }
        if !recovering {
            for &home in header.blocks() {
                self.cache.unpin(home)?;
            }
        }
        Ok(())
    }

    async fn read_head(&self) -> Result<LogHeader> {
        let block = self.cache.read_block(self.start).await?;
        LogHeader::decode(block.data(), self.size - 1)
    }

    async fn write_head(&self, header: &LogHeader) -> Result<()> {
        self.cache.write_block(self.start, &header.encode()).await?;
        self.cache.device().sync().await?;
        Ok(())
    }

    async fn recover(&self) -> Result<()> {
        let header = self.read_head().await?;
        if header.is_empty() {
            log::info!("dev {}: log is clean", self.dev);
        } else {
            log::info!(
                "dev {}: replaying {} committed blocks from the log",
                self.dev,
                header.len()
            );
            self.install_trans(&header, true).await?;
            self.counters
                .blocks_recovered
                .fetch_add(header.len() as u64, Ordering::SeqCst);
        }
        self.write_head(&LogHeader::default()).await
    }

    fn slot_block(&self, slot: usize) -> u64 {
        self.start + 1 + slot as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_state(logged: usize, pending: usize) -> LogState {
        let mut header = LogHeader::with_capacity(LOGSIZE - 1);
        for n in 0..logged {
            header.push(100 + n as u64);
        }
        LogState {
            header,
            outstanding: 0,
            committing: false,
            pending_writes: pending,
            last_commit_tick: 10,
            force_commit: false,
            unsettled: false,
        }
    }

    #[test]
    fn test_policy_defers_small_recent_batches() {
        let config = LogConfig::default();
        assert!(!idle_state(1, 1).should_commit(10, &config, LOGSIZE));
        assert!(!idle_state(2, 2).should_commit(11, &config, LOGSIZE));
    }

    #[test]
    fn test_policy_count_trigger() {
        let config = LogConfig::default();
        assert!(idle_state(3, 3).should_commit(10, &config, LOGSIZE));
    }

    #[test]
    fn test_policy_time_trigger() {
        let config = LogConfig::default();
        assert!(idle_state(1, 1).should_commit(12, &config, LOGSIZE));
        // Nothing pending, nothing to hurry.
        assert!(!idle_state(0, 0).should_commit(1_000, &config, LOGSIZE));
    }

    #[test]
    fn test_policy_capacity_trigger() {
        let config = LogConfig::default();
        // 17 + 10 = 27, exactly at the margin: still fine.
        assert!(!idle_state(17, 1).should_commit(10, &config, LOGSIZE));
        // 18 + 10 > 27: the next operation could run out of room.
        assert!(idle_state(18, 1).should_commit(10, &config, LOGSIZE));
    }

    #[test]
    fn test_policy_force() {
        let config = LogConfig::default();
        let mut state = idle_state(0, 0);
        state.force_commit = true;
        assert!(state.should_commit(10, &config, LOGSIZE));
    }

    #[test]
    fn test_admission() {
        let mut state = idle_state(0, 0);
        state.outstanding = 2;
        assert!(state.admits(MAXOPBLOCKS, LOGSIZE));
        state.outstanding = 3;
        assert!(!state.admits(MAXOPBLOCKS, LOGSIZE));

        let mut state = idle_state(1, 0);
        state.outstanding = 2;
        assert!(!state.admits(MAXOPBLOCKS, LOGSIZE));

        let mut state = idle_state(0, 0);
        state.committing = true;
        assert!(!state.admits(MAXOPBLOCKS, LOGSIZE));
    }

    #[test]
    fn test_config_validation() {
        let config = LogConfig::default();
        assert!(config.validate(LOGSIZE).is_ok());
        assert!(matches!(config.validate(1), Err(Error::InvalidConfig(_))));
        assert!(matches!(config.validate(10), Err(Error::InvalidConfig(_))));

        let parsed: LogConfig = serde_json::from_str(r#"{"batch_threshold": 5}"#).unwrap();
        assert_eq!(parsed.batch_threshold, 5);
        assert_eq!(parsed.log_size, LOGSIZE);
    }
}
