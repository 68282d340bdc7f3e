//! Bench command: drive the log and the name cache with a synthetic workload

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{debug, info};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use walfs::format::read_superblock;
use walfs::{LogManager, NameCache};

use super::{load_config, mount, DEV};

/// Blocks each task rewrites
const TASK_SPAN: u64 = 16;
/// Inode number of the root directory
const ROOT_INUM: u64 = 1;

/// Run a group-commit and name-cache workload
#[derive(Parser, Debug)]
#[command(about = "Run a group-commit and name-cache workload against a WalFS image")]
pub struct BenchArgs {
    /// Image file to run against (its data blocks are overwritten)
    pub image: PathBuf,

    /// Concurrent tasks issuing transactions
    #[arg(short, long, default_value_t = 4)]
    pub tasks: u64,

    /// Transactions per task
    #[arg(short, long, default_value_t = 100)]
    pub ops: u64,

    /// JSON log configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: BenchArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let log = mount(&args.image, config).await?;

    let superblock = read_superblock(log.cache().device().as_ref()).await?;
    let first = superblock.first_data_block();
    if first + args.tasks * TASK_SPAN > superblock.block_count {
        return Err(anyhow!(
            "{} tasks need {} data blocks, the image has {}",
            args.tasks,
            args.tasks * TASK_SPAN,
            superblock.block_count.saturating_sub(first)
        ));
    }

    run_log_workload(&log, first, &args).await?;
    run_name_cache_workload(args.tasks * args.ops);
    Ok(())
}

async fn run_log_workload(log: &Arc<LogManager>, first: u64, args: &BenchArgs) -> Result<()> {
    info!(
        "Log workload: {} tasks x {} transactions",
        args.tasks, args.ops
    );
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.tasks as usize);
    for task in 0..args.tasks {
        let log = log.clone();
        let ops = args.ops;
        let base = first + task * TASK_SPAN;
        handles.push(tokio::spawn(async move {
            for i in 0..ops {
                log.begin_op().await;
                // One to three blocks per transaction, overlapping the next one.
                for k in 0..=(i % 3) {
                    let block_num = base + (i + k) % TASK_SPAN;
                    let mut block = log.cache().read_block(block_num).await?;
                    block.data_mut()[..8].copy_from_slice(&i.to_le_bytes());
                    log.log_write(&block)?;
                }
                log.end_op().await?;
            }
            Ok::<_, walfs::Error>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }
    log.sync().await?;

    let elapsed = started.elapsed();
    let stats = log.stats();
    let total = args.tasks * args.ops;
    debug!("{:?}", log.status());

    println!("Group commit:");
    println!(
        "  Transactions:  {} in {:.3}s ({:.0}/s)",
        total,
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Commits:       {}", stats.commits);
    println!("  Deferred:      {}", stats.deferred);
    println!("  Failed:        {}", stats.failed_commits);
    println!("  Blocks:        {}", stats.blocks_committed);
    if stats.commits > 0 {
        println!(
            "  Per commit:    {:.1} transactions, {:.1} blocks",
            total as f64 / stats.commits as f64,
            stats.blocks_committed as f64 / stats.commits as f64
        );
    }
    println!("  Recovered:     {}", stats.blocks_recovered);
    Ok(())
}

/// A directory tree standing in for on-disk directories
struct Tree {
    entries: HashMap<(u64, String), u64>,
    next_inum: u64,
}

impl Tree {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_inum: ROOT_INUM + 1,
        }
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut parent = ROOT_INUM;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            let next = &mut self.next_inum;
            parent = *self
                .entries
                .entry((parent, name.to_string()))
                .or_insert_with(|| {
                    *next += 1;
                    *next - 1
                });
        }
    }

    /// Resolve `path` component by component, consulting the cache first
    fn resolve(&self, cache: &NameCache, path: &str) -> Option<u64> {
        let mut inum = ROOT_INUM;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            inum = match cache.lookup(DEV, inum, name) {
                Some(child) => child,
                None => {
                    let child = *self.entries.get(&(inum, name.to_string()))?;
                    cache.add(DEV, inum, name, child);
                    child
                }
            };
        }
        Some(inum)
    }
}

fn run_name_cache_workload(lookups: u64) {
    let paths = [
        "/usr/lib/walfs/log",
        "/usr/lib/walfs/cache",
        "/usr/share/doc/walfs",
        "/home/user/projects/walfs/src",
        "/home/user/projects/walfs/tests",
        "/var/log/walfs",
        "/etc/walfs",
    ];
    let mut tree = Tree::new();
    for path in paths {
        tree.mkdir_p(path);
    }

    info!("Name cache workload: {} resolutions", lookups);
    let cache: NameCache = NameCache::new();
    for i in 0..lookups {
        let path = paths[(i % paths.len() as u64) as usize];
        if tree.resolve(&cache, path).is_none() {
            debug!("{} did not resolve", path);
        }
        // Renaming a directory drops the entries for it.
        if i % 97 == 96 {
            if let Some(inum) = tree.resolve(&cache, "/usr/lib/walfs") {
                cache.invalidate(DEV, inum);
            }
        }
    }

    // With -v the report goes through the logger alongside the rest.
    if log::log_enabled!(log::Level::Info) {
        cache.log_report();
    } else {
        println!("{}", cache.report());
    }
}
