//! Inspect command: superblock and on-disk log header of an image

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use walfs::format::{read_superblock, Superblock};
use walfs::modules::LogHeader;
use walfs::{BlockCache, FileBackedBlockDevice, LogManager};

/// Show the superblock and the on-disk log header
#[derive(Parser, Debug)]
#[command(about = "Show the superblock and the on-disk log header of a WalFS image")]
pub struct InspectArgs {
    /// Image file to inspect
    pub image: PathBuf,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Inspection<'a> {
    uuid: String,
    created: Option<String>,
    first_data_block: u64,
    superblock: &'a Superblock,
    /// Blocks named by the on-disk header; non-empty means a committed
    /// transaction is waiting to be installed
    log_header: &'a LogHeader,
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let device = Arc::new(
        FileBackedBlockDevice::open(&args.image, true)
            .await
            .with_context(|| format!("Failed to open image: {}", args.image.display()))?,
    );

    let superblock = read_superblock(device.as_ref())
        .await
        .with_context(|| format!("{} is not a WalFS image", args.image.display()))?;
    let cache = BlockCache::new(device, 4);
    let header = LogManager::read_disk_header(&cache, &superblock)
        .await
        .context("Failed to read the log header")?;

    let inspection = Inspection {
        uuid: superblock.uuid_string(),
        created: superblock
            .created_at()
            .map(|t| t.with_timezone(&chrono::Local).to_rfc3339()),
        first_data_block: superblock.first_data_block(),
        superblock: &superblock,
        log_header: &header,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("Image:        {}", args.image.display());
    println!("UUID:         {}", inspection.uuid);
    println!("Version:      {}", superblock.version);
    println!(
        "Created:      {}",
        inspection.created.as_deref().unwrap_or("unknown")
    );
    println!("Blocks:       {}", superblock.block_count);
    println!(
        "Log region:   {}..{} ({} slots)",
        superblock.log_start,
        inspection.first_data_block,
        superblock.log_blocks.saturating_sub(1)
    );
    if header.is_empty() {
        println!("Log header:   clean");
    } else {
        println!(
            "Log header:   {} committed blocks awaiting install: {:?}",
            header.len(),
            header.blocks()
        );
    }

    Ok(())
}
