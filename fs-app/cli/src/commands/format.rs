//! Format command for creating WalFS images

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::io::Write;
use std::path::PathBuf;

use walfs::format;
use walfs::modules::journaling::LOGSIZE;
use walfs::{BlockDevice, FileBackedBlockDevice};

/// Create and format a WalFS image
#[derive(Parser, Debug)]
#[command(about = "Create and format a WalFS image")]
pub struct FormatArgs {
    /// Image file to create
    pub image: PathBuf,

    /// Size of the image in blocks
    #[arg(short, long, default_value_t = 1024)]
    pub blocks: u64,

    /// Size of the log region in blocks, header included
    #[arg(short, long, default_value_t = LOGSIZE as u64)]
    pub log_blocks: u64,

    /// Overwrite an existing image without confirmation
    #[arg(short, long)]
    pub force: bool,
}

pub async fn run(args: FormatArgs) -> Result<()> {
    info!("WalFS Format Tool v{}", env!("CARGO_PKG_VERSION"));

    if args.log_blocks + 1 > args.blocks {
        return Err(anyhow!(
            "A {}-block log does not fit in a {}-block image",
            args.log_blocks,
            args.blocks
        ));
    }

    // Confirm before overwriting
    if args.image.exists() && !args.force {
        println!(
            "WARNING: {} already exists and will be overwritten.",
            args.image.display()
        );
        print!("Are you sure you want to continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    let mut device = FileBackedBlockDevice::create(&args.image, args.blocks)
        .await
        .with_context(|| format!("Failed to create image: {}", args.image.display()))?;

    let superblock = format::format_device(&device, args.log_blocks)
        .await
        .with_context(|| format!("Failed to format image: {}", args.image.display()))?;
    device.close().await?;

    println!(
        "Formatted {}: {} blocks, log at {}..{}, uuid {}",
        args.image.display(),
        superblock.block_count,
        superblock.log_start,
        superblock.first_data_block(),
        superblock.uuid_string()
    );

    Ok(())
}
