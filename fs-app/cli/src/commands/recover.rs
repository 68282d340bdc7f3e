//! Recover command: mount the log once so a committed batch is replayed

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use super::{load_config, mount};

/// Replay any committed transaction left in the log
#[derive(Parser, Debug)]
#[command(about = "Replay any committed transaction left in a WalFS log")]
pub struct RecoverArgs {
    /// Image file to recover
    pub image: PathBuf,

    /// JSON log configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: RecoverArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    info!("Recovering {} with {:?}", args.image.display(), config);

    let log = mount(&args.image, config).await?;
    let replayed = log.stats().blocks_recovered;

    if replayed == 0 {
        println!("{}: log was clean", args.image.display());
    } else {
        println!(
            "{}: replayed {} committed blocks",
            args.image.display(),
            replayed
        );
    }
    Ok(())
}
