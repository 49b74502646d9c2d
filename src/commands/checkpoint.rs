// ABOUTME: `checkpoint` command - inspect or move the stored watermark
// ABOUTME: Refuses to move the watermark backwards unless --force is given

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

use crate::tail::{CheckpointStore, FileCheckpointStore, Watermark};

#[derive(Args)]
pub struct CheckpointArgs {
    #[command(subcommand)]
    command: CheckpointCommands,
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Show the stored watermark
    Show,
    /// Store a new watermark (records at or before it will not be emitted)
    Set {
        /// RFC 3339 timestamp, e.g. 2024-01-01T00:00:00Z
        timestamp: String,
        /// Allow moving the watermark backwards (records after it are emitted again)
        #[arg(long)]
        force: bool,
    },
}

pub async fn command(args: CheckpointArgs, path: &Path) -> Result<()> {
    let mut store = FileCheckpointStore::new(path);
    match args.command {
        CheckpointCommands::Show => {
            let watermark = store.load().await.context("Failed to load checkpoint")?;
            if path.exists() {
                println!("Checkpoint {:?}: {}", path, watermark);
            } else {
                println!("Checkpoint {:?} does not exist (starts at {})", path, watermark);
            }
        }
        CheckpointCommands::Set { timestamp, force } => {
            let current = store.load().await.context("Failed to load checkpoint")?;
            let requested: Watermark = timestamp.parse()?;
            if requested < current && !force {
                bail!(
                    "Refusing to move checkpoint backwards from {} to {}. \
                     Use --force to re-emit records after {}",
                    current,
                    requested,
                    requested
                );
            }
            store.save(requested).await.context("Failed to save checkpoint")?;
            println!("Checkpoint {:?} set to {} (was {})", path, requested, current);
        }
    }
    Ok(())
}
