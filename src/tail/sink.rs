// ABOUTME: Append-only sinks that receive formatted log lines
// ABOUTME: FileSink writes each batch with one write and syncs before returning

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::utils::sync_parent_dir;

/// Destination for formatted lines.
#[allow(async_fn_in_trait)]
pub trait LogSink {
    /// Append `lines` in order, each followed by a newline.
    ///
    /// When this returns `Ok`, every line is durable.
    async fn append(&mut self, lines: &[String]) -> Result<()>;
}

/// Appends to a text file.
///
/// The file is created on first append. Its directory must already exist.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default sink location, relative to the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("logs/app.log")
    }
}

impl LogSink for FileSink {
    async fn append(&mut self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buffer.push_str(line);
            buffer.push('\n');
        }

        let created = !fs::try_exists(&self.path).await.unwrap_or(false);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open sink {:?}", self.path))?;

        file.write_all(buffer.as_bytes())
            .await
            .with_context(|| format!("Failed to append {} lines to {:?}", lines.len(), self.path))?;
        file.sync_data()
            .await
            .with_context(|| format!("Failed to sync sink {:?}", self.path))?;
        if created {
            if let Err(e) = sync_parent_dir(&self.path).await {
                tracing::warn!("Failed to sync directory of sink {:?}: {}", self.path, e);
            }
        }

        tracing::trace!("Appended {} lines to {:?}", lines.len(), self.path);
        Ok(())
    }
}
