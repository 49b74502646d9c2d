// ABOUTME: Checkpoint stores for the tailer - persist the last emitted watermark
// ABOUTME: File-backed store for production, in-memory store for tests and dry runs

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::record::Watermark;
use crate::utils::sync_parent_dir;

/// Durable home of the watermark.
///
/// The poller is the only writer. `load` is called once at startup and `save`
/// after every non-empty batch.
#[allow(async_fn_in_trait)]
pub trait CheckpointStore {
    /// Return the stored watermark, or [`Watermark::EPOCH`] if nothing has been
    /// stored yet.
    async fn load(&self) -> Result<Watermark>;

    /// Replace the stored watermark with `watermark`.
    async fn save(&mut self, watermark: Watermark) -> Result<()>;
}

/// Checkpoint kept in a small text file holding one RFC 3339 timestamp.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default checkpoint location, relative to the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("last_timestamp.state")
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Watermark> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    "No checkpoint at {:?}, starting from {}",
                    self.path,
                    Watermark::EPOCH
                );
                return Ok(Watermark::EPOCH);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read checkpoint from {:?}", self.path))
            }
        };

        if contents.trim().is_empty() {
            tracing::info!(
                "Checkpoint {:?} is empty, starting from {}",
                self.path,
                Watermark::EPOCH
            );
            return Ok(Watermark::EPOCH);
        }

        let watermark = contents
            .parse::<Watermark>()
            .with_context(|| format!("Failed to parse checkpoint {:?}", self.path))?;
        tracing::info!("Loaded checkpoint {} from {:?}", watermark, self.path);
        Ok(watermark)
    }

    async fn save(&mut self, watermark: Watermark) -> Result<()> {
        // Write to a sibling file and rename over the checkpoint, so a crash
        // leaves either the previous value or the new one, never a torn file.
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("Failed to create {:?}", temp_path))?;
            file.write_all(watermark.to_string().as_bytes())
                .await
                .with_context(|| format!("Failed to write checkpoint to {:?}", temp_path))?;
            file.sync_all()
                .await
                .with_context(|| format!("Failed to sync {:?}", temp_path))?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace checkpoint {:?}", self.path))?;
        // The rename is only durable once the directory entry is synced.
        if let Err(e) = sync_parent_dir(&self.path).await {
            tracing::warn!("Failed to sync directory of checkpoint {:?}: {}", self.path, e);
        }
        tracing::debug!("Saved checkpoint {} to {:?}", watermark, self.path);
        Ok(())
    }
}

/// Checkpoint held in memory. Keeps every saved value in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    current: Option<Watermark>,
    history: Vec<Watermark>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted watermark.
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self {
            current: Some(watermark),
            history: Vec::new(),
        }
    }

    /// The stored watermark, or `None` if nothing was ever stored.
    pub fn current(&self) -> Option<Watermark> {
        self.current
    }

    /// Every watermark passed to `save`, oldest first.
    pub fn history(&self) -> &[Watermark] {
        &self.history
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Watermark> {
        Ok(self.current.unwrap_or(Watermark::EPOCH))
    }

    async fn save(&mut self, watermark: Watermark) -> Result<()> {
        self.current = Some(watermark);
        self.history.push(watermark);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn watermark(value: &str) -> Watermark {
        Watermark::new(
            DateTime::parse_from_rfc3339(value)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_epoch() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("missing.state"));
        assert_eq!(store.load().await.unwrap(), Watermark::EPOCH);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_load_empty_file_returns_epoch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.state");
        std::fs::write(&path, "  \n").unwrap();
        let store = FileCheckpointStore::new(&path);
        assert_eq!(store.load().await.unwrap(), Watermark::EPOCH);
    }

    #[tokio::test]
    async fn test_load_garbage_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.state");
        std::fs::write(&path, "not a timestamp").unwrap();
        let store = FileCheckpointStore::new(&path);
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ts.state");
        let mut store = FileCheckpointStore::new(&path);

        let w = watermark("2024-01-01T00:00:03Z");
        store.save(w).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2024-01-01T00:00:03Z");
        assert_eq!(store.load().await.unwrap(), w);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_instead_of_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ts.state");
        let mut store = FileCheckpointStore::new(&path);

        store
            .save(watermark("2024-01-01T00:00:03.123456Z"))
            .await
            .unwrap();
        store.save(watermark("2024-01-01T00:00:04Z")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2024-01-01T00:00:04Z");
    }

    #[tokio::test]
    async fn test_save_leaves_only_checkpoint_in_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ts.state");
        let mut store = FileCheckpointStore::new(&path);

        store.save(watermark("2024-01-01T00:00:01Z")).await.unwrap();
        store.save(watermark("2024-01-01T00:00:02Z")).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("ts.state")]);
        assert!(crate::utils::sync_parent_dir(&path).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let mut store = FileCheckpointStore::new(dir.path().join("nope").join("ts.state"));
        assert!(store.save(Watermark::EPOCH).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_tracks_history() {
        let mut store = MemoryCheckpointStore::new();
        assert_eq!(store.load().await.unwrap(), Watermark::EPOCH);
        assert!(store.current().is_none());

        store.save(watermark("2024-01-01T00:00:01Z")).await.unwrap();
        store.save(watermark("2024-01-01T00:00:02Z")).await.unwrap();

        assert_eq!(
            store.load().await.unwrap(),
            watermark("2024-01-01T00:00:02Z")
        );
        assert_eq!(store.history().len(), 2);
    }
}
