//! Where snapshot bytes go

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Destination for snapshot bytes
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()>;

    async fn read_snapshot(&self) -> Result<Vec<u8>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Snapshot file written through a temp file and a rename
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    path: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotSink for FileSnapshotSink {
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::InvalidInput(
                format!("no snapshot at {}", self.path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory sink for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySnapshotSink {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SnapshotSink for MemorySnapshotSink {
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<Vec<u8>> {
        self.contents()
            .ok_or_else(|| Error::InvalidInput("no snapshot has been written".to_string()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_sink_round_trip_creates_parent() {
        let dir = TempDir::new().unwrap();
        let sink = FileSnapshotSink::new(dir.path().join("nested").join("kb.json"));

        sink.write_snapshot(b"{\"a\":1}").await.unwrap();
        sink.write_snapshot(b"{\"a\":2}").await.unwrap();

        assert_eq!(sink.read_snapshot().await.unwrap(), b"{\"a\":2}");
        assert!(!sink.temp_path().exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let sink = FileSnapshotSink::new(dir.path().join("absent.json"));
        assert!(matches!(sink.read_snapshot().await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemorySnapshotSink::new();
        assert!(sink.read_snapshot().await.is_err());
        sink.write_snapshot(b"abc").await.unwrap();
        assert_eq!(sink.read_snapshot().await.unwrap(), b"abc");
    }
}
