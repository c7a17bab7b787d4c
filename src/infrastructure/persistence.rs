//! Snapshot persistence
//!
//! The output file is a pretty-printed JSON array that gets wholly replaced
//! on every write. Writes go to a sibling temp file first and are renamed
//! into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::Record;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write snapshot to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Destination for accumulator snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Replace the stored snapshot, returning how many records were written.
    async fn write_snapshot(&self, records: &[Record]) -> Result<usize, PersistenceError>;
}

/// Writes snapshots to a JSON file on disk.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
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

#[async_trait]
impl SnapshotSink for JsonFileSink {
    async fn write_snapshot(&self, records: &[Record]) -> Result<usize, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(records)?;

        // Concurrent attempts share one output file.
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &bytes)
            .await
            .map_err(|e| PersistenceError::io(&temp, e))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        debug!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(records.len())
    }
}

/// Keeps every snapshot in memory, newest last.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshots(&self) -> Vec<Vec<Record>> {
        self.snapshots.lock().await.clone()
    }

    pub async fn latest(&self) -> Option<Vec<Record>> {
        self.snapshots.lock().await.last().cloned()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    async fn write_snapshot(&self, records: &[Record]) -> Result<usize, PersistenceError> {
        self.snapshots.lock().await.push(records.to_vec());
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_two_space_indented_array() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out.json"));

        let written = sink.write_snapshot(&[json!({"coinMint": "A"})]).await.unwrap();
        assert_eq!(written, 1);

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, "[\n  {\n    \"coinMint\": \"A\"\n  }\n]");
    }

    #[tokio::test]
    async fn later_snapshot_overwrites_earlier_one() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out.json"));

        sink.write_snapshot(&[json!({"id": 1}), json!({"id": 2})]).await.unwrap();
        sink.write_snapshot(&[json!({"id": 3})]).await.unwrap();

        let parsed: Vec<Record> =
            serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
        assert_eq!(parsed, vec![json!({"id": 3})]);
        assert!(!sink.temp_path().exists());
    }

    #[tokio::test]
    async fn empty_snapshot_is_still_written() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("nested/dir/out.json"));

        assert_eq!(sink.write_snapshot(&[]).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(sink.path()).unwrap(), "[]");
    }

    #[tokio::test]
    async fn field_order_is_preserved() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out.json"));
        let record: Record = serde_json::from_str(r#"{"z": 1, "a": 2, "coinMint": "M"}"#).unwrap();

        sink.write_snapshot(&[record]).await.unwrap();
        let text = std::fs::read_to_string(sink.path()).unwrap();
        let z = text.find("\"z\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        assert!(z < a);
    }

    #[tokio::test]
    async fn memory_sink_keeps_history() {
        let sink = MemorySink::new();
        sink.write_snapshot(&[json!({"id": 1})]).await.unwrap();
        sink.write_snapshot(&[]).await.unwrap();

        assert_eq!(sink.snapshots().await.len(), 2);
        assert_eq!(sink.latest().await, Some(vec![]));
    }
}
