//! Record sinks: where aggregated page records end up.
//!
//! The aggregator hands records over one at a time and treats a rejection
//! as a per-page failure, so a sink never needs to be transactional.

use crate::error::StoreError;
use crate::model::PersistedRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert one record into `collection`.
    async fn insert(&self, collection: &str, record: &PersistedRecord) -> Result<(), StoreError>;
}

/// Appends one JSON object per line to `<dir>/<collection>.jsonl`.
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    // Serialises appends so concurrent inserts never interleave lines.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn insert(&self, collection: &str, record: &PersistedRecord) -> Result<(), StoreError> {
        if collection.is_empty() || collection.contains(['/', '\\']) {
            return Err(StoreError::Rejected(format!(
                "invalid collection name '{collection}'"
            )));
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(collection);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(
            "Stored page {} of {} in {}",
            record.page_index,
            record.document_id,
            path.display()
        );
        Ok(())
    }
}

/// Keeps records in memory; handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, PersistedRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(collection, record)` inserted so far.
    pub fn records(&self) -> Vec<(String, PersistedRecord)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn insert(&self, collection: &str, record: &PersistedRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Rejected("memory sink poisoned".into()))?;
        records.push((collection.to_string(), record.clone()));
        Ok(())
    }
}
