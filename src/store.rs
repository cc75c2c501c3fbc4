//! Persistence of finished stories.
//!
//! The pipeline never persists anything itself; [`crate::request::StoryService`]
//! hands each finished story to a [`StoryStore`] as one [`StoryRecord`],
//! and appends each continuation passage to the stored `text_content`.
//! Every write is best-effort: a failure is logged and the story is still
//! returned to the caller.

use crate::error::StoryError;
use crate::output::StoryRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Write contract for finished stories.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Insert one record. No retries happen at this layer.
    async fn insert(&self, record: &StoryRecord) -> Result<(), StoryError>;

    /// Append one passage to the `text_content` of the story with `id`.
    async fn append_text(&self, id: Uuid, text: &str) -> Result<(), StoryError>;
}

// ── JSON files ───────────────────────────────────────────────────────────

/// One pretty-printed `<id>.json` file per story in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write(&self, record: &StoryRecord) -> Result<(), StoryError> {
        let path = self.path_for(record.id);
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            StoryError::PersistFailed(format!("{} {}: {}", what, path.display(), e))
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| fail("create", &e))?;

        let json = serde_json::to_vec_pretty(record).map_err(|e| fail("encode", &e))?;

        // Atomic write: temp file in the same directory, then rename.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| fail("write", &e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| fail("rename", &e))?;
        Ok(())
    }

    /// Read a record back by id.
    pub async fn load(&self, id: Uuid) -> Result<StoryRecord, StoryError> {
        let path = self.path_for(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StoryError::PersistFailed(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoryError::PersistFailed(format!("decode {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl StoryStore for JsonFileStore {
    async fn insert(&self, record: &StoryRecord) -> Result<(), StoryError> {
        self.write(record).await?;
        debug!("Persisted story {} to {}", record.id, self.path_for(record.id).display());
        Ok(())
    }

    async fn append_text(&self, id: Uuid, text: &str) -> Result<(), StoryError> {
        let mut record = self.load(id).await?;
        record.text_content.push(text.to_string());
        self.write(&record).await?;
        debug!("Appended passage {} to story {}", record.text_content.len(), id);
        Ok(())
    }
}

// ── In memory ────────────────────────────────────────────────────────────

/// In-memory store for tests and embedding. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<StoryRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of every stored record, in insertion order.
    pub async fn records(&self) -> Vec<StoryRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl StoryStore for InMemoryStore {
    async fn insert(&self, record: &StoryRecord) -> Result<(), StoryError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn append_text(&self, id: Uuid, text: &str) -> Result<(), StoryError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoryError::PersistFailed(format!("story {} not found", id)))?;
        record.text_content.push(text.to_string());
        Ok(())
    }
}
