//! Durable storage for task records and stored settings
//!
//! [`TaskStore`] is the seam the queue persists through. Three implementations
//! ship with the crate: SQLite ([`Database`](crate::db::Database)), a JSON
//! document on disk ([`JsonFileStore`]) and [`MemoryStore`].

use crate::config::Settings;
use crate::error::Result;
use crate::types::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Storage backend for the task list and stored settings
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load the persisted task list, most recent first
    async fn load_tasks(&self) -> Result<Vec<Task>>;

    /// Replace the persisted task list
    async fn save_tasks(&self, tasks: &[Task]) -> Result<()>;

    /// Load stored settings (empty when nothing was saved)
    async fn load_settings(&self) -> Result<Settings>;

    /// Replace stored settings
    async fn save_settings(&self, settings: &Settings) -> Result<()>;
}

/// Order tasks most-recent-first and keep at most `limit` of them
pub fn snapshot(tasks: &[Task], limit: usize) -> Vec<Task> {
    let mut ordered = tasks.to_vec();
    ordered.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    ordered.truncate(limit);
    ordered
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<Vec<Task>>,
    settings: Mutex<Settings>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with task records
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            settings: Mutex::new(Settings::default()),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().await.clone())
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        *self.tasks.lock().await = tasks.to_vec();
        Ok(())
    }

    async fn load_settings(&self) -> Result<Settings> {
        Ok(self.settings.lock().await.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    settings: Settings,
}

/// Stores everything in one JSON document
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by the file at `path` (created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<StoreDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(StoreDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, document: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.tasks)
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        document.tasks = tasks.to_vec();
        self.write(&document).await
    }

    async fn load_settings(&self) -> Result<Settings> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.settings)
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        document.settings = settings.clone();
        self.write(&document).await
    }
}
