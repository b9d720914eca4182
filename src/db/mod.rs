//! Database layer for hls-dl
//!
//! Handles SQLite persistence for task records and stored settings.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task snapshot reads and writes
//! - [`settings`] - Stored settings overlay

use crate::config::Settings;
use crate::error::{DatabaseError, Error, Result};
use crate::store::TaskStore;
use crate::types::{Task, TaskId, TaskStatus};
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod settings;
mod tasks;

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task ID
    pub id: i64,
    /// Display title
    pub title: String,
    /// Episode label
    pub episode: Option<String>,
    /// Playlist URL
    pub url: String,
    /// Target filename
    pub filename: String,
    /// Status name (see [`TaskStatus::as_str`])
    pub status: String,
    /// Progress percentage (0.0-100.0)
    pub progress: f64,
    /// Segments finished
    pub loaded: i64,
    /// Total segments
    pub total: i64,
    /// Segments failed
    pub failed: i64,
    /// Speed label
    pub speed: Option<String>,
    /// Last error summary
    pub error: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp when the task completed
    pub completed_at: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status: TaskStatus = row.status.parse().map_err(|e: String| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Task {} has invalid status: {}",
                row.id, e
            )))
        })?;

        Ok(Task {
            id: TaskId(row.id),
            title: row.title,
            episode: row.episode,
            url: row.url,
            filename: row.filename,
            status,
            progress: row.progress as f32,
            loaded: row.loaded.max(0) as usize,
            total: row.total.max(0) as usize,
            failed: row.failed.max(0) as usize,
            speed: row.speed,
            error: row.error,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// Database handle for hls-dl
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl TaskStore for Database {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks().await
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.replace_tasks(tasks).await
    }

    async fn load_settings(&self) -> Result<Settings> {
        self.get_settings().await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.set_settings(settings).await
    }
}
