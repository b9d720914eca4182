//! Task snapshot persistence.

use crate::error::DatabaseError;
use crate::types::{Task, TaskId};
use crate::{Error, Result};

use super::{Database, TaskRow};

impl Database {
    /// List all persisted tasks, most recent first
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, episode, url, filename, status, progress,
                   loaded, total, failed, speed, error, created_at, completed_at
            FROM tasks
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Get a single persisted task
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, episode, url, filename, status, progress,
                   loaded, total, failed, speed, error, created_at, completed_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        row.map(Task::try_from).transpose()
    }

    /// Replace the persisted task list with `tasks` in a single transaction
    pub async fn replace_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM tasks")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear tasks: {}",
                    e
                )))
            })?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    id, title, episode, url, filename, status, progress,
                    loaded, total, failed, speed, error, created_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.episode)
            .bind(&task.url)
            .bind(&task.filename)
            .bind(task.status.as_str())
            .bind(f64::from(task.progress))
            .bind(task.loaded as i64)
            .bind(task.total as i64)
            .bind(task.failed as i64)
            .bind(&task.speed)
            .bind(&task.error)
            .bind(task.created_at)
            .bind(task.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert task {}: {}",
                    task.id, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit task snapshot: {}",
                e
            )))
        })?;

        Ok(())
    }
}
