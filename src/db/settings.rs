//! Stored settings overlay.

use crate::config::Settings;
use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const SETTINGS_KEY: &str = "user_settings";

impl Database {
    /// Load the stored settings overlay (empty if never saved)
    pub async fn get_settings(&self) -> Result<Settings> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(SETTINGS_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to load settings: {}",
                        e
                    )))
                })?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Settings::default()),
        }
    }

    /// Replace the stored settings overlay
    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(SETTINGS_KEY)
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save settings: {}",
                e
            )))
        })?;

        Ok(())
    }
}
