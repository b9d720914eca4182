//! Stored settings and the effective configuration.

use crate::config::{Config, Settings};
use crate::error::Result;
use crate::types::Event;

use super::TaskQueue;

impl TaskQueue {
    /// Get the stored settings overlay
    pub async fn settings(&self) -> Settings {
        self.state.lock().await.stored_settings.clone()
    }

    /// Configuration new runs get when no per-call overrides are given
    pub async fn effective_config(&self) -> Config {
        let state = self.state.lock().await;
        self.config
            .effective(&state.stored_settings, &Settings::default())
    }

    /// Merge `update` into the stored settings and persist them
    ///
    /// Fields left unset in `update` keep their stored value. Running jobs
    /// keep the configuration they were started with; a lower
    /// `max_concurrent_downloads` only holds back admission until enough
    /// of them finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the merged settings
    /// produce an invalid configuration. Nothing is stored in that case.
    pub async fn update_settings(&self, update: Settings) -> Result<Settings> {
        let mut state = self.state.lock().await;
        let merged = state.stored_settings.merged(&update);

        self.config
            .effective(&merged, &Settings::default())
            .validate()?;
        self.store.save_settings(&merged).await?;

        tracing::info!(settings = ?merged, "Settings updated");
        state.stored_settings = merged.clone();
        drop(state);

        self.emit_event(Event::SettingsChanged);
        self.wake.notify_one();
        Ok(merged)
    }
}
