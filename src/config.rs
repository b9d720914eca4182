//! Configuration types for hls-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (concurrency, timeouts, output)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum tasks running at the same time (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Parallel segment fetches within one task (default: 5)
    #[serde(default = "default_segment_concurrency")]
    pub segment_concurrency: usize,

    /// Timeout for a single segment request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub segment_timeout: Duration,

    /// Timeout for fetching the playlist itself (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub playlist_timeout: Duration,

    /// Directory finished files are written to (None = ephemeral delivery only)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// File collision handling in the output directory
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// How playlist lines are classified as segments
    #[serde(default)]
    pub segment_match: SegmentMatch,

    /// User agent sent with every request (None = reqwest default)
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            segment_concurrency: default_segment_concurrency(),
            segment_timeout: default_request_timeout(),
            playlist_timeout: default_request_timeout(),
            output_dir: None,
            file_collision: FileCollisionAction::default(),
            segment_match: SegmentMatch::default(),
            user_agent: None,
        }
    }
}

/// Retry configuration for segment fetches
///
/// The defaults give a fixed one-second pause between attempts and three
/// retries after the first failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./hls-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Most recent tasks kept in storage (default: 100)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            history_limit: default_history_limit(),
        }
    }
}

/// Main configuration for [`TaskQueue`](crate::TaskQueue)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Segment retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".into(),
                key: Some("max_concurrent_downloads".into()),
            });
        }
        if self.download.segment_concurrency == 0 {
            return Err(Error::Config {
                message: "segment_concurrency must be at least 1".into(),
                key: Some("segment_concurrency".into()),
            });
        }
        if self.download.segment_timeout.is_zero() {
            return Err(Error::Config {
                message: "segment_timeout must be greater than zero".into(),
                key: Some("segment_timeout".into()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be at least 1.0".into(),
                key: Some("backoff_multiplier".into()),
            });
        }
        Ok(())
    }

    /// Resolve the configuration a run should use
    ///
    /// Precedence: `overrides` > `stored` > `self`.
    pub fn effective(&self, stored: &Settings, overrides: &Settings) -> Config {
        let mut config = self.clone();
        stored.apply_to(&mut config);
        overrides.apply_to(&mut config);
        config
    }
}

/// File collision handling when writing into the output directory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the filename (default)
    #[default]
    Rename,
    /// Overwrite the existing file
    Overwrite,
    /// Refuse to write
    Skip,
}

/// Rule for classifying a playlist line as a media segment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMatch {
    /// The path must end in a known media-segment extension (default)
    #[default]
    Strict,
    /// Also accept any line with a `/` or `.` that is not protocol-relative
    Lenient,
}

/// Partial settings layered over [`Config`]
///
/// Used both for the user's stored settings and for per-call overrides.
/// `None` fields leave the underlying value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Maximum tasks running at the same time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_downloads: Option<usize>,
    /// Parallel segment fetches within one task
    #[serde(default, alias = "maxConcurrent", skip_serializing_if = "Option::is_none")]
    pub segment_concurrency: Option<usize>,
    /// Segment timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_timeout_secs: Option<u64>,
    /// Retries per segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Rename instead of overwriting existing files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_rename: Option<bool>,
}

impl Settings {
    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        *self == Settings::default()
    }

    /// Merge `other` over `self`, `other` winning where set
    pub fn merged(&self, other: &Settings) -> Settings {
        Settings {
            max_concurrent_downloads: other
                .max_concurrent_downloads
                .or(self.max_concurrent_downloads),
            segment_concurrency: other.segment_concurrency.or(self.segment_concurrency),
            segment_timeout_secs: other.segment_timeout_secs.or(self.segment_timeout_secs),
            retry_count: other.retry_count.or(self.retry_count),
            auto_rename: other.auto_rename.or(self.auto_rename),
        }
    }

    fn apply_to(&self, config: &mut Config) {
        if let Some(n) = self.max_concurrent_downloads {
            config.download.max_concurrent_downloads = n;
        }
        if let Some(n) = self.segment_concurrency {
            config.download.segment_concurrency = n;
        }
        if let Some(secs) = self.segment_timeout_secs {
            config.download.segment_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.retry_count {
            config.retry.max_attempts = n;
        }
        if let Some(rename) = self.auto_rename {
            config.download.file_collision = if rename {
                FileCollisionAction::Rename
            } else {
                FileCollisionAction::Overwrite
            };
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_segment_concurrency() -> usize {
    5
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./hls-dl.db")
}

fn default_history_limit() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
