//! Core types for hls-dl

use serde::{Deserialize, Serialize};

use crate::sink::Delivery;
use crate::utils::sanitize_filename;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task status as seen by the queue and persisted to storage
///
/// `Parsing`, `Fetching`, `Merging` and `Delivering` are the active phases of a
/// running job; every one of them occupies a concurrency slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a free slot
    #[serde(alias = "queued")]
    Pending,
    /// Fetching and parsing the playlist
    Parsing,
    /// Downloading segments
    #[serde(alias = "active", alias = "downloading")]
    Fetching,
    /// Concatenating segment bytes
    Merging,
    /// Handing the artifact to the output sink
    Delivering,
    /// Stopped by the user, or interrupted by a restart
    Paused,
    /// Artifact delivered
    Completed,
    /// Failed with error
    Failed,
}

impl TaskStatus {
    /// Whether the task currently occupies a concurrency slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Parsing | TaskStatus::Fetching | TaskStatus::Merging | TaskStatus::Delivering
        )
    }

    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Lowercase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Parsing => "parsing",
            TaskStatus::Fetching => "fetching",
            TaskStatus::Merging => "merging",
            TaskStatus::Delivering => "delivering",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    /// Parses the lowercase name, including the legacy `queued`/`active`/`downloading`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "queued" => Ok(TaskStatus::Pending),
            "parsing" => Ok(TaskStatus::Parsing),
            "fetching" | "active" | "downloading" => Ok(TaskStatus::Fetching),
            "merging" => Ok(TaskStatus::Merging),
            "delivering" => Ok(TaskStatus::Delivering),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A user-visible, persisted unit of work
///
/// This is the JSON record written to storage. Unknown or missing optional
/// fields default so that records written by older versions still load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Display title (usually the show or video title)
    pub title: String,
    /// Episode label, when the task came from a batch selection
    #[serde(default)]
    pub episode: Option<String>,
    /// Playlist URL
    pub url: String,
    /// Target filename handed to the output sink
    pub filename: String,
    /// Current status
    pub status: TaskStatus,
    /// Progress percentage (0.0 to 100.0)
    #[serde(default)]
    pub progress: f32,
    /// Segments finished so far
    #[serde(default)]
    pub loaded: usize,
    /// Total segments in the playlist (0 until parsed)
    #[serde(default)]
    pub total: usize,
    /// Segments that failed after exhausting retries
    #[serde(default)]
    pub failed: usize,
    /// Human-readable speed, e.g. "1.5 MB/s"
    #[serde(default)]
    pub speed: Option<String>,
    /// Error summary of the last failure
    #[serde(default)]
    pub error: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp when the task completed
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Task {
    pub(crate) fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            title: spec.title,
            episode: spec.episode,
            url: spec.url,
            filename: spec.filename,
            status: TaskStatus::Pending,
            progress: 0.0,
            loaded: 0,
            total: 0,
            failed: 0,
            speed: None,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
            completed_at: None,
        }
    }

    /// Whether a persisted task had started transferring before it was stored
    pub fn was_mid_flight(&self) -> bool {
        self.status.is_active() || self.loaded > 0 || self.progress > 0.0
    }

    /// Reset progress counters and error before a fresh run
    pub(crate) fn reset_progress(&mut self) {
        self.progress = 0.0;
        self.loaded = 0;
        self.total = 0;
        self.failed = 0;
        self.speed = None;
        self.error = None;
        self.completed_at = None;
    }
}

/// Request to create a task
///
/// Batch submissions are an ordered list of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Display title
    pub title: String,
    /// Playlist URL
    pub url: String,
    /// Target filename
    pub filename: String,
    /// Episode label
    #[serde(default)]
    pub episode: Option<String>,
}

impl TaskSpec {
    /// Create a spec for a single playlist
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            filename: filename.into(),
            episode: None,
        }
    }

    /// Create a spec for one episode of a series
    ///
    /// The filename becomes `"{title} - {episode}.mp4"` with characters that
    /// are invalid in filenames replaced by `_`.
    pub fn episode(
        title: impl Into<String>,
        episode: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let episode = episode.into();
        let filename = format!("{}.mp4", sanitize_filename(&format!("{title} - {episode}")));
        Self {
            title,
            url: url.into(),
            filename,
            episode: Some(episode),
        }
    }

    /// Build specs for the selected episodes of a series
    ///
    /// `selected` holds 0-based positions into `episodes`; they are submitted in
    /// ascending order. Episodes without a URL and out-of-range positions are
    /// skipped, and unnamed episodes are labelled `"Episode {n}"`.
    pub fn from_episodes(title: &str, episodes: &[Episode], selected: &[usize]) -> Vec<TaskSpec> {
        let mut selected = selected.to_vec();
        selected.sort_unstable();
        selected.dedup();

        selected
            .into_iter()
            .filter_map(|index| {
                let episode = episodes.get(index)?;
                let url = episode.url.as_deref().filter(|u| !u.is_empty())?;
                let label = episode
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Episode {}", index + 1));
                Some(TaskSpec::episode(title, label, url))
            })
            .collect()
    }
}

/// An episode entry offered for batch selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Episode name, if the source provides one
    #[serde(default)]
    pub name: Option<String>,
    /// Playlist URL (also accepted as `link`)
    #[serde(default, alias = "link")]
    pub url: Option<String>,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Task title
        title: String,
    },

    /// Task moved to a new status
    StatusChanged {
        /// Task ID
        id: TaskId,
        /// New status
        status: TaskStatus,
        /// Human-readable status label
        label: String,
    },

    /// Segment progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Segments finished (success or failure)
        completed: usize,
        /// Total segments
        total: usize,
        /// Progress percentage (0 to 100)
        percent: u8,
        /// Bytes downloaded so far
        bytes: u64,
        /// Human-readable speed
        speed: String,
        /// Human-readable status label
        label: String,
    },

    /// A segment failed after exhausting its retries
    SegmentFailed {
        /// Task ID
        id: TaskId,
        /// Segment index
        index: usize,
        /// Segment URL
        url: String,
        /// Error message
        error: String,
    },

    /// Artifact delivered
    Completed {
        /// Task ID
        id: TaskId,
        /// Delivered filename
        filename: String,
        /// Artifact size in bytes
        size: u64,
        /// Number of segments merged
        segment_count: usize,
        /// Where the artifact went
        delivery: Delivery,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
        /// Number of segments that failed, when the failure came from fetching
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_segments: Option<usize>,
    },

    /// Task paused (cancelled or interrupted)
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Task removed from the queue
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Stored settings changed
    SettingsChanged,

    /// Queue shut down
    Shutdown,
}

/// Task counts per status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting for a slot
    pub pending: usize,
    /// Tasks occupying a slot
    pub active: usize,
    /// Paused tasks
    pub paused: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub failed: usize,
}

impl QueueStats {
    /// Total number of tasks counted
    pub fn total(&self) -> usize {
        self.pending + self.active + self.paused + self.completed + self.failed
    }
}
