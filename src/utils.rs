//! Utility functions for filenames, paths and human-readable formatting

use crate::config::FileCollisionAction;
use crate::error::SinkError;
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Characters that are not allowed in filenames on common platforms
const INVALID_FILENAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replace characters that are invalid in filenames with `_`
///
/// # Examples
///
/// ```
/// use hls_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b:c"), "a_b_c");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For `Rename`, returns `movie (1).mp4`, `movie (2).mp4`, ... when the
/// original path is taken. For `Skip`, returns an error if the file exists.
/// For `Overwrite`, returns the original path unchanged.
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf, SinkError> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(SinkError::Collision {
                    path: path.to_path_buf(),
                });
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| SinkError::Write {
                    path: path.to_path_buf(),
                    reason: "cannot extract file stem".to_string(),
                })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(SinkError::Collision {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Format a byte count, e.g. `1536` -> `"1.5 KB"`
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a transfer rate from bytes and elapsed seconds, e.g. `"1.5 MB/s"`
#[must_use]
pub fn format_speed(bytes: u64, elapsed_secs: f64) -> String {
    let bps = if elapsed_secs > 0.0 {
        (bytes as f64 / elapsed_secs) as u64
    } else {
        0
    };
    format!("{}/s", format_bytes(bps))
}
