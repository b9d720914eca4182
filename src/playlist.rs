//! Playlist parsing and segment URL resolution
//!
//! Handles single-rendition HLS media playlists. Master playlists are
//! detected with `m3u8-rs` and rejected; beyond that, tag semantics are
//! ignored and only the URI lines are read, in order.

use crate::config::SegmentMatch;
use crate::error::{Error, Result};
use m3u8_rs::{Playlist, parse_playlist_res};
use serde::{Deserialize, Serialize};
use url::Url;

/// Path extensions recognised as media segments
const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s", "mp4", "m4a", "m4v", "aac", "vtt"];

/// Path extensions marking a nested (variant) playlist
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u8", "m3u"];

/// Tag announcing a variant stream; the next URI line is that variant
const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

/// One addressable chunk of media referenced by the playlist
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Position in play order, starting at 0
    pub index: usize,
    /// Absolute segment URL
    pub url: String,
}

/// Parse playlist text into an ordered list of segments
///
/// Every URI line is resolved against `base_url`. Fails with
/// [`Error::Format`] for master playlists and when no segment line is found.
pub fn parse(content: &str, base_url: &str, rule: SegmentMatch) -> Result<Vec<Segment>> {
    let base = Url::parse(base_url)
        .map_err(|e| Error::Format(format!("invalid playlist URL {base_url}: {e}")))?;

    // text m3u8-rs cannot parse still goes through the line scan below
    if let Ok(Playlist::MasterPlaylist(master)) = parse_playlist_res(content.as_bytes()) {
        let variants = master.variants.iter().filter(|v| !v.is_i_frame).count();
        return Err(master_playlist_error(variants.max(1)));
    }

    let mut segments = Vec::new();
    let mut variant_refs = 0usize;
    let mut stream_variants = 0usize;
    let mut after_stream_inf = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if line.starts_with(STREAM_INF_TAG) {
                after_stream_inf = true;
            }
            continue;
        }

        // the URI after a stream-info tag names a variant, whatever its extension
        if std::mem::take(&mut after_stream_inf) {
            stream_variants += 1;
            continue;
        }
        if has_extension(line, PLAYLIST_EXTENSIONS) {
            variant_refs += 1;
            continue;
        }

        if !is_segment_line(line, rule) {
            tracing::debug!(line, "Skipping non-segment playlist line");
            continue;
        }

        let url = resolve(&base, line)?;
        segments.push(Segment {
            index: segments.len(),
            url,
        });
    }

    if stream_variants > 0 {
        return Err(master_playlist_error(stream_variants));
    }
    if segments.is_empty() {
        return Err(if variant_refs > 0 {
            master_playlist_error(variant_refs)
        } else {
            Error::Format("playlist contains no media segments".into())
        });
    }

    tracing::debug!(segments = segments.len(), base = base_url, "Parsed playlist");
    Ok(segments)
}

fn master_playlist_error(variants: usize) -> Error {
    Error::Format(format!(
        "master playlist with {variants} variant stream(s) and no media segments"
    ))
}

/// Resolve one playlist line to an absolute URL
///
/// Absolute `http(s)` and `data:` URIs are returned unchanged. Lines starting
/// with `/` resolve against the base origin, anything else against the base
/// URL's directory.
pub fn resolve(base: &Url, line: &str) -> Result<String> {
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
    {
        return Ok(line.to_string());
    }

    base.join(line)
        .map(String::from)
        .map_err(|e| Error::Format(format!("cannot resolve segment URI {line}: {e}")))
}

fn is_segment_line(line: &str, rule: SegmentMatch) -> bool {
    if line.to_ascii_lowercase().starts_with("data:") {
        return true;
    }
    if has_extension(line, SEGMENT_EXTENSIONS) {
        return true;
    }
    match rule {
        SegmentMatch::Strict => false,
        SegmentMatch::Lenient => {
            !line.starts_with("//") && (line.contains('/') || line.contains('.'))
        }
    }
}

/// Case-insensitive extension check on the path part of a URI line
fn has_extension(line: &str, extensions: &[&str]) -> bool {
    let path = line
        .split(['?', '#'])
        .next()
        .unwrap_or(line);
    let file = path.rsplit('/').next().unwrap_or(path);

    match file.rsplit_once('.') {
        Some((_, ext)) => extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)),
        None => false,
    }
}
