use serde::{Deserialize, Serialize};

use super::SourceKind;

/// A single "currently playing" observation from one source.
///
/// Emitted once per poll tick while something is actively playing, never while
/// paused. Times are milliseconds; `timestamp` is the epoch time the play started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSample {
    pub username: String,
    pub artist: String,
    pub track: String,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<i64>,
    pub mbid: Option<String>,
    pub timestamp: i64,
    pub progress_ms: i64,
    pub duration_ms: i64,
    pub source: SourceKind,
}
