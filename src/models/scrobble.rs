use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::PlaybackSample;

/// A persisted, confirmed play. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Scrobble {
    pub id: i64,
    pub uid: i64,
    pub artist_name: String,
    pub track_name: String,
    pub album_name: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<i64>,
    /// Track length in milliseconds
    pub duration: i64,
    /// Play start, epoch milliseconds
    pub timestamp: i64,
    pub source: Option<String>,
    pub mbid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScrobble {
    pub uid: i64,
    pub artist_name: String,
    pub track_name: String,
    pub album_name: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<i64>,
    pub duration: i64,
    pub timestamp: i64,
    pub source: Option<String>,
    pub mbid: Option<String>,
}

impl NewScrobble {
    pub fn from_sample(uid: i64, sample: &PlaybackSample) -> Self {
        Self {
            uid,
            artist_name: sample.artist.clone(),
            track_name: sample.track.clone(),
            album_name: sample.album.clone().filter(|s| !s.is_empty()),
            album_artist: sample.album_artist.clone().filter(|s| !s.is_empty()),
            track_number: sample.track_number,
            duration: sample.duration_ms,
            timestamp: sample.timestamp,
            source: Some(sample.source.as_str().to_string()),
            mbid: sample.mbid.clone().filter(|s| !s.is_empty()),
        }
    }
}

/// Payload pushed to live-update clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrobbleEvent {
    pub artist_name: String,
    pub track_name: String,
    pub timestamp: i64,
}

impl From<&Scrobble> for ScrobbleEvent {
    fn from(scrobble: &Scrobble) -> Self {
        ScrobbleEvent {
            artist_name: scrobble.artist_name.clone(),
            track_name: scrobble.track_name.clone(),
            timestamp: scrobble.timestamp,
        }
    }
}
