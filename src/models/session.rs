use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// External playback provider backing a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Spotify,
    #[serde(rename = "lastfm")]
    LastFm,
    #[serde(rename = "applemusic")]
    AppleMusic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Spotify => "spotify",
            SourceKind::LastFm => "lastfm",
            SourceKind::AppleMusic => "applemusic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spotify" => Ok(SourceKind::Spotify),
            "lastfm" => Ok(SourceKind::LastFm),
            "applemusic" | "apple_music" => Ok(SourceKind::AppleMusic),
            other => Err(AppError::Decode(format!("unknown source type: {}", other))),
        }
    }
}

/// Persisted, encoded state backing one source session.
///
/// The type tag is kept as raw text so that a record with an unknown tag fails
/// on its own instead of failing the whole query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub source_type: String,
    pub data: String,
    pub uid: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub kind: SourceKind,
    pub data: String,
    pub uid: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    #[serde(rename = "type")]
    pub source_type: String,
    pub active: bool,
}

impl From<SessionRecord> for SessionSummary {
    fn from(record: SessionRecord) -> Self {
        SessionSummary {
            id: record.id,
            source_type: record.source_type,
            active: record.active,
        }
    }
}
