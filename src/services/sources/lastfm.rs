use crate::config::LastFmConfig;
use crate::error::{AppError, Result};
use crate::models::{LastFmCredentials, PlaybackSample, SourceKind};
use crate::services::sources::{SessionState, SourceSession};
use crate::services::store::ScrobbleStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// LastFM error code for an invalid or revoked session key
const INVALID_SESSION_KEY: i64 = 9;

/// A stored LastFM play older than this is never resumed as still playing
const RESUME_WINDOW: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecentTracksResponse {
    Error { error: i64, message: String },
    Tracks { recenttracks: RecentTracks },
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: Vec<RecentTrack>,
}

#[derive(Debug, Deserialize)]
struct RecentTrack {
    name: String,
    artist: TextField,
    album: Option<TextField>,
    #[serde(default)]
    mbid: String,
    #[serde(rename = "@attr")]
    attr: Option<TrackAttr>,
}

#[derive(Debug, Deserialize)]
struct TextField {
    #[serde(rename = "#text")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TrackAttr {
    #[serde(default)]
    nowplaying: String,
}

/// The track LastFM currently reports as playing, and when we first saw it.
#[derive(Debug, Clone, PartialEq)]
struct Current {
    artist: String,
    track: String,
    first_seen_ms: i64,
}

/// Build the `api_sig` for a LastFM call: md5 over the parameters sorted by
/// name, concatenated as name+value, followed by the shared secret.
/// `format` and `callback` are not signed.
pub fn api_signature(params: &[(&str, &str)], secret: &str) -> String {
    let mut signed: Vec<&(&str, &str)> = params
        .iter()
        .filter(|(name, _)| *name != "format" && *name != "callback")
        .collect();
    signed.sort_by(|a, b| a.0.cmp(b.0));

    let mut raw = String::new();
    for (name, value) in signed {
        raw.push_str(name);
        raw.push_str(value);
    }
    raw.push_str(secret);

    format!("{:x}", md5::compute(raw))
}

pub struct LastFmSession {
    state: SessionState,
    config: LastFmConfig,
    client: Client,
    store: Arc<dyn ScrobbleStore>,
    creds: Option<LastFmCredentials>,
    current: Option<Current>,
}

impl LastFmSession {
    pub fn new(
        state: SessionState,
        config: LastFmConfig,
        client: Client,
        store: Arc<dyn ScrobbleStore>,
    ) -> Self {
        Self {
            state,
            config,
            client,
            store,
            creds: None,
            current: None,
        }
    }

    async fn credentials(&mut self) -> Result<LastFmCredentials> {
        if self.creds.is_none() {
            self.creds = self.store.get_lastfm_credentials(&self.state.username).await?;
        }

        self.creds
            .clone()
            .ok_or_else(|| AppError::MissingCredentials(format!("lastfm user {}", self.state.username)))
    }

    /// LastFM reports neither duration nor progress, so the play start is the
    /// first tick that saw this track and progress is the time since then.
    /// A track only becomes a sample once a later tick still sees it playing.
    fn to_sample(&mut self, track: RecentTrack, now_ms: i64) -> Option<PlaybackSample> {
        let artist = track.artist.text;
        let seen_before = match &self.current {
            Some(current) if current.artist == artist && current.track == track.name => {
                Some(current.first_seen_ms)
            }
            _ => None,
        };

        let Some(first_seen_ms) = seen_before else {
            self.current = Some(Current {
                artist,
                track: track.name,
                first_seen_ms: now_ms,
            });
            return None;
        };

        Some(PlaybackSample {
            username: self.state.username.clone(),
            album_artist: Some(artist.clone()),
            artist,
            track: track.name,
            album: track.album.map(|a| a.text).filter(|a| !a.is_empty()),
            track_number: None,
            mbid: Some(track.mbid).filter(|m| !m.is_empty()),
            timestamp: first_seen_ms,
            progress_ms: now_ms - first_seen_ms,
            duration_ms: 0,
            source: SourceKind::LastFm,
        })
    }

    /// Pick up the play this user's previous session was tracking, so a
    /// restarted session keeps its start time instead of starting it over.
    async fn resume_current(&mut self) -> Result<()> {
        let Some(user) = self.store.get_user(&self.state.username).await? else {
            return Ok(());
        };
        let Some(latest) = self
            .store
            .get_latest_source_track(user.id, SourceKind::LastFm)
            .await?
        else {
            return Ok(());
        };

        let now_ms = Utc::now().timestamp_millis();
        if now_ms - latest.timestamp > RESUME_WINDOW.as_millis() as i64 {
            return Ok(());
        }

        self.current = Some(Current {
            artist: latest.artist_name,
            track: latest.track_name,
            first_seen_ms: latest.timestamp,
        });
        Ok(())
    }

    fn handle_response(&mut self, response: RecentTracksResponse, now_ms: i64) -> Result<Option<PlaybackSample>> {
        let recent = match response {
            RecentTracksResponse::Error { error, .. } if error == INVALID_SESSION_KEY => {
                return Err(AppError::AuthExpired);
            }
            RecentTracksResponse::Error { error, message } => {
                return Err(AppError::ExternalApi(format!("LastFM error {}: {}", error, message)));
            }
            RecentTracksResponse::Tracks { recenttracks } => recenttracks,
        };

        let playing = recent.track.into_iter().find(|t| {
            t.attr
                .as_ref()
                .map(|a| a.nowplaying.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        });

        match playing {
            Some(track) => Ok(self.to_sample(track, now_ms)),
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SourceSession for LastFmSession {
    fn kind(&self) -> SourceKind {
        SourceKind::LastFm
    }

    fn state(&self) -> &SessionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    async fn auth_with_db(&mut self) -> Result<()> {
        self.creds = self.store.get_lastfm_credentials(&self.state.username).await?;

        if self.creds.is_none() {
            tracing::warn!(
                username = %self.state.username,
                "No LastFM session stored yet, waiting for authorization"
            );
        }

        if self.current.is_none() {
            self.resume_current().await?;
        }

        Ok(())
    }

    async fn now_playing(&mut self) -> Result<Option<PlaybackSample>> {
        let creds = self.credentials().await?;

        let mut params = vec![
            ("method", "user.getrecenttracks"),
            ("user", creds.name.as_str()),
            ("limit", "1"),
            ("sk", creds.key.as_str()),
            ("api_key", self.config.api_key.as_str()),
            ("format", "json"),
        ];
        let signature = api_signature(&params, &self.config.secret);
        params.push(("api_sig", signature.as_str()));

        let response = self
            .client
            .get(&self.config.api_url)
            .query(&params)
            .send()
            .await?;

        // LastFM reports API errors as JSON bodies, often with a 4xx status
        let body = response.text().await?;
        let parsed: RecentTracksResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::ExternalApi(format!(
                "Failed to parse LastFM response: {} - Response: {}",
                e,
                body.chars().take(200).collect::<String>()
            ))
        })?;

        let sample = self.handle_response(parsed, Utc::now().timestamp_millis())?;
        if let Some(sample) = &sample {
            tracing::debug!(username = %self.state.username, "LastFM: {} - {}", sample.artist, sample.track);
        }
        Ok(sample)
    }

    /// LastFM session keys do not expire on their own; a rejected key can only
    /// be replaced by re-authorization, so pick up whatever is stored now.
    async fn refresh_credentials(&mut self) -> Result<()> {
        self.creds = None;
        self.credentials().await.map(|_| ())
    }
}
