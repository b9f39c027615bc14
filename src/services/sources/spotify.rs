use crate::config::SpotifyConfig;
use crate::error::{AppError, Result};
use crate::models::{PlaybackSample, SourceKind, SpotifyCredentials};
use crate::services::sources::{SessionState, SourceSession};
use crate::services::store::ScrobbleStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    /// Epoch ms of the last playback state change (play, skip, scrub...)
    timestamp: i64,
    progress_ms: Option<i64>,
    #[serde(default)]
    is_playing: bool,
    item: Option<SpotifyTrack>,
    #[serde(default)]
    actions: Actions,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    duration_ms: i64,
    track_number: Option<i64>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Actions {
    #[serde(default)]
    disallows: Disallows,
}

#[derive(Debug, Default, Deserialize)]
struct Disallows {
    /// Pausing is disallowed when playback is already paused
    #[serde(default)]
    pausing: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct SpotifySession {
    state: SessionState,
    config: SpotifyConfig,
    client: Client,
    store: Arc<dyn ScrobbleStore>,
    creds: Option<SpotifyCredentials>,
}

impl SpotifySession {
    pub fn new(
        state: SessionState,
        config: SpotifyConfig,
        client: Client,
        store: Arc<dyn ScrobbleStore>,
    ) -> Self {
        Self {
            state,
            config,
            client,
            store,
            creds: None,
        }
    }

    async fn credentials(&mut self) -> Result<SpotifyCredentials> {
        if self.creds.is_none() {
            self.creds = self.store.get_spotify_credentials(&self.state.username).await?;
        }

        self.creds
            .clone()
            .ok_or_else(|| AppError::MissingCredentials(format!("spotify user {}", self.state.username)))
    }

    fn to_sample(&self, playing: CurrentlyPlaying) -> Option<PlaybackSample> {
        if !playing.is_playing || playing.actions.disallows.pausing {
            return None;
        }

        let item = playing.item?;
        let artist = item.artists.first()?.name.clone();
        let (album, album_artist) = match item.album {
            Some(album) => {
                let album_artist = album
                    .artists
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| artist.clone());
                (Some(album.name), Some(album_artist))
            }
            None => (None, Some(artist.clone())),
        };

        Some(PlaybackSample {
            username: self.state.username.clone(),
            artist,
            track: item.name,
            album,
            album_artist,
            track_number: item.track_number,
            mbid: None,
            timestamp: playing.timestamp,
            progress_ms: playing.progress_ms.unwrap_or(0),
            duration_ms: item.duration_ms,
            source: SourceKind::Spotify,
        })
    }
}

#[async_trait]
impl SourceSession for SpotifySession {
    fn kind(&self) -> SourceKind {
        SourceKind::Spotify
    }

    fn state(&self) -> &SessionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    async fn auth_with_db(&mut self) -> Result<()> {
        self.creds = self.store.get_spotify_credentials(&self.state.username).await?;

        if self.creds.is_none() {
            tracing::warn!(
                username = %self.state.username,
                "No Spotify tokens stored yet, waiting for authorization"
            );
        }

        Ok(())
    }

    async fn now_playing(&mut self) -> Result<Option<PlaybackSample>> {
        let creds = self.credentials().await?;
        let url = format!("{}/v1/me/player/currently-playing", self.config.api_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&creds.access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED => Err(AppError::AuthExpired),
            status if status.is_success() => {
                let playing: CurrentlyPlaying = response
                    .json()
                    .await
                    .map_err(|e| AppError::ExternalApi(format!("Failed to parse Spotify response: {}", e)))?;

                let sample = self.to_sample(playing);
                if let Some(sample) = &sample {
                    tracing::debug!(username = %self.state.username, "Spotify: {} - {}", sample.artist, sample.track);
                }
                Ok(sample)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::ExternalApi(format!(
                    "Spotify returned status: {} - {}",
                    status, body
                )))
            }
        }
    }

    async fn refresh_credentials(&mut self) -> Result<()> {
        let creds = self.credentials().await?;
        let url = format!("{}/api/token", self.config.accounts_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", creds.refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Spotify token refresh failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Failed to parse Spotify token: {}", e)))?;

        self.store
            .update_spotify_access_token(&self.state.username, &token.access_token)
            .await?;
        self.creds = Some(SpotifyCredentials {
            access_token: token.access_token,
            refresh_token: creds.refresh_token,
        });

        Ok(())
    }
}
