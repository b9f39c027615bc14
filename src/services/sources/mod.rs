//! Source Sessions
//!
//! One session per enabled provider account. Every variant shares the same poll
//! loop; a variant only knows how to load credentials, ask its provider what is
//! playing, and refresh expired credentials.

pub mod apple_music;
pub mod lastfm;
pub mod spotify;

pub use apple_music::AppleMusicSession;
pub use lastfm::LastFmSession;
pub use spotify::SpotifySession;

use crate::config::{LastFmConfig, SpotifyConfig};
use crate::error::{AppError, Result};
use crate::models::{PlaybackSample, SourceKind};
use crate::services::store::ScrobbleStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimal resumable state every session persists in its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "u")]
    pub username: String,
    /// Poll interval in milliseconds
    #[serde(rename = "d")]
    pub interval_ms: u64,
    /// A credential refresh is in flight for the current tick
    #[serde(rename = "r", default)]
    pub retrying: bool,
}

impl SessionState {
    pub fn new(username: impl Into<String>, interval: Duration) -> Self {
        Self {
            username: username.into(),
            interval_ms: interval.as_millis() as u64,
            retrying: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Plain struct of strings/numbers/bools: serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(encoded: &[u8]) -> Result<Self> {
        let state: SessionState = serde_json::from_slice(encoded)
            .map_err(|e| AppError::Decode(format!("invalid session payload: {}", e)))?;

        if state.username.is_empty() {
            return Err(AppError::Decode("session payload has no username".to_string()));
        }
        if state.interval_ms == 0 {
            return Err(AppError::Decode("session payload has a zero poll interval".to_string()));
        }

        Ok(state)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[async_trait]
pub trait SourceSession: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn state(&self) -> &SessionState;

    fn state_mut(&mut self) -> &mut SessionState;

    /// Load cached credentials. Missing credentials are not an error: polls fail
    /// until the provider authorization completes and credentials appear.
    async fn auth_with_db(&mut self) -> Result<()>;

    /// Ask the provider what is playing right now. `Ok(None)` when nothing is
    /// actively playing.
    async fn now_playing(&mut self) -> Result<Option<PlaybackSample>>;

    /// Obtain fresh credentials after the provider reported them expired.
    async fn refresh_credentials(&mut self) -> Result<()>;

    fn username(&self) -> &str {
        &self.state().username
    }

    fn encode(&self) -> Vec<u8> {
        self.state().encode()
    }

    fn decode(&mut self, encoded: &[u8]) -> Result<()> {
        *self.state_mut() = SessionState::decode(encoded)?;
        Ok(())
    }

    /// One poll tick. On an expired-credentials signal performs exactly one
    /// refresh and retries once.
    async fn poll(&mut self) -> Result<Option<PlaybackSample>> {
        let result = match self.now_playing().await {
            Err(AppError::AuthExpired) if !self.state().retrying => {
                info!(username = %self.username(), source = %self.kind(), "Refreshing provider credentials");
                self.state_mut().retrying = true;
                match self.refresh_credentials().await {
                    Ok(()) => self.now_playing().await,
                    Err(e) => Err(e),
                }
            }
            other => other,
        };

        self.state_mut().retrying = false;
        result
    }

    /// Poll on the session's interval until `cancel` fires, sending one sample
    /// per tick while something is playing.
    async fn listen(&mut self, cancel: CancellationToken, out: mpsc::Sender<PlaybackSample>) -> Result<()> {
        let period = self.state().interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(username = %self.username(), source = %self.kind(), ?period, "Listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                polled = self.poll() => polled,
            };

            match polled {
                Ok(Some(sample)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = out.send(sample) => {
                            if sent.is_err() {
                                // Fan-in is gone, nothing left to feed
                                return Ok(());
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(username = %self.username(), source = %self.kind(), "Poll failed, skipping tick: {}", e);
                }
            }
        }
    }
}

/// Builds concrete sessions from stored records.
pub trait SourceFactory: Send + Sync {
    /// Restore a session from its record's type tag and encoded payload.
    fn build(&self, source_type: &str, payload: &[u8]) -> Result<Box<dyn SourceSession>>;

    /// Fresh session for a user who just enabled `kind`.
    fn create(&self, kind: SourceKind, username: &str) -> Box<dyn SourceSession>;
}

pub struct DefaultSourceFactory {
    store: Arc<dyn ScrobbleStore>,
    client: reqwest::Client,
    spotify: SpotifyConfig,
    lastfm: LastFmConfig,
}

impl DefaultSourceFactory {
    pub fn new(
        store: Arc<dyn ScrobbleStore>,
        client: reqwest::Client,
        spotify: SpotifyConfig,
        lastfm: LastFmConfig,
    ) -> Self {
        Self {
            store,
            client,
            spotify,
            lastfm,
        }
    }

    fn session(&self, kind: SourceKind, state: SessionState) -> Box<dyn SourceSession> {
        match kind {
            SourceKind::Spotify => Box::new(SpotifySession::new(
                state,
                self.spotify.clone(),
                self.client.clone(),
                self.store.clone(),
            )),
            SourceKind::LastFm => Box::new(LastFmSession::new(
                state,
                self.lastfm.clone(),
                self.client.clone(),
                self.store.clone(),
            )),
            SourceKind::AppleMusic => Box::new(AppleMusicSession::new(state)),
        }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn build(&self, source_type: &str, payload: &[u8]) -> Result<Box<dyn SourceSession>> {
        let kind: SourceKind = source_type.parse()?;
        let mut session = self.create(kind, "");
        session.decode(payload)?;
        Ok(session)
    }

    fn create(&self, kind: SourceKind, username: &str) -> Box<dyn SourceSession> {
        let interval = match kind {
            SourceKind::Spotify => spotify::POLL_INTERVAL,
            SourceKind::LastFm => lastfm::POLL_INTERVAL,
            SourceKind::AppleMusic => apple_music::POLL_INTERVAL,
        };
        self.session(kind, SessionState::new(username, interval))
    }
}
