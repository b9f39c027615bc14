use crate::error::Result;
use crate::models::{PlaybackSample, SourceKind};
use crate::services::sources::{SessionState, SourceSession};
use async_trait::async_trait;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Placeholder for Apple Music: no public "now playing" API exists for web
/// clients, so the session stays idle and never reports playback.
pub struct AppleMusicSession {
    state: SessionState,
}

impl AppleMusicSession {
    pub fn new(state: SessionState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl SourceSession for AppleMusicSession {
    fn kind(&self) -> SourceKind {
        SourceKind::AppleMusic
    }

    fn state(&self) -> &SessionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    async fn auth_with_db(&mut self) -> Result<()> {
        tracing::info!(username = %self.state.username, "Apple Music source is not supported yet, session will stay idle");
        Ok(())
    }

    async fn now_playing(&mut self) -> Result<Option<PlaybackSample>> {
        Ok(None)
    }

    async fn refresh_credentials(&mut self) -> Result<()> {
        Ok(())
    }
}
