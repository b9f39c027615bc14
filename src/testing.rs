//! Shared fixtures for unit tests.

use crate::error::{AppError, Result};
use crate::models::{
    LastFmCredentials, NewScrobble, NewSessionRecord, PlaybackSample, Scrobble, SessionRecord,
    SourceKind, SpotifyCredentials, User,
};
use crate::services::store::ScrobbleStore;
use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    sessions: Vec<SessionRecord>,
    scrobbles: Vec<Scrobble>,
    spotify: Vec<(String, SpotifyCredentials)>,
    lastfm: Vec<(String, LastFmCredentials)>,
}

/// In-memory persistence port.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_user(username: &str) -> Self {
        let store = Self::default();
        store.state.try_lock().unwrap().users.push(User {
            id: 1,
            username: username.to_string(),
        });
        store
    }

    /// Make every write fail with a database error until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn scrobbles(&self) -> Vec<Scrobble> {
        self.state.lock().await.scrobbles.clone()
    }

    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn insert_session(&self, source_type: &str, data: &str, active: bool) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.sessions.len() as i64 + 1;
        state.sessions.push(SessionRecord {
            id,
            source_type: source_type.to_string(),
            data: data.to_string(),
            uid: 1,
            active,
        });
        id
    }

    pub async fn set_spotify_credentials(&self, username: &str, access: &str, refresh: &str) {
        self.state.lock().await.spotify.push((
            username.to_string(),
            SpotifyCredentials {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
            },
        ));
    }

    pub async fn set_lastfm_credentials(&self, username: &str, name: &str, key: &str) {
        let mut state = self.state.lock().await;
        state.lastfm.retain(|(u, _)| u != username);
        state.lastfm.push((
            username.to_string(),
            LastFmCredentials {
                name: name.to_string(),
                key: key.to_string(),
            },
        ));
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl ScrobbleStore for MemoryStore {
    async fn get_active_music_sessions(&self) -> Result<Vec<SessionRecord>> {
        let state = self.state.lock().await;
        Ok(state.sessions.iter().filter(|s| s.active).cloned().collect())
    }

    async fn get_user_music_sessions(&self, uid: i64) -> Result<Vec<SessionRecord>> {
        let state = self.state.lock().await;
        Ok(state.sessions.iter().filter(|s| s.uid == uid).cloned().collect())
    }

    async fn save_music_session(&self, record: NewSessionRecord) -> Result<SessionRecord> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let saved = SessionRecord {
            id: state.sessions.len() as i64 + 1,
            source_type: record.kind.as_str().to_string(),
            data: record.data,
            uid: record.uid,
            active: true,
        };
        state.sessions.push(saved.clone());
        Ok(saved)
    }

    async fn set_music_session_active(&self, id: i64, active: bool) -> Result<()> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == id) {
            session.active = active;
        }
        Ok(())
    }

    async fn update_music_session_data(&self, id: i64, data: &str) -> Result<()> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == id) {
            session.data = data.to_string();
        }
        Ok(())
    }

    async fn save_scrobble(&self, scrobble: NewScrobble) -> Result<Scrobble> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let saved = Scrobble {
            id: state.scrobbles.len() as i64 + 1,
            uid: scrobble.uid,
            artist_name: scrobble.artist_name,
            track_name: scrobble.track_name,
            album_name: scrobble.album_name,
            album_artist: scrobble.album_artist,
            track_number: scrobble.track_number,
            duration: scrobble.duration,
            timestamp: scrobble.timestamp,
            source: scrobble.source,
            mbid: scrobble.mbid,
        };
        state.scrobbles.push(saved.clone());
        Ok(saved)
    }

    async fn get_latest_track(&self, uid: i64) -> Result<Option<Scrobble>> {
        let state = self.state.lock().await;
        Ok(state
            .scrobbles
            .iter()
            .filter(|s| s.uid == uid)
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn get_latest_source_track(&self, uid: i64, source: SourceKind) -> Result<Option<Scrobble>> {
        let state = self.state.lock().await;
        Ok(state
            .scrobbles
            .iter()
            .filter(|s| s.uid == uid && s.source.as_deref() == Some(source.as_str()))
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_spotify_credentials(&self, username: &str) -> Result<Option<SpotifyCredentials>> {
        let state = self.state.lock().await;
        Ok(state
            .spotify
            .iter()
            .find(|(u, _)| u == username)
            .map(|(_, c)| c.clone()))
    }

    async fn update_spotify_access_token(&self, username: &str, access_token: &str) -> Result<()> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        if let Some((_, creds)) = state.spotify.iter_mut().find(|(u, _)| u == username) {
            creds.access_token = access_token.to_string();
        }
        Ok(())
    }

    async fn get_lastfm_credentials(&self, username: &str) -> Result<Option<LastFmCredentials>> {
        let state = self.state.lock().await;
        Ok(state
            .lastfm
            .iter()
            .find(|(u, _)| u == username)
            .map(|(_, c)| c.clone()))
    }
}

pub fn sample(track: &str, duration_ms: i64, progress_ms: i64, timestamp: i64) -> PlaybackSample {
    PlaybackSample {
        username: "mente".to_string(),
        artist: "Boards of Canada".to_string(),
        track: track.to_string(),
        album: Some("Music Has the Right to Children".to_string()),
        album_artist: Some("Boards of Canada".to_string()),
        track_number: Some(1),
        mbid: None,
        timestamp,
        progress_ms,
        duration_ms,
        source: SourceKind::Spotify,
    }
}

pub fn scrobble(track: &str, timestamp: i64) -> Scrobble {
    Scrobble {
        id: 1,
        uid: 1,
        artist_name: "Aphex Twin".to_string(),
        track_name: track.to_string(),
        album_name: None,
        album_artist: None,
        track_number: None,
        duration: 200_000,
        timestamp,
        source: Some("spotify".to_string()),
        mbid: None,
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_mock_api(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
