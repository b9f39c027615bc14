use crate::error::Result;
use crate::models::{
    LastFmCredentials, NewScrobble, NewSessionRecord, Scrobble, SessionRecord, SourceKind,
    SpotifyCredentials, User,
};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Persistence port used by the orchestrator, the scrobble engine, the source
/// sessions and the settings routes.
///
/// Callers share one store concurrently. There is no cross-call transaction: the
/// engine's check-then-insert relies on a single poll task per session.
#[async_trait]
pub trait ScrobbleStore: Send + Sync {
    async fn get_active_music_sessions(&self) -> Result<Vec<SessionRecord>>;
    async fn get_user_music_sessions(&self, uid: i64) -> Result<Vec<SessionRecord>>;
    async fn save_music_session(&self, record: NewSessionRecord) -> Result<SessionRecord>;
    async fn set_music_session_active(&self, id: i64, active: bool) -> Result<()>;
    async fn update_music_session_data(&self, id: i64, data: &str) -> Result<()>;

    async fn save_scrobble(&self, scrobble: NewScrobble) -> Result<Scrobble>;
    /// Most recent scrobble for the user, by play timestamp
    async fn get_latest_track(&self, uid: i64) -> Result<Option<Scrobble>>;
    /// Most recent scrobble for the user that came from `source`
    async fn get_latest_source_track(&self, uid: i64, source: SourceKind) -> Result<Option<Scrobble>>;
    async fn get_user(&self, username: &str) -> Result<Option<User>>;

    async fn get_spotify_credentials(&self, username: &str) -> Result<Option<SpotifyCredentials>>;
    async fn update_spotify_access_token(&self, username: &str, access_token: &str) -> Result<()>;
    async fn get_lastfm_credentials(&self, username: &str) -> Result<Option<LastFmCredentials>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScrobbleStore for SqliteStore {
    async fn get_active_music_sessions(&self) -> Result<Vec<SessionRecord>> {
        let sessions = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, type, data, uid, active FROM music_sessions WHERE active = 1 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(sessions)
    }

    async fn get_user_music_sessions(&self, uid: i64) -> Result<Vec<SessionRecord>> {
        let sessions = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, type, data, uid, active FROM music_sessions WHERE uid = ? ORDER BY id",
        )
        .bind(uid)
        .fetch_all(&self.db)
        .await?;

        Ok(sessions)
    }

    async fn save_music_session(&self, record: NewSessionRecord) -> Result<SessionRecord> {
        let saved = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO music_sessions (type, data, uid, active)
            VALUES (?, ?, ?, 1)
            RETURNING id, type, data, uid, active
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.data)
        .bind(record.uid)
        .fetch_one(&self.db)
        .await?;

        Ok(saved)
    }

    async fn set_music_session_active(&self, id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE music_sessions SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn update_music_session_data(&self, id: i64, data: &str) -> Result<()> {
        sqlx::query("UPDATE music_sessions SET data = ? WHERE id = ?")
            .bind(data)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn save_scrobble(&self, scrobble: NewScrobble) -> Result<Scrobble> {
        let saved = sqlx::query_as::<_, Scrobble>(
            r#"
            INSERT INTO scrobbles (uid, artist_name, track_name, album_name, album_artist,
                                   track_number, duration, timestamp, source, mbid)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(scrobble.uid)
        .bind(&scrobble.artist_name)
        .bind(&scrobble.track_name)
        .bind(&scrobble.album_name)
        .bind(&scrobble.album_artist)
        .bind(scrobble.track_number)
        .bind(scrobble.duration)
        .bind(scrobble.timestamp)
        .bind(&scrobble.source)
        .bind(&scrobble.mbid)
        .fetch_one(&self.db)
        .await?;

        Ok(saved)
    }

    async fn get_latest_track(&self, uid: i64) -> Result<Option<Scrobble>> {
        let latest = sqlx::query_as::<_, Scrobble>(
            "SELECT * FROM scrobbles WHERE uid = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(uid)
        .fetch_optional(&self.db)
        .await?;

        Ok(latest)
    }

    async fn get_latest_source_track(&self, uid: i64, source: SourceKind) -> Result<Option<Scrobble>> {
        let latest = sqlx::query_as::<_, Scrobble>(
            r#"
            SELECT * FROM scrobbles
            WHERE uid = ? AND source = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(uid)
        .bind(source.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(latest)
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, username FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn get_spotify_credentials(&self, username: &str) -> Result<Option<SpotifyCredentials>> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT spotify_access_token, spotify_refresh_token FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some((Some(access_token), Some(refresh_token))) => Some(SpotifyCredentials {
                access_token,
                refresh_token,
            }),
            _ => None,
        })
    }

    async fn update_spotify_access_token(&self, username: &str, access_token: &str) -> Result<()> {
        sqlx::query("UPDATE users SET spotify_access_token = ? WHERE username = ?")
            .bind(access_token)
            .bind(username)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn get_lastfm_credentials(&self, username: &str) -> Result<Option<LastFmCredentials>> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT lastfm_session_name, lastfm_session_key FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some((Some(name), Some(key))) => Some(LastFmCredentials { name, key }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> (SqliteStore, i64) {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();

        let uid: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, spotify_access_token, spotify_refresh_token)
             VALUES ('mente', 'access', 'refresh') RETURNING id",
        )
        .fetch_one(&db)
        .await
        .unwrap();

        (SqliteStore::new(db), uid)
    }

    fn new_scrobble(uid: i64, track: &str, timestamp: i64) -> NewScrobble {
        NewScrobble {
            uid,
            artist_name: "Sade".to_string(),
            track_name: track.to_string(),
            album_name: Some("Love Deluxe".to_string()),
            album_artist: None,
            track_number: Some(1),
            duration: 240_000,
            timestamp,
            source: Some("spotify".to_string()),
            mbid: None,
        }
    }

    #[tokio::test]
    async fn latest_track_is_most_recent_by_timestamp() {
        let (store, uid) = test_store().await;
        assert!(store.get_latest_track(uid).await.unwrap().is_none());

        store.save_scrobble(new_scrobble(uid, "Cherish the Day", 2_000)).await.unwrap();
        store.save_scrobble(new_scrobble(uid, "No Ordinary Love", 1_000)).await.unwrap();

        let latest = store.get_latest_track(uid).await.unwrap().unwrap();
        assert_eq!(latest.track_name, "Cherish the Day");
        assert_eq!(latest.album_name.as_deref(), Some("Love Deluxe"));
        assert_eq!(latest.duration, 240_000);
    }

    #[tokio::test]
    async fn latest_source_track_ignores_other_sources() {
        let (store, uid) = test_store().await;

        store.save_scrobble(new_scrobble(uid, "Kiss of Life", 1_000)).await.unwrap();
        let mut lastfm = new_scrobble(uid, "Pearls", 9_000);
        lastfm.duration = 0;
        lastfm.source = Some("lastfm".to_string());
        store.save_scrobble(lastfm).await.unwrap();

        let latest = store.get_latest_track(uid).await.unwrap().unwrap();
        assert_eq!(latest.track_name, "Pearls");

        let spotify = store
            .get_latest_source_track(uid, SourceKind::Spotify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spotify.track_name, "Kiss of Life");
        assert!(store
            .get_latest_source_track(uid, SourceKind::AppleMusic)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deactivated_sessions_are_kept_but_not_loaded() {
        let (store, uid) = test_store().await;
        let record = store
            .save_music_session(NewSessionRecord {
                kind: SourceKind::Spotify,
                data: r#"{"u":"mente","d":4000,"r":false}"#.to_string(),
                uid,
            })
            .await
            .unwrap();
        assert!(record.active);
        assert_eq!(record.source_type, "spotify");

        store.set_music_session_active(record.id, false).await.unwrap();
        assert!(store.get_active_music_sessions().await.unwrap().is_empty());

        let all = store.get_user_music_sessions(uid).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].active);

        store.set_music_session_active(record.id, true).await.unwrap();
        store.update_music_session_data(record.id, "{}").await.unwrap();
        let active = store.get_active_music_sessions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].data, "{}");
    }

    #[tokio::test]
    async fn credentials_require_both_columns() {
        let (store, _uid) = test_store().await;

        let spotify = store.get_spotify_credentials("mente").await.unwrap().unwrap();
        assert_eq!(spotify.access_token, "access");

        store.update_spotify_access_token("mente", "fresh").await.unwrap();
        let spotify = store.get_spotify_credentials("mente").await.unwrap().unwrap();
        assert_eq!(spotify.access_token, "fresh");
        assert_eq!(spotify.refresh_token, "refresh");

        assert!(store.get_lastfm_credentials("mente").await.unwrap().is_none());
        assert!(store.get_spotify_credentials("nobody").await.unwrap().is_none());
        assert!(store.get_user("nobody").await.unwrap().is_none());
    }
}
