use crate::models::{NewScrobble, PlaybackSample, Scrobble};
use crate::services::notifier::ScrobbleNotifier;
use crate::services::store::ScrobbleStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tracks longer than this only need this much listening time to count.
pub const MIN_LISTEN_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Same ongoing play as the most recent stored scrobble
    Duplicate,
    /// Not listened to long enough yet
    TooShort,
}

/// Decides whether a track has been listened to long enough to count.
pub fn qualifies(duration_ms: i64, progress_ms: i64) -> bool {
    if duration_ms > MIN_LISTEN_MS {
        progress_ms >= MIN_LISTEN_MS
    } else {
        let half = (duration_ms as f64 * 0.5).round() as i64;
        progress_ms >= half
    }
}

/// A sample describes the stored play when artist, track and duration match and
/// the sample started inside `[stored.timestamp, stored.timestamp + stored.duration]`.
pub fn is_same_play(stored: &Scrobble, sample: &PlaybackSample) -> bool {
    stored.artist_name == sample.artist
        && stored.track_name == sample.track
        && stored.duration == sample.duration_ms
        && sample.timestamp >= stored.timestamp
        && sample.timestamp <= stored.timestamp + stored.duration
}

pub fn evaluate(latest: Option<&Scrobble>, sample: &PlaybackSample) -> Verdict {
    if let Some(stored) = latest {
        if is_same_play(stored, sample) {
            return Verdict::Duplicate;
        }
    }

    if qualifies(sample.duration_ms, sample.progress_ms) {
        Verdict::Accept
    } else {
        Verdict::TooShort
    }
}

/// Turns playback samples into persisted scrobbles, exactly once per play.
pub struct ScrobbleEngine {
    store: Arc<dyn ScrobbleStore>,
    notifier: Arc<ScrobbleNotifier>,
}

impl ScrobbleEngine {
    pub fn new(store: Arc<dyn ScrobbleStore>, notifier: Arc<ScrobbleNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Returns true when the sample was persisted as a new scrobble.
    ///
    /// Persistence failures are logged and the play is lost; there is no retry.
    pub async fn scrobble(&self, sample: &PlaybackSample) -> bool {
        match self.try_scrobble(sample).await {
            Ok(Some(saved)) => {
                info!(
                    username = %sample.username,
                    source = %sample.source,
                    "Scrobbled {} - {}",
                    saved.artist_name,
                    saved.track_name
                );
                self.notifier.notify(&saved, &sample.username).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(username = %sample.username, "Failed to scrobble {} - {}: {}", sample.artist, sample.track, e);
                false
            }
        }
    }

    async fn try_scrobble(&self, sample: &PlaybackSample) -> crate::error::Result<Option<Scrobble>> {
        let Some(user) = self.store.get_user(&sample.username).await? else {
            warn!(username = %sample.username, "Dropping sample for unknown user");
            return Ok(None);
        };

        // Each source reports its own timing, so a play is only compared with
        // earlier plays from the same source
        let latest = self
            .store
            .get_latest_source_track(user.id, sample.source)
            .await?;

        match evaluate(latest.as_ref(), sample) {
            Verdict::Accept => {
                let saved = self
                    .store
                    .save_scrobble(NewScrobble::from_sample(user.id, sample))
                    .await?;
                Ok(Some(saved))
            }
            verdict => {
                debug!(
                    username = %sample.username,
                    ?verdict,
                    progress_ms = sample.progress_ms,
                    duration_ms = sample.duration_ms,
                    "Not scrobbling {} - {}",
                    sample.artist,
                    sample.track
                );
                Ok(None)
            }
        }
    }
}
