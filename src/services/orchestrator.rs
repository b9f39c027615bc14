//! Session Orchestrator
//!
//! Owns the set of active source sessions. Each generation:
//! 1. loads the active session records and decodes them through the factory,
//! 2. runs one task per session (auth, then listen) feeding a shared channel,
//!    plus one fan-in task draining that channel into the scrobble engine,
//! 3. waits for either a sessions-changed signal (restart) or shutdown (exit).
//!
//! Teardown cancels the generation's own token, joins every session task and
//! only then lets the fan-in task finish, so the channel is never closed under
//! a live producer and two generations never overlap.

use crate::models::{PlaybackSample, SessionRecord};
use crate::services::scrobbler::ScrobbleEngine;
use crate::services::sources::{SourceFactory, SourceSession};
use crate::services::store::ScrobbleStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// Raised by the settings routes whenever a user enables or disables a source.
///
/// Permit semantics: a change raised while the orchestrator is between
/// generations is kept and triggers the next restart.
#[derive(Clone, Default)]
pub struct SessionsChanged {
    notify: Arc<Notify>,
}

impl SessionsChanged {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Restart,
    Shutdown,
}

struct LoadedSession {
    record_id: i64,
    session: Box<dyn SourceSession>,
}

pub struct SessionOrchestrator {
    store: Arc<dyn ScrobbleStore>,
    factory: Arc<dyn SourceFactory>,
    engine: Arc<ScrobbleEngine>,
    changes: SessionsChanged,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn ScrobbleStore>,
        factory: Arc<dyn SourceFactory>,
        engine: Arc<ScrobbleEngine>,
        changes: SessionsChanged,
    ) -> Self {
        Self {
            store,
            factory,
            engine,
            changes,
        }
    }

    /// Run generations until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut generation: u64 = 0;

        loop {
            generation += 1;
            let sessions = self.load_sessions().await;
            info!(generation, sessions = sessions.len(), "Starting session generation");

            let outcome = self.run_generation(generation, sessions, &shutdown).await;

            match outcome {
                Outcome::Shutdown => {
                    info!(generation, "Session orchestrator stopped");
                    return;
                }
                Outcome::Restart => {
                    info!(generation, "Music sessions changed, restarting");
                }
            }
        }
    }

    async fn load_sessions(&self) -> Vec<LoadedSession> {
        let records = match self.store.get_active_music_sessions().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load active music sessions: {}", e);
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| self.decode(record))
            .collect()
    }

    fn decode(&self, record: SessionRecord) -> Option<LoadedSession> {
        match self.factory.build(&record.source_type, record.data.as_bytes()) {
            Ok(session) => Some(LoadedSession {
                record_id: record.id,
                session,
            }),
            Err(e) => {
                warn!(
                    session_id = record.id,
                    source = %record.source_type,
                    "Dropping undecodable music session: {}",
                    e
                );
                None
            }
        }
    }

    async fn run_generation(
        &self,
        generation: u64,
        sessions: Vec<LoadedSession>,
        shutdown: &CancellationToken,
    ) -> Outcome {
        let scope = shutdown.child_token();
        let (tx, mut rx) = mpsc::channel::<PlaybackSample>(SAMPLE_CHANNEL_CAPACITY);

        let mut tasks = JoinSet::new();
        for loaded in sessions {
            let cancel = scope.clone();
            let out = tx.clone();
            tasks.spawn(run_session(loaded, cancel, out));
        }
        // Session tasks hold the only senders; the channel closes once they all exit
        drop(tx);

        let engine = self.engine.clone();
        let fan_in = tokio::spawn(async move {
            let mut accepted = 0usize;
            while let Some(sample) = rx.recv().await {
                if engine.scrobble(&sample).await {
                    accepted += 1;
                }
            }
            accepted
        });

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Outcome::Shutdown,
            _ = self.changes.changed() => Outcome::Restart,
        };

        scope.cancel();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(loaded) => self.persist_state(&loaded).await,
                Err(e) => error!(generation, "Session task failed: {}", e),
            }
        }

        match fan_in.await {
            Ok(accepted) => debug!(generation, accepted, "Fan-in drained"),
            Err(e) => error!(generation, "Fan-in task failed: {}", e),
        }

        outcome
    }

    async fn persist_state(&self, loaded: &LoadedSession) {
        let encoded = String::from_utf8_lossy(&loaded.session.encode()).into_owned();
        if let Err(e) = self
            .store
            .update_music_session_data(loaded.record_id, &encoded)
            .await
        {
            warn!(session_id = loaded.record_id, "Failed to save music session state: {}", e);
        }
    }
}

async fn run_session(
    mut loaded: LoadedSession,
    cancel: CancellationToken,
    out: mpsc::Sender<PlaybackSample>,
) -> LoadedSession {
    let session = &mut loaded.session;
    let username = session.username().to_string();
    let source = session.kind();

    if let Err(e) = session.auth_with_db().await {
        warn!(%username, %source, "Loading stored credentials failed: {}", e);
    }

    if let Err(e) = session.listen(cancel, out).await {
        error!(%username, %source, "Session stopped listening: {}", e);
    }

    // Cancellation can land mid-refresh; the next generation starts clean
    session.state_mut().retrying = false;

    debug!(%username, %source, "Session task exited");
    loaded
}
