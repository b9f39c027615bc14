use crate::api::{resolve_user, AppState};
use crate::error::Result;
use crate::models::{ScrobbleEvent, UserPath};
use crate::services::{ChannelSubscriber, ScrobbleNotifier};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{stream::Stream, StreamExt};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_BUFFER: usize = 16;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/users/:username/events/scrobble", get(scrobble_events))
}

/// Drops the notifier registration when the client's stream goes away.
struct Registration {
    notifier: Arc<ScrobbleNotifier>,
    id: i64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let notifier = self.notifier.clone();
        let id = self.id;
        tokio::spawn(async move {
            notifier.unregister(id).await;
            tracing::debug!(subscriber = id, "Scrobble event stream closed");
        });
    }
}

/// SSE stream of the user's accepted scrobbles
async fn scrobble_events(
    State(state): State<Arc<AppState>>,
    Path(UserPath { username }): Path<UserPath>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let user = resolve_user(&state, &username).await?;

    let (tx, rx) = mpsc::channel::<ScrobbleEvent>(EVENT_BUFFER);
    let id = state
        .notifier
        .register(Arc::new(ChannelSubscriber::new(user.username.clone(), tx)))
        .await;
    tracing::debug!(username = %user.username, subscriber = id, "Scrobble event stream opened");

    let registration = Registration {
        notifier: state.notifier.clone(),
        id,
    };

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _held = &registration;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event("scrobble").data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
