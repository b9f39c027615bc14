use crate::api::{resolve_user, AppState};
use crate::error::{AppError, Result};
use crate::models::{Scrobble, UserPath};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/users/:username/last-scrobble", get(last_scrobble))
}

async fn last_scrobble(
    State(state): State<Arc<AppState>>,
    Path(UserPath { username }): Path<UserPath>,
) -> Result<Json<Scrobble>> {
    let user = resolve_user(&state, &username).await?;

    state
        .store
        .get_latest_track(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No scrobbles for {}", user.username)))
}
