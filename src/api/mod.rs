pub mod events;
pub mod scrobbles;
pub mod sources;

use crate::error::{AppError, Result};
use crate::models::{User, UserPath};
use crate::services::{ScrobbleNotifier, ScrobbleStore, SessionsChanged, SourceFactory};
use axum::Router;
use std::sync::Arc;
use validator::Validate;

pub struct AppState {
    pub store: Arc<dyn ScrobbleStore>,
    pub factory: Arc<dyn SourceFactory>,
    pub notifier: Arc<ScrobbleNotifier>,
    pub changes: SessionsChanged,
}

pub fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(sources::router())
        .merge(scrobbles::router())
        .merge(events::router())
}

/// Validate `username` and look the user up.
pub(crate) async fn resolve_user(state: &AppState, username: &str) -> Result<User> {
    UserPath {
        username: username.to_string(),
    }
    .validate()
    .map_err(|e| AppError::Validation(e.to_string()))?;

    state
        .store
        .get_user(username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", username)))
}
