use crate::api::{resolve_user, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    NewSessionRecord, SessionRecord, SessionSummary, SourceKind, SourcePath, UserPath,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/:username/sources", get(list_sources))
        .route(
            "/users/:username/sources/:kind",
            post(enable_source).delete(disable_source),
        )
}

fn find_record(records: Vec<SessionRecord>, kind: SourceKind) -> Option<SessionRecord> {
    records
        .into_iter()
        .find(|r| r.source_type.parse::<SourceKind>().ok() == Some(kind))
}

async fn list_sources(
    State(state): State<Arc<AppState>>,
    Path(UserPath { username }): Path<UserPath>,
) -> Result<Json<Vec<SessionSummary>>> {
    let user = resolve_user(&state, &username).await?;
    let records = state.store.get_user_music_sessions(user.id).await?;

    Ok(Json(records.into_iter().map(SessionSummary::from).collect()))
}

/// Activate a source for the user, creating its session record on first use
async fn enable_source(
    State(state): State<Arc<AppState>>,
    Path(path): Path<SourcePath>,
) -> Result<Json<SessionSummary>> {
    let user = resolve_user(&state, &path.username).await?;
    let kind: SourceKind = path.kind.parse()?;

    let existing = find_record(state.store.get_user_music_sessions(user.id).await?, kind);

    let record = match existing {
        Some(record) if record.active => return Ok(Json(record.into())),
        Some(mut record) => {
            state.store.set_music_session_active(record.id, true).await?;
            record.active = true;
            record
        }
        None => {
            let session = state.factory.create(kind, &user.username);
            let data = String::from_utf8(session.encode())
                .map_err(|e| AppError::Internal(e.into()))?;
            state
                .store
                .save_music_session(NewSessionRecord {
                    kind,
                    data,
                    uid: user.id,
                })
                .await?
        }
    };

    tracing::info!(username = %user.username, source = %kind, "Source enabled");
    state.changes.notify();

    Ok(Json(record.into()))
}

async fn disable_source(
    State(state): State<Arc<AppState>>,
    Path(path): Path<SourcePath>,
) -> Result<Json<SessionSummary>> {
    let user = resolve_user(&state, &path.username).await?;
    let kind: SourceKind = path.kind.parse()?;

    let mut record = find_record(state.store.get_user_music_sessions(user.id).await?, kind)
        .ok_or_else(|| AppError::NotFound(format!("No {} source for {}", kind, user.username)))?;

    if record.active {
        state.store.set_music_session_active(record.id, false).await?;
        record.active = false;

        tracing::info!(username = %user.username, source = %kind, "Source disabled");
        state.changes.notify();
    }

    Ok(Json(record.into()))
}
