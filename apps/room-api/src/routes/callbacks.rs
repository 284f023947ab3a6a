//! Inbound acknowledgement webhook from the workflow engine.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::engine::EngineSnapshot;
use crate::error::ApiError;
use crate::room::events::RoomStateView;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/callbacks/engine",
        axum::routing::post(engine_callback),
    )
}

/// An `*_CALLBACK` acknowledgement carrying a room-state snapshot.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EngineCallback {
    /// e.g. "CREATE_CALLBACK", "PLAY_CALLBACK".
    pub callback: String,
    /// The room id.
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub state: EngineSnapshot,
}

#[utoipa::path(
    post,
    path = "/api/v1/callbacks/engine",
    tag = "Callbacks",
    request_body = EngineCallback,
    responses(
        (status = 200, description = "Snapshot merged", body = RoomStateView),
        (status = 401, description = "Bad or missing shared secret", body = crate::error::ApiErrorBody),
        (status = 404, description = "Room not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn engine_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EngineCallback>,
) -> Result<Json<RoomStateView>, ApiError> {
    let secret = headers.get("x-engine-secret").and_then(|v| v.to_str().ok());
    if secret != Some(state.config.engine_secret.as_str()) {
        return Err(ApiError::unauthorized("Invalid engine secret"));
    }

    // Callbacks can arrive out of order or duplicated; the merge is
    // idempotent and last-snapshot-wins, so applying is always safe.
    let view = state
        .rooms
        .apply_engine_snapshot(&body.workflow_id, &body.state)?;

    tracing::info!(
        room_id = %body.workflow_id,
        callback = %body.callback,
        "engine callback applied"
    );
    Ok(Json(view))
}
