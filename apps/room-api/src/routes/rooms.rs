//! Room endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time;
use utoipa::ToSchema;

use crate::engine::{spawn_forward, EngineError};
use crate::error::{ApiError, FieldError};
use crate::geo::{Position, PositionConstraint};
use crate::room::events::{RoomStateView, RoomSummary};
use crate::room::queue::Track;
use crate::room::state::{Command, RoomSettings, VotingMode, MAX_NICKNAME_LEN, MAX_ROOM_NAME_LEN};
use crate::room::CommandError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", axum::routing::post(create_room).get(list_rooms))
        .route("/rooms/{room_id}", get(get_room).delete(terminate_room))
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatorInfo {
    pub user_id: String,
    pub device_id: String,
    pub nickname: String,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default = "default_public")]
    pub public: bool,
    #[serde(default = "default_voting_mode")]
    pub voting_mode: VotingMode,
    #[serde(default = "default_threshold")]
    pub minimum_vote_threshold: u32,
    #[serde(default)]
    pub position_constraint: Option<PositionConstraint>,
    #[serde(default)]
    pub initial_tracks: Vec<Track>,
    pub creator: CreatorInfo,
}

fn default_public() -> bool {
    true
}

fn default_voting_mode() -> VotingMode {
    VotingMode::Free
}

fn default_threshold() -> u32 {
    1
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub run_id: String,
    pub gateway_url: String,
    pub state: RoomStateView,
}

#[utoipa::path(
    post,
    path = "/api/v1/rooms",
    tag = "Rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created (pending engine acknowledgement)", body = CreateRoomResponse),
        (status = 400, description = "Invalid settings", body = crate::error::ApiErrorBody),
        (status = 403, description = "Creator outside the position constraint", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), ApiError> {
    validate_create(&body)?;

    // The join rule applies to the creator as well.
    if let Some(constraint) = &body.position_constraint {
        if !constraint.admits(body.creator.position, Utc::now()) {
            return Err(CommandError::GeofenceViolation.into());
        }
    }

    let settings = RoomSettings {
        name: body.name.trim().to_string(),
        public: body.public,
        voting_mode: body.voting_mode,
        minimum_vote_threshold: body.minimum_vote_threshold,
        position_constraint: body.position_constraint,
    };

    let new_room = state.rooms.create(
        settings,
        body.creator.user_id,
        body.creator.device_id,
        body.creator.nickname.trim().to_string(),
        body.creator.position,
        body.initial_tracks,
    );

    tracing::info!(room_id = %new_room.room_id, "room created, awaiting engine acknowledgement");

    // Fire the engine creation request without holding up the response. The
    // engine's answer arrives as a second, idempotent transition; a failure
    // or timeout rolls the room back entirely.
    let engine = state.engine.clone();
    let rooms = state.rooms.clone();
    let timeout = state.config.engine_timeout;
    let room_id = new_room.room_id.clone();
    let run_id = new_room.run_id.clone();
    let snapshot = new_room.state.clone();
    tokio::spawn(async move {
        match time::timeout(timeout, engine.create(&room_id, &run_id, &snapshot)).await {
            Ok(Ok(ack)) => {
                let merge = ack.state.unwrap_or_default();
                if let Err(err) = rooms.apply_engine_snapshot(&room_id, &merge) {
                    tracing::warn!(room_id = %room_id, %err, "creation ack arrived for a gone room");
                } else {
                    tracing::info!(room_id = %room_id, "room creation acknowledged");
                }
            }
            Ok(Err(err)) => {
                let reason = match err {
                    EngineError::Rejected(msg) => CommandError::EngineRejected(msg),
                    EngineError::Unavailable(msg) => CommandError::EngineUnavailable(msg),
                };
                rooms.fail_creation(&room_id, &reason.to_string());
            }
            Err(_) => rooms.fail_creation(
                &room_id,
                &CommandError::EngineUnavailable("create timed out".to_string()).to_string(),
            ),
        }
    });

    let gateway_url = format!("ws://localhost:{}/gateway", state.config.port);
    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: new_room.room_id,
            run_id: new_room.run_id,
            gateway_url,
            state: new_room.state,
        }),
    ))
}

fn validate_create(body: &CreateRoomRequest) -> Result<(), ApiError> {
    let mut details = Vec::new();
    let name = body.name.trim();
    if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
        details.push(FieldError {
            field: "name".to_string(),
            message: format!("must be 1-{MAX_ROOM_NAME_LEN} characters"),
        });
    }
    if body.minimum_vote_threshold < 1 {
        details.push(FieldError {
            field: "minimum_vote_threshold".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    let nickname = body.creator.nickname.trim();
    if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LEN {
        details.push(FieldError {
            field: "creator.nickname".to_string(),
            message: format!("must be 1-{MAX_NICKNAME_LEN} characters"),
        });
    }
    if body.creator.user_id.trim().is_empty() || body.creator.device_id.trim().is_empty() {
        details.push(FieldError {
            field: "creator".to_string(),
            message: "user_id and device_id are required".to_string(),
        });
    }
    if let Some(constraint) = &body.position_constraint {
        if constraint.radius_meters <= 0.0 {
            details.push(FieldError {
                field: "position_constraint.radius_meters".to_string(),
                message: "must be positive".to_string(),
            });
        }
    }
    if details.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(details))
    }
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ListRoomsResponse {
    pub data: Vec<RoomSummary>,
}

#[utoipa::path(
    get,
    path = "/api/v1/rooms",
    tag = "Rooms",
    responses(
        (status = 200, description = "Public rooms", body = ListRoomsResponse),
    ),
)]
pub async fn list_rooms(State(state): State<AppState>) -> Json<ListRoomsResponse> {
    Json(ListRoomsResponse {
        data: state.rooms.list_public(),
    })
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetRoomParams {
    /// Re-sync from the workflow engine before answering.
    #[serde(default)]
    pub sync: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}",
    tag = "Rooms",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 200, description = "Room state", body = RoomStateView),
        (status = 404, description = "Room not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<GetRoomParams>,
) -> Result<Json<RoomStateView>, ApiError> {
    if params.sync {
        if let Some(run_id) = state.rooms.run_id(&room_id) {
            match time::timeout(
                state.config.engine_timeout,
                state.engine.state(&room_id, &run_id),
            )
            .await
            {
                Ok(Ok(ack)) => {
                    if let Some(snapshot) = ack.state {
                        let _ = state.rooms.apply_engine_snapshot(&room_id, &snapshot);
                    }
                }
                Ok(Err(err)) => {
                    // Stale local state beats an unavailable answer.
                    tracing::warn!(room_id = %room_id, %err, "engine state sync failed");
                }
                Err(_) => {
                    tracing::warn!(room_id = %room_id, "engine state sync timed out");
                }
            }
        }
    }

    state
        .rooms
        .snapshot(&room_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Room not found"))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/rooms/{room_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/rooms/{room_id}",
    tag = "Rooms",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 204, description = "Room terminated"),
        (status = 401, description = "Missing X-User-Id header", body = crate::error::ApiErrorBody),
        (status = 403, description = "Not the room creator", body = crate::error::ApiErrorBody),
        (status = 404, description = "Room not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn terminate_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("X-User-Id header is required"))?
        .to_string();

    let applied = state
        .rooms
        .apply(&room_id, Command::Terminate { user_id }, None)?;
    for forward in applied.forwards {
        spawn_forward(
            state.engine.clone(),
            state.config.engine_timeout,
            room_id.clone(),
            applied.run_id.clone(),
            forward,
        );
    }
    Ok(StatusCode::NO_CONTENT)
}
