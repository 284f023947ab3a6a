pub mod callbacks;
pub mod health;
pub mod rooms;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", rooms::router().merge(callbacks::router()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Rooms
        rooms::create_room,
        rooms::list_rooms,
        rooms::get_room,
        rooms::terminate_room,
        // Callbacks
        callbacks::engine_callback,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Domain views
            crate::room::events::RoomStateView,
            crate::room::events::MemberView,
            crate::room::events::QueueEntryView,
            crate::room::events::NowPlayingView,
            crate::room::events::RoomSummary,
            crate::room::queue::Track,
            crate::room::state::RoomPhase,
            crate::room::state::VotingMode,
            crate::geo::Position,
            crate::geo::PositionConstraint,
            crate::engine::EngineSnapshot,
            crate::engine::EngineNowPlaying,
            // Route request/response types
            rooms::CreateRoomRequest,
            rooms::CreatorInfo,
            rooms::CreateRoomResponse,
            rooms::ListRoomsResponse,
            callbacks::EngineCallback,
        )
    ),
    tags(
        (name = "Rooms", description = "Room lifecycle and state"),
        (name = "Callbacks", description = "Workflow engine acknowledgements"),
    )
)]
pub struct ApiDoc;
