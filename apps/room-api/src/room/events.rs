//! State-change events emitted by the room state machine and the wire views
//! they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::geo::PositionConstraint;
use crate::room::queue::Track;
use crate::room::state::{RoomPhase, VotingMode};

/// Full room snapshot as seen by clients (`ROOM_STATE` and the HTTP API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomStateView {
    pub room_id: String,
    pub name: String,
    pub public: bool,
    pub voting_mode: VotingMode,
    pub minimum_vote_threshold: u32,
    pub phase: RoomPhase,
    pub is_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<NowPlayingView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitting_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_constraint: Option<PositionConstraint>,
    pub members: Vec<MemberView>,
    pub queue: Vec<QueueEntryView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MemberView {
    pub user_id: String,
    pub nickname: String,
    pub role: String,
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueueEntryView {
    pub track: Track,
    pub votes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NowPlayingView {
    pub track: Track,
    pub elapsed_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// Listing entry for `GET /api/v1/rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomSummary {
    pub room_id: String,
    pub name: String,
    pub member_count: usize,
    pub is_playing: bool,
    pub has_position_constraint: bool,
}

/// A state change accepted by the room state machine.
///
/// Events are broadcast to the room's channel in the order their commands
/// were applied; rejections never become events.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    UserJoined {
        user_id: String,
        nickname: String,
        member_count: usize,
    },
    UserLeft {
        user_id: String,
        member_count: usize,
    },
    QueueUpdated {
        queue: Vec<QueueEntryView>,
    },
    TrackPromoted {
        track: Track,
    },
    PlaybackChanged {
        is_playing: bool,
        now_playing: Option<NowPlayingView>,
    },
    EmittingDeviceChanged {
        device_id: String,
        user_id: String,
    },
    ChatMessage {
        user_id: String,
        nickname: String,
        text: String,
    },
    /// Re-broadcast of the merged snapshot after an engine acknowledgement.
    StateSynced {
        state: RoomStateView,
    },
    Terminated {
        reason: String,
    },
    CreateFailed {
        reason: String,
    },
}

impl RoomEvent {
    /// Dispatch event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::UserJoined { .. } => "USER_JOINED",
            RoomEvent::UserLeft { .. } => "USER_LEFT",
            RoomEvent::QueueUpdated { .. } => "QUEUE_UPDATED",
            RoomEvent::TrackPromoted { .. } => "TRACK_PROMOTED",
            RoomEvent::PlaybackChanged { .. } => "PLAYBACK_CHANGED",
            RoomEvent::EmittingDeviceChanged { .. } => "EMITTING_DEVICE_CHANGED",
            RoomEvent::ChatMessage { .. } => "CHAT_MESSAGE",
            RoomEvent::StateSynced { .. } => "ROOM_STATE",
            RoomEvent::Terminated { .. } => "ROOM_TERMINATED",
            RoomEvent::CreateFailed { .. } => "ROOM_CREATE_FAILED",
        }
    }

    /// Chat is rendered locally by its sender; suppress the echo.
    pub fn suppresses_origin_echo(&self) -> bool {
        matches!(self, RoomEvent::ChatMessage { .. })
    }

    pub fn payload(&self) -> Value {
        match self {
            RoomEvent::UserJoined {
                user_id,
                nickname,
                member_count,
            } => serde_json::json!({
                "user_id": user_id,
                "nickname": nickname,
                "member_count": member_count,
            }),
            RoomEvent::UserLeft {
                user_id,
                member_count,
            } => serde_json::json!({
                "user_id": user_id,
                "member_count": member_count,
            }),
            RoomEvent::QueueUpdated { queue } => serde_json::json!({
                "queue": queue,
            }),
            RoomEvent::TrackPromoted { track } => serde_json::json!({
                "track": track,
            }),
            RoomEvent::PlaybackChanged {
                is_playing,
                now_playing,
            } => serde_json::json!({
                "is_playing": is_playing,
                "now_playing": now_playing,
            }),
            RoomEvent::EmittingDeviceChanged { device_id, user_id } => serde_json::json!({
                "device_id": device_id,
                "user_id": user_id,
            }),
            RoomEvent::ChatMessage {
                user_id,
                nickname,
                text,
            } => serde_json::json!({
                "user_id": user_id,
                "nickname": nickname,
                "text": text,
            }),
            RoomEvent::StateSynced { state } => {
                serde_json::to_value(state).unwrap_or_default()
            }
            RoomEvent::Terminated { reason } => serde_json::json!({ "reason": reason }),
            RoomEvent::CreateFailed { reason } => serde_json::json!({ "reason": reason }),
        }
    }
}
