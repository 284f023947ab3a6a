//! Workflow engine RPC boundary.
//!
//! The engine is the authoritative owner of session state. It is treated as
//! an opaque request/response peer: eventually it responds, or the call
//! times out. Everything behind [`WorkflowEngine`] so tests substitute an
//! in-process mock.

pub mod http;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::room::events::RoomStateView;
use crate::room::queue::Track;
use crate::room::state::EngineForward;

pub use http::HttpWorkflowEngine;

#[derive(Debug)]
pub enum EngineError {
    /// The call failed or timed out.
    Unavailable(String),
    /// The engine returned a business error.
    Rejected(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unavailable(msg) => write!(f, "engine unavailable: {msg}"),
            EngineError::Rejected(msg) => write!(f, "engine rejected: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Partial room-state snapshot over the fields the engine owns.
///
/// Absent fields mean "no statement"; present fields win over local state
/// (last snapshot wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<EngineNowPlaying>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineNowPlaying {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub elapsed_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// Response body of an engine operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineAck {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub state: Option<EngineSnapshot>,
}

/// The engine operations named by the session protocol. `workflow_id` is
/// the room id.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn create(
        &self,
        workflow_id: &str,
        run_id: &str,
        state: &RoomStateView,
    ) -> Result<EngineAck, EngineError>;

    async fn join(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<EngineAck, EngineError>;

    async fn leave(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
    ) -> Result<EngineAck, EngineError>;

    async fn play(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError>;

    async fn pause(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError>;

    async fn go_to_next_track(
        &self,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<EngineAck, EngineError>;

    async fn suggest_tracks(
        &self,
        workflow_id: &str,
        run_id: &str,
        tracks: &[Track],
    ) -> Result<EngineAck, EngineError>;

    async fn change_user_emitting_device(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<EngineAck, EngineError>;

    async fn state(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError>;

    async fn terminate(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError>;
}

/// Forward an accepted transition to the engine without blocking the caller.
///
/// The local optimistic transition already committed; a failed or timed-out
/// call is logged and tolerated so in-session controls stay responsive.
pub fn spawn_forward(
    engine: Arc<dyn WorkflowEngine>,
    timeout: Duration,
    room_id: String,
    run_id: String,
    forward: EngineForward,
) {
    tokio::spawn(async move {
        let op = forward_name(&forward);
        let call = async {
            match &forward {
                EngineForward::Join { user_id, device_id } => {
                    engine.join(&room_id, &run_id, user_id, device_id).await
                }
                EngineForward::Leave { user_id } => engine.leave(&room_id, &run_id, user_id).await,
                EngineForward::Play => engine.play(&room_id, &run_id).await,
                EngineForward::Pause => engine.pause(&room_id, &run_id).await,
                EngineForward::NextTrack => engine.go_to_next_track(&room_id, &run_id).await,
                EngineForward::SuggestTracks { tracks } => {
                    engine.suggest_tracks(&room_id, &run_id, tracks).await
                }
                EngineForward::ChangeEmittingDevice { user_id, device_id } => {
                    engine
                        .change_user_emitting_device(&room_id, &run_id, user_id, device_id)
                        .await
                }
                EngineForward::Terminate => engine.terminate(&room_id, &run_id).await,
            }
        };
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(_)) => {
                tracing::debug!(room_id = %room_id, op, "engine call acknowledged");
            }
            Ok(Err(e)) => {
                tracing::warn!(room_id = %room_id, op, error = %e, "engine call failed");
            }
            Err(_) => {
                tracing::warn!(room_id = %room_id, op, "engine call timed out");
            }
        }
    });
}

fn forward_name(forward: &EngineForward) -> &'static str {
    match forward {
        EngineForward::Join { .. } => "join",
        EngineForward::Leave { .. } => "leave",
        EngineForward::Play => "play",
        EngineForward::Pause => "pause",
        EngineForward::NextTrack => "go-to-next-track",
        EngineForward::SuggestTracks { .. } => "suggest-tracks",
        EngineForward::ChangeEmittingDevice { .. } => "change-user-emitting-device",
        EngineForward::Terminate => "terminate",
    }
}
