//! Gateway opcodes, command payloads, and wire-format messages.

use serde::Deserialize;
use serde_json::Value;

use crate::geo::Position;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_JOIN: u8 = 2;
pub const OP_COMMAND: u8 = 4;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a COMMAND_REJECTED dispatch for the originating connection.
    pub fn rejected(seq: u64, code: &str, message: &str) -> Self {
        Self::dispatch(
            EventName::COMMAND_REJECTED,
            seq,
            serde_json::json!({ "code": code, "message": message }),
        )
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// JOIN payload — must be the first message on the connection.
#[derive(Debug, Deserialize)]
pub struct JoinPayload {
    pub room_id: String,
    pub user_id: String,
    pub device_id: String,
    pub nickname: String,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

/// In-room commands carried by op=4 COMMAND frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum CommandPayload {
    Vote { track_id: String },
    Suggest {
        track_id: String,
        title: String,
        #[serde(default)]
        artist: String,
    },
    Play,
    Pause,
    NextTrack,
    ChangeEmittingDevice { device_id: String },
    Chat { text: String },
    UpdatePosition { position: Position },
    Leave,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names the gateway itself dispatches. Room state-machine events
/// carry their own names (`RoomEvent::name`).
pub struct EventName;

impl EventName {
    pub const ROOM_STATE: &'static str = "ROOM_STATE";
    pub const ROOM_TERMINATED: &'static str = "ROOM_TERMINATED";
    pub const ROOM_CREATE_FAILED: &'static str = "ROOM_CREATE_FAILED";
    pub const COMMAND_REJECTED: &'static str = "COMMAND_REJECTED";
}
