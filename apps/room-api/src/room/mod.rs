//! The room coordination core: state machine, queue, votes, devices, and the
//! per-room registry that serializes command application.

pub mod devices;
pub mod events;
pub mod queue;
pub mod registry;
pub mod state;
pub mod votes;

pub use events::RoomEvent;
pub use registry::RoomRegistry;
pub use state::{Command, Room, RoomPhase, RoomSettings, VotingMode};

use std::fmt;

/// Why a command was rejected.
///
/// Rejections are returned to the originating connection only; they never
/// mutate room state and are never broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed command payload, rejected before reaching the state machine.
    Validation(String),
    NotAMember,
    UnknownTrack,
    AlreadyVoted,
    DuplicateTrack,
    GeofenceViolation,
    DeviceNotInRoom,
    NotCreator,
    RoomNotFound,
    /// The workflow engine call failed or timed out.
    EngineUnavailable(String),
    /// The workflow engine returned a business error.
    EngineRejected(String),
    /// Invariant violation inside a single room's processing.
    Internal(String),
}

impl CommandError {
    /// Stable error code carried over the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "VALIDATION_ERROR",
            CommandError::NotAMember => "NOT_A_MEMBER",
            CommandError::UnknownTrack => "UNKNOWN_TRACK",
            CommandError::AlreadyVoted => "ALREADY_VOTED",
            CommandError::DuplicateTrack => "DUPLICATE_TRACK",
            CommandError::GeofenceViolation => "GEOFENCE_VIOLATION",
            CommandError::DeviceNotInRoom => "DEVICE_NOT_IN_ROOM",
            CommandError::NotCreator => "NOT_CREATOR",
            CommandError::RoomNotFound => "ROOM_NOT_FOUND",
            CommandError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            CommandError::EngineRejected(_) => "ENGINE_REJECTED",
            CommandError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Validation(msg) => write!(f, "{msg}"),
            CommandError::NotAMember => write!(f, "You are not a member of this room"),
            CommandError::UnknownTrack => write!(f, "Track is not in the queue"),
            CommandError::AlreadyVoted => write!(f, "You already voted for this track"),
            CommandError::DuplicateTrack => {
                write!(f, "Track was already suggested or has already played")
            }
            CommandError::GeofenceViolation => {
                write!(f, "Your position does not satisfy the room's constraint")
            }
            CommandError::DeviceNotInRoom => write!(f, "Device is not in this room"),
            CommandError::NotCreator => write!(f, "Only the room creator may do this"),
            CommandError::RoomNotFound => write!(f, "Room not found"),
            CommandError::EngineUnavailable(msg) => write!(f, "Workflow engine unavailable: {msg}"),
            CommandError::EngineRejected(msg) => write!(f, "Workflow engine rejected: {msg}"),
            CommandError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {}
