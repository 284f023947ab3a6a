//! Per-room broadcast hubs for dispatching gateway events.
//!
//! One `tokio::sync::broadcast` channel per room ("one logical channel per
//! room"). Connections subscribe to their room's channel on join; dropping
//! the channel is how room termination closes every remaining connection.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of each room channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const ROOM_CHANNEL_CAPACITY: usize = 1024;

/// A payload broadcast to the connections of one room.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    /// The dispatch event name (e.g. "TRACK_PROMOTED").
    pub event_name: &'static str,
    pub data: Value,
    /// Session to skip, for originator echo suppression.
    pub exclude_session: Option<String>,
}

/// Registry of per-room channels. Cloneable via `Arc` — store in AppState.
#[derive(Default)]
pub struct RoomFanout {
    channels: DashMap<String, broadcast::Sender<Arc<BroadcastPayload>>>,
}

impl RoomFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the room's channel if it does not exist yet.
    pub fn ensure(&self, room_id: &str) {
        self.channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0);
    }

    /// Subscribe to a room's channel. `None` when the room has no channel
    /// (unknown or already terminated).
    pub fn subscribe(&self, room_id: &str) -> Option<broadcast::Receiver<Arc<BroadcastPayload>>> {
        self.channels.get(room_id).map(|s| s.subscribe())
    }

    /// Dispatch an event to every connection subscribed to the room.
    pub fn dispatch(&self, room_id: &str, payload: BroadcastPayload) {
        if let Some(sender) = self.channels.get(room_id) {
            // send() returns Err if there are no receivers — that's fine.
            let _ = sender.send(Arc::new(payload));
        }
    }

    /// Drop the room's channel. Subscribers drain buffered events and then
    /// observe `Closed`.
    pub fn remove(&self, room_id: &str) {
        self.channels.remove(room_id);
    }

    pub fn has_channel(&self, room_id: &str) -> bool {
        self.channels.contains_key(room_id)
    }
}
