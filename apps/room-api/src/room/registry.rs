//! Per-room command serialization and room lifecycle.
//!
//! Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
//! room for non-poisoning, fast locking: commands against different rooms
//! run in parallel, commands against one room serialize in arrival order.
//! Events are dispatched to the room's channel while the lock is still
//! held, so broadcast order always matches application order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use chorus_common::id::{prefix, prefixed_ulid};

use crate::engine::EngineSnapshot;
use crate::gateway::fanout::{BroadcastPayload, RoomFanout};
use crate::geo::Position;
use crate::room::events::{RoomEvent, RoomStateView, RoomSummary};
use crate::room::queue::Track;
use crate::room::state::{Command, EngineForward, Room, RoomSettings};
use crate::room::CommandError;

/// A freshly created room, still in `Creating` phase.
#[derive(Debug)]
pub struct NewRoom {
    pub room_id: String,
    pub run_id: String,
    pub state: RoomStateView,
}

/// Result of an accepted command, for the originating connection.
#[derive(Debug)]
pub struct AppliedCommand {
    pub run_id: String,
    pub state: RoomStateView,
    pub forwards: Vec<EngineForward>,
}

pub struct RoomRegistry {
    rooms: DashMap<String, Mutex<Room>>,
    fanout: Arc<RoomFanout>,
    empty_grace: Duration,
}

impl RoomRegistry {
    pub fn new(fanout: Arc<RoomFanout>, empty_grace: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            fanout,
            empty_grace,
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Allocate a room id, register the creator, and open the room's
    /// broadcast channel. The room stays in `Creating` until the engine
    /// acknowledges.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        settings: RoomSettings,
        creator_user_id: String,
        creator_device_id: String,
        creator_nickname: String,
        creator_position: Option<Position>,
        initial_tracks: Vec<Track>,
    ) -> NewRoom {
        let room_id = prefixed_ulid(prefix::ROOM);
        let run_id = prefixed_ulid(prefix::WORKFLOW_RUN);
        let room = Room::new(
            room_id.clone(),
            run_id.clone(),
            settings,
            creator_user_id,
            creator_device_id,
            creator_nickname,
            creator_position,
            initial_tracks,
            self.empty_grace,
        );
        let state = room.state_view();
        self.fanout.ensure(&room_id);
        self.rooms.insert(room_id.clone(), Mutex::new(room));
        NewRoom {
            room_id,
            run_id,
            state,
        }
    }

    /// Apply one command under the room's lock.
    ///
    /// Accepted events are broadcast before the lock is released; a
    /// rejection is returned to the caller and never broadcast.
    pub fn apply(
        &self,
        room_id: &str,
        command: Command,
        origin_session: Option<&str>,
    ) -> Result<AppliedCommand, CommandError> {
        let Some(entry) = self.rooms.get(room_id) else {
            return Err(CommandError::RoomNotFound);
        };
        let mut room = entry.lock();
        let applied = room.apply(command)?;
        for event in &applied.events {
            self.dispatch_event(room_id, event, origin_session);
        }
        let result = AppliedCommand {
            run_id: room.run_id.clone(),
            state: room.state_view(),
            forwards: applied.forwards,
        };
        let terminated = room.is_terminated();
        drop(room);
        drop(entry);
        if terminated {
            self.remove(room_id);
        }
        Ok(result)
    }

    /// Merge an engine acknowledgement snapshot and re-broadcast if it
    /// changed anything. Idempotent.
    pub fn apply_engine_snapshot(
        &self,
        room_id: &str,
        snapshot: &EngineSnapshot,
    ) -> Result<RoomStateView, CommandError> {
        let Some(entry) = self.rooms.get(room_id) else {
            return Err(CommandError::RoomNotFound);
        };
        let mut room = entry.lock();
        let events = room.apply_engine_snapshot(snapshot);
        for event in &events {
            self.dispatch_event(room_id, event, None);
        }
        Ok(room.state_view())
    }

    /// Tear down a room whose engine creation failed: the failure event is
    /// broadcast, then every trace of the room is gone.
    pub fn fail_creation(&self, room_id: &str, reason: &str) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.lock();
        let events = room.abort_creation(reason);
        for event in &events {
            self.dispatch_event(room_id, event, None);
        }
        drop(room);
        drop(entry);
        self.remove(room_id);
        tracing::warn!(room_id = %room_id, reason, "room creation rolled back");
    }

    pub fn snapshot(&self, room_id: &str) -> Option<RoomStateView> {
        self.rooms.get(room_id).map(|entry| entry.lock().state_view())
    }

    pub fn run_id(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).map(|entry| entry.lock().run_id.clone())
    }

    pub fn list_public(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .filter_map(|entry| {
                let room = entry.lock();
                room.settings.public.then(|| room.summary())
            })
            .collect();
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }

    /// Terminate rooms whose empty-grace period expired. Returns the
    /// (room_id, run_id) pairs so the caller can notify the engine.
    pub fn sweep_empty(&self) -> Vec<(String, String)> {
        if self.empty_grace.is_zero() {
            return Vec::new();
        }
        let mut expired = Vec::new();
        for entry in self.rooms.iter() {
            let mut room = entry.lock();
            if room.empty_grace_expired() {
                let events = room.expire_empty();
                for event in &events {
                    self.dispatch_event(entry.key(), event, None);
                }
                expired.push((entry.key().clone(), room.run_id.clone()));
            }
        }
        for (room_id, _) in &expired {
            self.remove(room_id);
        }
        expired
    }

    fn dispatch_event(&self, room_id: &str, event: &RoomEvent, origin_session: Option<&str>) {
        let exclude_session = if event.suppresses_origin_echo() {
            origin_session.map(str::to_string)
        } else {
            None
        };
        self.fanout.dispatch(
            room_id,
            BroadcastPayload {
                event_name: event.name(),
                data: event.payload(),
                exclude_session,
            },
        );
    }

    fn remove(&self, room_id: &str) {
        self.rooms.remove(room_id);
        self.fanout.remove(room_id);
    }
}
