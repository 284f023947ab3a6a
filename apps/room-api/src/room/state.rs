//! The room state machine.
//!
//! Owns all mutable room state. Every mutation goes through [`Room::apply`],
//! which validates the command, performs the transition, and returns the
//! events to broadcast plus the workflow-engine operations to forward.
//! Callers hold the per-room lock for the whole call, so a transition is
//! atomic with respect to concurrent commands on the same room.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::{EngineNowPlaying, EngineSnapshot};
use crate::geo::{Position, PositionConstraint};
use crate::room::devices::DeviceRegistry;
use crate::room::events::{
    MemberView, NowPlayingView, QueueEntryView, RoomEvent, RoomStateView, RoomSummary,
};
use crate::room::queue::{Track, TrackQueue};
use crate::room::votes::{self, VoteBook};
use crate::room::CommandError;

pub const MAX_CHAT_LEN: usize = 500;
pub const MAX_NICKNAME_LEN: usize = 32;
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// Lifecycle phase. `Creating` is left only when the workflow engine
/// acknowledges creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Creating,
    Ready,
    Playing,
    Paused,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingMode {
    /// Any member's votes count toward promotion.
    Free,
    /// Broadcast-only: the creator drives playback, voting is disabled.
    Direct,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: String,
    pub nickname: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub name: String,
    pub public: bool,
    pub voting_mode: VotingMode,
    pub minimum_vote_threshold: u32,
    pub position_constraint: Option<PositionConstraint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: Track,
    pub elapsed_seconds: u64,
    pub duration_seconds: Option<u64>,
}

/// A client command, already shaped by the gateway or HTTP layer.
#[derive(Debug, Clone)]
pub enum Command {
    Join {
        user_id: String,
        device_id: String,
        nickname: String,
        position: Option<Position>,
    },
    Leave {
        user_id: String,
    },
    SuggestTrack {
        user_id: String,
        track: Track,
    },
    Vote {
        user_id: String,
        track_id: String,
    },
    GoToNextTrack {
        user_id: String,
    },
    Play {
        user_id: String,
    },
    Pause {
        user_id: String,
    },
    ChangeEmittingDevice {
        user_id: String,
        device_id: String,
    },
    Chat {
        user_id: String,
        text: String,
    },
    UpdatePosition {
        user_id: String,
        device_id: String,
        position: Position,
    },
    Terminate {
        user_id: String,
    },
}

/// Workflow-engine operation to forward once the local transition committed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineForward {
    Join { user_id: String, device_id: String },
    Leave { user_id: String },
    Play,
    Pause,
    NextTrack,
    SuggestTracks { tracks: Vec<Track> },
    ChangeEmittingDevice { user_id: String, device_id: String },
    Terminate,
}

/// Result of an accepted transition.
#[derive(Debug, Default)]
pub struct Applied {
    pub events: Vec<RoomEvent>,
    pub forwards: Vec<EngineForward>,
}

/// One listening room. Owned by the [`RoomRegistry`](super::RoomRegistry);
/// nothing outside the state machine mutates these fields.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub run_id: String,
    pub settings: RoomSettings,
    pub phase: RoomPhase,
    creator_user_id: String,
    members: Vec<Member>,
    devices: DeviceRegistry,
    queue: TrackQueue,
    votes: VoteBook,
    now_playing: Option<NowPlaying>,
    /// Set while the room has no members and a grace period applies.
    pub empty_since: Option<Instant>,
    empty_grace: Duration,
}

impl Room {
    /// Create a room in `Creating` phase with the creator as first member
    /// and their device as the seed emitting device.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        run_id: String,
        settings: RoomSettings,
        creator_user_id: String,
        creator_device_id: String,
        creator_nickname: String,
        creator_position: Option<Position>,
        initial_tracks: Vec<Track>,
        empty_grace: Duration,
    ) -> Self {
        let now = Utc::now();
        let mut devices = DeviceRegistry::new();
        devices.admit(&creator_device_id, &creator_user_id, creator_position, now);
        devices.set_emitting(&creator_device_id);

        let mut queue = TrackQueue::new();
        for track in initial_tracks {
            queue.suggest(track);
        }

        Self {
            id,
            run_id,
            settings,
            phase: RoomPhase::Creating,
            creator_user_id: creator_user_id.clone(),
            members: vec![Member {
                user_id: creator_user_id,
                nickname: creator_nickname,
                joined_at: now,
            }],
            devices,
            queue,
            votes: VoteBook::new(),
            now_playing: None,
            empty_since: None,
            empty_grace,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_playing(&self) -> bool {
        self.phase == RoomPhase::Playing
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == RoomPhase::Terminated
    }

    pub fn creator_user_id(&self) -> &str {
        &self.creator_user_id
    }

    fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    fn require_member(&self, user_id: &str) -> Result<&Member, CommandError> {
        self.member(user_id).ok_or(CommandError::NotAMember)
    }

    fn require_creator(&self, user_id: &str) -> Result<(), CommandError> {
        if user_id != self.creator_user_id {
            return Err(CommandError::NotCreator);
        }
        Ok(())
    }

    /// Re-validated per command since devices move.
    fn check_geofence(&self, position: Option<Position>) -> Result<(), CommandError> {
        match &self.settings.position_constraint {
            Some(constraint) if !constraint.admits(position, Utc::now()) => {
                Err(CommandError::GeofenceViolation)
            }
            _ => Ok(()),
        }
    }

    /// Apply one command. Rejections leave the room untouched.
    pub fn apply(&mut self, command: Command) -> Result<Applied, CommandError> {
        if self.is_terminated() {
            return Err(CommandError::RoomNotFound);
        }
        match command {
            Command::Join {
                user_id,
                device_id,
                nickname,
                position,
            } => self.join(user_id, device_id, nickname, position),
            Command::Leave { user_id } => self.leave(&user_id),
            Command::SuggestTrack { user_id, track } => self.suggest_track(&user_id, track),
            Command::Vote { user_id, track_id } => self.vote(&user_id, &track_id),
            Command::GoToNextTrack { user_id } => self.go_to_next_track(&user_id),
            Command::Play { user_id } => self.play(&user_id),
            Command::Pause { user_id } => self.pause(&user_id),
            Command::ChangeEmittingDevice { user_id, device_id } => {
                self.change_emitting_device(&user_id, &device_id)
            }
            Command::Chat { user_id, text } => self.chat(&user_id, &text),
            Command::UpdatePosition {
                user_id,
                device_id,
                position,
            } => self.update_position(&user_id, &device_id, position),
            Command::Terminate { user_id } => self.terminate_by(&user_id),
        }
    }

    fn join(
        &mut self,
        user_id: String,
        device_id: String,
        nickname: String,
        position: Option<Position>,
    ) -> Result<Applied, CommandError> {
        let nickname = nickname.trim().to_string();
        if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LEN {
            return Err(CommandError::Validation(format!(
                "Nickname must be 1-{MAX_NICKNAME_LEN} characters"
            )));
        }
        self.check_geofence(position)?;

        let now = Utc::now();
        if self.member(&user_id).is_none() {
            self.members.push(Member {
                user_id: user_id.clone(),
                nickname: nickname.clone(),
                joined_at: now,
            });
        }
        self.devices.admit(&device_id, &user_id, position, now);
        self.empty_since = None;

        let mut events = vec![RoomEvent::UserJoined {
            user_id: user_id.clone(),
            nickname,
            member_count: self.member_count(),
        }];
        if let Some(elected) = self.devices.elect() {
            events.push(self.emitting_changed_event(&elected)?);
        }
        self.check_invariants()?;

        Ok(Applied {
            events,
            forwards: vec![EngineForward::Join { user_id, device_id }],
        })
    }

    fn leave(&mut self, user_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        self.members.retain(|m| m.user_id != user_id);

        let (_removed, emitter_removed) = self.devices.remove_user(user_id);

        let mut events = Vec::new();

        // A leaving member takes their votes with them; tallies are
        // recomputed from the remaining records.
        let affected = self.votes.remove_user(user_id);
        if !affected.is_empty() {
            for track_id in &affected {
                let count = self.votes.count(track_id);
                self.queue.set_votes(track_id, count);
            }
            events.push(self.queue_updated_event());
        }

        events.push(RoomEvent::UserLeft {
            user_id: user_id.to_string(),
            member_count: self.member_count(),
        });

        if emitter_removed {
            if let Some(elected) = self.devices.elect() {
                events.push(self.emitting_changed_event(&elected)?);
            }
        }
        self.check_invariants()?;

        let mut forwards = vec![EngineForward::Leave {
            user_id: user_id.to_string(),
        }];

        if self.members.is_empty() {
            if self.empty_grace.is_zero() {
                events.extend(self.terminate("room is empty"));
                forwards.push(EngineForward::Terminate);
            } else {
                self.empty_since = Some(Instant::now());
            }
        }

        Ok(Applied { events, forwards })
    }

    fn suggest_track(&mut self, user_id: &str, track: Track) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        if track.id.trim().is_empty() || track.title.trim().is_empty() {
            return Err(CommandError::Validation(
                "Track id and title are required".to_string(),
            ));
        }
        if !self.queue.suggest(track.clone()) {
            return Err(CommandError::DuplicateTrack);
        }
        Ok(Applied {
            events: vec![self.queue_updated_event()],
            forwards: vec![EngineForward::SuggestTracks {
                tracks: vec![track],
            }],
        })
    }

    fn vote(&mut self, user_id: &str, track_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        if self.settings.voting_mode == VotingMode::Direct {
            return Err(CommandError::Validation(
                "Voting is disabled in direct mode".to_string(),
            ));
        }
        if !self.queue.contains(track_id) {
            return Err(CommandError::UnknownTrack);
        }
        if self.votes.has(user_id, track_id) {
            return Err(CommandError::AlreadyVoted);
        }
        self.check_geofence(self.devices.latest_position(user_id))?;

        let count = self
            .votes
            .cast(user_id, track_id)
            .ok_or_else(|| CommandError::Internal("vote record vanished".to_string()))?;
        self.queue.set_votes(track_id, count);

        if votes::promotes(count, self.settings.minimum_vote_threshold) {
            let mut applied = self.promote(track_id)?;
            applied.forwards = vec![EngineForward::Play];
            return Ok(applied);
        }

        Ok(Applied {
            events: vec![self.queue_updated_event()],
            forwards: vec![],
        })
    }

    fn go_to_next_track(&mut self, user_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        self.require_creator(user_id)?;

        let Some(top) = self.queue.take_top() else {
            // Empty queue: playback stops.
            self.phase = RoomPhase::Paused;
            self.now_playing = None;
            return Ok(Applied {
                events: vec![RoomEvent::PlaybackChanged {
                    is_playing: false,
                    now_playing: None,
                }],
                forwards: vec![EngineForward::NextTrack],
            });
        };

        // take_top already dequeued the track; finish the promotion.
        self.votes.clear_track(&top.id);
        self.now_playing = Some(NowPlaying {
            track: top.clone(),
            elapsed_seconds: 0,
            duration_seconds: None,
        });
        self.phase = RoomPhase::Playing;

        Ok(Applied {
            events: vec![
                self.queue_updated_event(),
                RoomEvent::TrackPromoted { track: top },
                RoomEvent::PlaybackChanged {
                    is_playing: true,
                    now_playing: self.now_playing_view(),
                },
            ],
            forwards: vec![EngineForward::NextTrack],
        })
    }

    /// Dequeue `track_id`, make it the playing track, clear its votes.
    fn promote(&mut self, track_id: &str) -> Result<Applied, CommandError> {
        let track = self
            .queue
            .take(track_id)
            .ok_or_else(|| CommandError::Internal(format!("promoted track {track_id} missing")))?;
        self.votes.clear_track(track_id);
        self.now_playing = Some(NowPlaying {
            track: track.clone(),
            elapsed_seconds: 0,
            duration_seconds: None,
        });
        self.phase = RoomPhase::Playing;

        Ok(Applied {
            events: vec![
                self.queue_updated_event(),
                RoomEvent::TrackPromoted { track },
                RoomEvent::PlaybackChanged {
                    is_playing: true,
                    now_playing: self.now_playing_view(),
                },
            ],
            forwards: vec![],
        })
    }

    fn play(&mut self, user_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        if self.phase == RoomPhase::Playing {
            return Ok(Applied::default());
        }
        if self.now_playing.is_none() {
            return Err(CommandError::Validation(
                "No track to play; suggest and vote first".to_string(),
            ));
        }
        self.phase = RoomPhase::Playing;
        Ok(Applied {
            events: vec![RoomEvent::PlaybackChanged {
                is_playing: true,
                now_playing: self.now_playing_view(),
            }],
            forwards: vec![EngineForward::Play],
        })
    }

    fn pause(&mut self, user_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        if self.phase != RoomPhase::Playing {
            return Ok(Applied::default());
        }
        self.phase = RoomPhase::Paused;
        Ok(Applied {
            events: vec![RoomEvent::PlaybackChanged {
                is_playing: false,
                now_playing: self.now_playing_view(),
            }],
            forwards: vec![EngineForward::Pause],
        })
    }

    fn change_emitting_device(
        &mut self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        let owner = self
            .devices
            .owner_of(device_id)
            .ok_or(CommandError::DeviceNotInRoom)?
            .to_string();
        if owner != user_id {
            self.require_creator(user_id)?;
        }
        if self.devices.emitting_device_id() == Some(device_id) {
            return Ok(Applied::default());
        }
        self.devices.set_emitting(device_id);
        self.check_invariants()?;
        Ok(Applied {
            events: vec![RoomEvent::EmittingDeviceChanged {
                device_id: device_id.to_string(),
                user_id: owner.clone(),
            }],
            forwards: vec![EngineForward::ChangeEmittingDevice {
                user_id: owner,
                device_id: device_id.to_string(),
            }],
        })
    }

    fn chat(&mut self, user_id: &str, text: &str) -> Result<Applied, CommandError> {
        let member = self.require_member(user_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CommandError::Validation(
                "Chat message must not be empty".to_string(),
            ));
        }
        if text.len() > MAX_CHAT_LEN {
            return Err(CommandError::Validation(format!(
                "Chat message must be at most {MAX_CHAT_LEN} characters"
            )));
        }
        Ok(Applied {
            events: vec![RoomEvent::ChatMessage {
                user_id: user_id.to_string(),
                nickname: member.nickname.clone(),
                text: text.to_string(),
            }],
            forwards: vec![],
        })
    }

    fn update_position(
        &mut self,
        user_id: &str,
        device_id: &str,
        position: Position,
    ) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        if self.devices.owner_of(device_id) != Some(user_id) {
            return Err(CommandError::DeviceNotInRoom);
        }
        self.devices.update_position(device_id, position, Utc::now());
        Ok(Applied::default())
    }

    fn terminate_by(&mut self, user_id: &str) -> Result<Applied, CommandError> {
        self.require_member(user_id)?;
        self.require_creator(user_id)?;
        let events = self.terminate("terminated by creator");
        Ok(Applied {
            events,
            forwards: vec![EngineForward::Terminate],
        })
    }

    /// Roll back a room whose engine creation failed or timed out. The
    /// failure event is the only externally observable outcome.
    pub fn abort_creation(&mut self, reason: &str) -> Vec<RoomEvent> {
        self.phase = RoomPhase::Terminated;
        self.now_playing = None;
        vec![RoomEvent::CreateFailed {
            reason: reason.to_string(),
        }]
    }

    /// Terminate a room whose empty-grace period expired.
    pub fn expire_empty(&mut self) -> Vec<RoomEvent> {
        self.terminate("room stayed empty past the grace period")
    }

    /// Whether the room has been empty longer than the grace period.
    pub fn empty_grace_expired(&self) -> bool {
        match self.empty_since {
            Some(since) => since.elapsed() >= self.empty_grace,
            None => false,
        }
    }

    fn terminate(&mut self, reason: &str) -> Vec<RoomEvent> {
        self.phase = RoomPhase::Terminated;
        self.now_playing = None;
        vec![RoomEvent::Terminated {
            reason: reason.to_string(),
        }]
    }

    /// Merge an engine acknowledgement snapshot.
    ///
    /// Last-snapshot-wins on the fields the engine owns (`is_playing`,
    /// `now_playing`). Applying the same snapshot twice is a no-op, so
    /// out-of-order or duplicated callbacks are safe.
    pub fn apply_engine_snapshot(&mut self, snapshot: &EngineSnapshot) -> Vec<RoomEvent> {
        let mut changed = false;

        if self.phase == RoomPhase::Creating {
            self.phase = RoomPhase::Ready;
            changed = true;
        }

        if let Some(now_playing) = &snapshot.now_playing {
            let merged = Self::now_playing_from_engine(now_playing);
            if self.now_playing.as_ref() != Some(&merged) {
                // The engine may promote tracks this relay never saw.
                self.queue.mark_played(&merged.track.id);
                self.votes.clear_track(&merged.track.id);
                self.now_playing = Some(merged);
                changed = true;
            }
        }

        if let Some(is_playing) = snapshot.is_playing {
            let target = if is_playing {
                RoomPhase::Playing
            } else if self.now_playing.is_none() && self.phase == RoomPhase::Ready {
                RoomPhase::Ready
            } else {
                RoomPhase::Paused
            };
            if self.phase != target {
                self.phase = target;
                changed = true;
            }
        }

        if changed {
            vec![RoomEvent::StateSynced {
                state: self.state_view(),
            }]
        } else {
            Vec::new()
        }
    }

    fn now_playing_from_engine(engine: &EngineNowPlaying) -> NowPlaying {
        NowPlaying {
            track: Track {
                id: engine.track_id.clone(),
                title: engine.title.clone(),
                artist: engine.artist.clone(),
            },
            elapsed_seconds: engine.elapsed_seconds,
            duration_seconds: engine.duration_seconds,
        }
    }

    fn emitting_changed_event(&self, device_id: &str) -> Result<RoomEvent, CommandError> {
        let owner = self
            .devices
            .owner_of(device_id)
            .ok_or_else(|| CommandError::Internal(format!("elected device {device_id} missing")))?;
        Ok(RoomEvent::EmittingDeviceChanged {
            device_id: device_id.to_string(),
            user_id: owner.to_string(),
        })
    }

    fn queue_updated_event(&self) -> RoomEvent {
        RoomEvent::QueueUpdated {
            queue: self.queue_view(),
        }
    }

    fn check_invariants(&self) -> Result<(), CommandError> {
        self.devices
            .check_single_emitter()
            .map_err(CommandError::Internal)
    }

    fn queue_view(&self) -> Vec<QueueEntryView> {
        self.queue
            .entries()
            .iter()
            .map(|e| QueueEntryView {
                track: e.track.clone(),
                votes: e.votes,
            })
            .collect()
    }

    fn now_playing_view(&self) -> Option<NowPlayingView> {
        self.now_playing.as_ref().map(|np| NowPlayingView {
            track: np.track.clone(),
            elapsed_seconds: np.elapsed_seconds,
            duration_seconds: np.duration_seconds,
        })
    }

    pub fn state_view(&self) -> RoomStateView {
        RoomStateView {
            room_id: self.id.clone(),
            name: self.settings.name.clone(),
            public: self.settings.public,
            voting_mode: self.settings.voting_mode,
            minimum_vote_threshold: self.settings.minimum_vote_threshold,
            phase: self.phase,
            is_playing: self.is_playing(),
            now_playing: self.now_playing_view(),
            emitting_device_id: self.devices.emitting_device_id().map(str::to_string),
            position_constraint: self.settings.position_constraint.clone(),
            members: self
                .members
                .iter()
                .map(|m| MemberView {
                    user_id: m.user_id.clone(),
                    nickname: m.nickname.clone(),
                    role: if m.user_id == self.creator_user_id {
                        "creator".to_string()
                    } else {
                        "member".to_string()
                    },
                    device_ids: self
                        .devices
                        .devices()
                        .iter()
                        .filter(|d| d.owner_user_id == m.user_id)
                        .map(|d| d.id.clone())
                        .collect(),
                })
                .collect(),
            queue: self.queue_view(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id.clone(),
            name: self.settings.name.clone(),
            member_count: self.member_count(),
            is_playing: self.is_playing(),
            has_position_constraint: self.settings.position_constraint.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: u32) -> RoomSettings {
        RoomSettings {
            name: "listening party".to_string(),
            public: true,
            voting_mode: VotingMode::Free,
            minimum_vote_threshold: threshold,
            position_constraint: None,
        }
    }

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            title: format!("title {id}"),
            artist: "artist".to_string(),
        }
    }

    fn room(threshold: u32) -> Room {
        let mut room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            settings(threshold),
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            None,
            vec![],
            Duration::ZERO,
        );
        // Tests drive the post-creation lifecycle.
        room.apply_engine_snapshot(&EngineSnapshot::default());
        room
    }

    fn join(room: &mut Room, user: &str, device: &str) {
        room.apply(Command::Join {
            user_id: user.to_string(),
            device_id: device.to_string(),
            nickname: user.to_string(),
            position: None,
        })
        .expect("join");
    }

    fn suggest(room: &mut Room, user: &str, id: &str) {
        room.apply(Command::SuggestTrack {
            user_id: user.to_string(),
            track: track(id),
        })
        .expect("suggest");
    }

    fn vote(room: &mut Room, user: &str, id: &str) -> Result<Applied, CommandError> {
        room.apply(Command::Vote {
            user_id: user.to_string(),
            track_id: id.to_string(),
        })
    }

    #[test]
    fn creation_starts_in_creating_with_creator_emitting() {
        let room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            settings(1),
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            None,
            vec![track("a")],
            Duration::ZERO,
        );
        assert_eq!(room.phase, RoomPhase::Creating);
        assert_eq!(room.member_count(), 1);
        let view = room.state_view();
        assert_eq!(view.emitting_device_id.as_deref(), Some("d1"));
        assert_eq!(view.queue.len(), 1);
        assert_eq!(view.members[0].role, "creator");
    }

    #[test]
    fn engine_ack_moves_creating_to_ready_idempotently() {
        let mut room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            settings(1),
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            None,
            vec![],
            Duration::ZERO,
        );
        let events = room.apply_engine_snapshot(&EngineSnapshot::default());
        assert_eq!(room.phase, RoomPhase::Ready);
        assert_eq!(events.len(), 1);

        // Same acknowledgement again: no change, no events.
        let events = room.apply_engine_snapshot(&EngineSnapshot::default());
        assert_eq!(room.phase, RoomPhase::Ready);
        assert!(events.is_empty());
    }

    #[test]
    fn vote_promotes_exactly_at_threshold() {
        let mut room = room(2);
        join(&mut room, "bob", "d2");
        suggest(&mut room, "alice", "t");

        let applied = vote(&mut room, "alice", "t").expect("first vote");
        assert_eq!(applied.events.len(), 1, "no promotion below threshold");
        assert_eq!(room.phase, RoomPhase::Ready);

        let applied = vote(&mut room, "bob", "t").expect("second vote");
        assert!(applied
            .events
            .iter()
            .any(|e| matches!(e, RoomEvent::TrackPromoted { track } if track.id == "t")));
        assert_eq!(room.phase, RoomPhase::Playing);
        let view = room.state_view();
        assert_eq!(view.now_playing.unwrap().track.id, "t");
        assert!(view.is_playing);
        assert!(view.queue.is_empty());
        assert_eq!(applied.forwards, vec![EngineForward::Play]);
    }

    #[test]
    fn duplicate_vote_rejected_without_tally_change() {
        let mut room = room(3);
        suggest(&mut room, "alice", "t");
        vote(&mut room, "alice", "t").expect("first vote");

        let err = vote(&mut room, "alice", "t").unwrap_err();
        assert_eq!(err, CommandError::AlreadyVoted);
        assert_eq!(room.state_view().queue[0].votes, 1);
    }

    #[test]
    fn vote_for_unknown_track_rejected() {
        let mut room = room(1);
        let err = vote(&mut room, "alice", "nope").unwrap_err();
        assert_eq!(err, CommandError::UnknownTrack);
    }

    #[test]
    fn vote_by_non_member_rejected() {
        let mut room = room(1);
        suggest(&mut room, "alice", "t");
        let err = vote(&mut room, "mallory", "t").unwrap_err();
        assert_eq!(err, CommandError::NotAMember);
    }

    #[test]
    fn geofenced_room_rejects_far_join_and_vote() {
        let constraint = PositionConstraint {
            lat: 48.8675,
            lng: 2.3639,
            radius_meters: 500.0,
            starts_at: None,
            ends_at: None,
        };
        let mut room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            RoomSettings {
                position_constraint: Some(constraint),
                ..settings(1)
            },
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            Some(Position {
                lat: 48.8676,
                lng: 2.3640,
            }),
            vec![track("t")],
            Duration::ZERO,
        );
        room.apply_engine_snapshot(&EngineSnapshot::default());

        // Too far away.
        let err = room
            .apply(Command::Join {
                user_id: "bob".to_string(),
                device_id: "d2".to_string(),
                nickname: "Bob".to_string(),
                position: Some(Position {
                    lat: 48.9000,
                    lng: 2.4000,
                }),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::GeofenceViolation);

        // Missing position against a mandatory constraint.
        let err = room
            .apply(Command::Join {
                user_id: "bob".to_string(),
                device_id: "d2".to_string(),
                nickname: "Bob".to_string(),
                position: None,
            })
            .unwrap_err();
        assert_eq!(err, CommandError::GeofenceViolation);

        // The creator's device wandered off; their next vote is rejected.
        room.apply(Command::UpdatePosition {
            user_id: "alice".to_string(),
            device_id: "d1".to_string(),
            position: Position {
                lat: 48.9000,
                lng: 2.4000,
            },
        })
        .expect("update position");
        let err = vote(&mut room, "alice", "t").unwrap_err();
        assert_eq!(err, CommandError::GeofenceViolation);
    }

    #[test]
    fn emitting_device_reelected_on_leave() {
        let mut room = room(1);
        join(&mut room, "bob", "d2");
        join(&mut room, "carol", "d3");
        assert_eq!(room.state_view().emitting_device_id.as_deref(), Some("d1"));

        let applied = room
            .apply(Command::Leave {
                user_id: "alice".to_string(),
            })
            .expect("leave");
        assert!(applied.events.iter().any(|e| matches!(
            e,
            RoomEvent::EmittingDeviceChanged { device_id, .. } if device_id == "d3"
        )));
        assert_eq!(room.state_view().emitting_device_id.as_deref(), Some("d3"));
    }

    #[test]
    fn leaving_user_votes_are_dropped_from_tallies() {
        let mut room = room(3);
        join(&mut room, "bob", "d2");
        suggest(&mut room, "alice", "t");
        vote(&mut room, "alice", "t").expect("vote");
        vote(&mut room, "bob", "t").expect("vote");
        assert_eq!(room.state_view().queue[0].votes, 2);

        room.apply(Command::Leave {
            user_id: "bob".to_string(),
        })
        .expect("leave");
        assert_eq!(room.state_view().queue[0].votes, 1);
    }

    #[test]
    fn last_member_leaving_terminates_without_grace() {
        let mut room = room(1);
        let applied = room
            .apply(Command::Leave {
                user_id: "alice".to_string(),
            })
            .expect("leave");
        assert!(applied
            .events
            .iter()
            .any(|e| matches!(e, RoomEvent::Terminated { .. })));
        assert!(applied.forwards.contains(&EngineForward::Terminate));
        assert!(room.is_terminated());
    }

    #[test]
    fn last_member_leaving_with_grace_keeps_room_alive() {
        let mut room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            settings(1),
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            None,
            vec![],
            Duration::from_secs(60),
        );
        room.apply_engine_snapshot(&EngineSnapshot::default());
        room.apply(Command::Leave {
            user_id: "alice".to_string(),
        })
        .expect("leave");
        assert!(!room.is_terminated());
        assert!(room.empty_since.is_some());

        // Rejoin clears the grace timer.
        join(&mut room, "bob", "d2");
        assert!(room.empty_since.is_none());
        assert_eq!(room.state_view().emitting_device_id.as_deref(), Some("d2"));
    }

    #[test]
    fn go_to_next_track_is_creator_only_and_tie_breaks_earliest() {
        let mut room = room(10);
        join(&mut room, "bob", "d2");
        suggest(&mut room, "alice", "t1");
        suggest(&mut room, "alice", "t2");
        vote(&mut room, "alice", "t1").expect("vote");
        vote(&mut room, "bob", "t2").expect("vote");

        let err = room
            .apply(Command::GoToNextTrack {
                user_id: "bob".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::NotCreator);

        // Both tracks have one vote; earliest suggestion wins.
        let applied = room
            .apply(Command::GoToNextTrack {
                user_id: "alice".to_string(),
            })
            .expect("next track");
        assert!(applied
            .events
            .iter()
            .any(|e| matches!(e, RoomEvent::TrackPromoted { track } if track.id == "t1")));
        assert_eq!(room.phase, RoomPhase::Playing);
    }

    #[test]
    fn go_to_next_track_on_empty_queue_pauses() {
        let mut room = room(1);
        let applied = room
            .apply(Command::GoToNextTrack {
                user_id: "alice".to_string(),
            })
            .expect("next track");
        assert_eq!(room.phase, RoomPhase::Paused);
        assert!(room.state_view().now_playing.is_none());
        assert!(applied.events.iter().any(|e| matches!(
            e,
            RoomEvent::PlaybackChanged {
                is_playing: false,
                ..
            }
        )));
    }

    #[test]
    fn play_pause_are_idempotent() {
        let mut room = room(1);
        suggest(&mut room, "alice", "t");
        vote(&mut room, "alice", "t").expect("vote promotes");
        assert_eq!(room.phase, RoomPhase::Playing);

        // Already playing: no events, nothing forwarded.
        let applied = room
            .apply(Command::Play {
                user_id: "alice".to_string(),
            })
            .expect("play");
        assert!(applied.events.is_empty());
        assert!(applied.forwards.is_empty());

        let applied = room
            .apply(Command::Pause {
                user_id: "alice".to_string(),
            })
            .expect("pause");
        assert_eq!(applied.forwards, vec![EngineForward::Pause]);
        assert_eq!(room.phase, RoomPhase::Paused);

        let applied = room
            .apply(Command::Pause {
                user_id: "alice".to_string(),
            })
            .expect("pause again");
        assert!(applied.events.is_empty());
    }

    #[test]
    fn play_with_no_track_rejected() {
        let mut room = room(1);
        let err = room
            .apply(Command::Play {
                user_id: "alice".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));
    }

    #[test]
    fn change_emitting_device_rules() {
        let mut room = room(1);
        join(&mut room, "bob", "d2");

        // Bob may move emission to his own device.
        let applied = room
            .apply(Command::ChangeEmittingDevice {
                user_id: "bob".to_string(),
                device_id: "d2".to_string(),
            })
            .expect("change");
        assert_eq!(applied.events.len(), 1);
        assert_eq!(room.state_view().emitting_device_id.as_deref(), Some("d2"));

        // Bob may not move it to Alice's device; the creator may.
        let err = room
            .apply(Command::ChangeEmittingDevice {
                user_id: "bob".to_string(),
                device_id: "d1".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::NotCreator);
        room.apply(Command::ChangeEmittingDevice {
            user_id: "alice".to_string(),
            device_id: "d1".to_string(),
        })
        .expect("creator override");
        assert_eq!(room.state_view().emitting_device_id.as_deref(), Some("d1"));

        let err = room
            .apply(Command::ChangeEmittingDevice {
                user_id: "alice".to_string(),
                device_id: "ghost".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::DeviceNotInRoom);
    }

    #[test]
    fn chat_validation_and_event() {
        let mut room = room(1);
        let err = room
            .apply(Command::Chat {
                user_id: "alice".to_string(),
                text: "   ".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        let err = room
            .apply(Command::Chat {
                user_id: "alice".to_string(),
                text: "x".repeat(MAX_CHAT_LEN + 1),
            })
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        let applied = room
            .apply(Command::Chat {
                user_id: "alice".to_string(),
                text: "hello".to_string(),
            })
            .expect("chat");
        assert!(applied.events[0].suppresses_origin_echo());
    }

    #[test]
    fn duplicate_suggestion_rejected_even_after_promotion() {
        let mut room = room(1);
        suggest(&mut room, "alice", "t");
        vote(&mut room, "alice", "t").expect("promote");
        let err = room
            .apply(Command::SuggestTrack {
                user_id: "alice".to_string(),
                track: track("t"),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::DuplicateTrack);
    }

    #[test]
    fn direct_mode_rejects_votes() {
        let mut room = Room::new(
            "room_1".to_string(),
            "run_1".to_string(),
            RoomSettings {
                voting_mode: VotingMode::Direct,
                ..settings(1)
            },
            "alice".to_string(),
            "d1".to_string(),
            "Alice".to_string(),
            None,
            vec![track("t")],
            Duration::ZERO,
        );
        room.apply_engine_snapshot(&EngineSnapshot::default());
        let err = vote(&mut room, "alice", "t").unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        // The creator still drives playback directly.
        room.apply(Command::GoToNextTrack {
            user_id: "alice".to_string(),
        })
        .expect("next track");
        assert_eq!(room.phase, RoomPhase::Playing);
    }

    #[test]
    fn engine_snapshot_merge_is_idempotent() {
        let mut room = room(1);
        let snapshot = EngineSnapshot {
            is_playing: Some(true),
            now_playing: Some(EngineNowPlaying {
                track_id: "t9".to_string(),
                title: "from engine".to_string(),
                artist: "engine".to_string(),
                elapsed_seconds: 42,
                duration_seconds: Some(180),
            }),
        };

        let events = room.apply_engine_snapshot(&snapshot);
        assert_eq!(events.len(), 1);
        let after_once = room.state_view();
        assert_eq!(after_once.now_playing.as_ref().unwrap().elapsed_seconds, 42);
        assert!(after_once.is_playing);

        let events = room.apply_engine_snapshot(&snapshot);
        assert!(events.is_empty(), "second application must be a no-op");
        assert_eq!(room.state_view(), after_once);
    }

    #[test]
    fn commands_on_terminated_room_are_rejected() {
        let mut room = room(1);
        room.apply(Command::Terminate {
            user_id: "alice".to_string(),
        })
        .expect("terminate");
        let err = room
            .apply(Command::Chat {
                user_id: "alice".to_string(),
                text: "anyone?".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::RoomNotFound);
    }

    #[test]
    fn terminate_is_creator_only() {
        let mut room = room(1);
        join(&mut room, "bob", "d2");
        let err = room
            .apply(Command::Terminate {
                user_id: "bob".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::NotCreator);
    }
}
