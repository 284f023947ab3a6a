//! Per-room vote records.
//!
//! The tally for a track is always the number of distinct users with a
//! recorded (user, track) pair, so replaying the same vote sequence always
//! promotes at the same vote.

use std::collections::HashSet;

/// The (userID, trackID) vote records of one room.
#[derive(Debug, Default)]
pub struct VoteBook {
    cast: HashSet<(String, String)>,
}

/// Promotion rule: a pure function of (count, threshold).
pub fn promotes(count: usize, threshold: u32) -> bool {
    count >= threshold as usize
}

impl VoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a vote record exists for (user, track).
    pub fn has(&self, user_id: &str, track_id: &str) -> bool {
        self.cast
            .contains(&(user_id.to_string(), track_id.to_string()))
    }

    /// Record a vote. Returns the new tally for the track, or `None` when
    /// the user already voted for it.
    pub fn cast(&mut self, user_id: &str, track_id: &str) -> Option<usize> {
        if !self
            .cast
            .insert((user_id.to_string(), track_id.to_string()))
        {
            return None;
        }
        Some(self.count(track_id))
    }

    /// Number of distinct users who voted for a track.
    pub fn count(&self, track_id: &str) -> usize {
        self.cast.iter().filter(|(_, t)| t == track_id).count()
    }

    /// Drop every vote for a track (after promotion).
    pub fn clear_track(&mut self, track_id: &str) {
        self.cast.retain(|(_, t)| t != track_id);
    }

    /// Drop a leaving user's votes. Returns the track ids whose tallies
    /// changed so the caller can recompute queue counts.
    pub fn remove_user(&mut self, user_id: &str) -> Vec<String> {
        let affected: Vec<String> = self
            .cast
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, t)| t.clone())
            .collect();
        self.cast.retain(|(u, _)| u != user_id);
        affected
    }
}
