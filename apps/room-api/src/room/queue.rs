//! Ordered queue of suggested tracks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Track metadata as suggested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
}

/// A queued candidate track with its current tally.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub track: Track,
    /// Recomputed from the vote records; never mutated independently.
    pub votes: usize,
    /// Suggestion order, used as the promotion tie-break.
    pub suggested_seq: u64,
}

/// Ordered collection of candidate tracks.
///
/// Tracks enter at the tail and leave by promotion. A track id that is
/// queued, playing, or already played cannot be suggested again.
#[derive(Debug, Default)]
pub struct TrackQueue {
    entries: Vec<QueueEntry>,
    played: HashSet<String>,
    next_seq: u64,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.entries.iter().any(|e| e.track.id == track_id)
    }

    /// Insert a suggestion at the tail with zero votes.
    ///
    /// Returns `false` if the track id is already queued or already played.
    pub fn suggest(&mut self, track: Track) -> bool {
        if self.contains(&track.id) || self.played.contains(&track.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            track,
            votes: 0,
            suggested_seq: seq,
        });
        true
    }

    /// Overwrite a track's tally with the count recomputed from vote records.
    pub fn set_votes(&mut self, track_id: &str, votes: usize) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.track.id == track_id) {
            entry.votes = votes;
        }
    }

    /// Remove a specific track for promotion and mark it played.
    pub fn take(&mut self, track_id: &str) -> Option<Track> {
        let idx = self.entries.iter().position(|e| e.track.id == track_id)?;
        let entry = self.entries.remove(idx);
        self.played.insert(entry.track.id.clone());
        Some(entry.track)
    }

    /// Remove the highest-voted track and mark it played.
    ///
    /// Ties break toward the earliest suggestion.
    pub fn take_top(&mut self) -> Option<Track> {
        let top = self
            .entries
            .iter()
            .max_by(|a, b| {
                a.votes
                    .cmp(&b.votes)
                    .then(b.suggested_seq.cmp(&a.suggested_seq))
            })?
            .track
            .id
            .clone();
        self.take(&top)
    }

    /// Mark a track as played without it having been queued here, e.g. when
    /// an engine snapshot reports a track this relay never saw promoted.
    pub fn mark_played(&mut self, track_id: &str) {
        self.entries.retain(|e| e.track.id != track_id);
        self.played.insert(track_id.to_string());
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            title: format!("title {id}"),
            artist: "artist".to_string(),
        }
    }

    #[test]
    fn suggest_appends_at_tail_with_zero_votes() {
        let mut q = TrackQueue::new();
        assert!(q.suggest(track("a")));
        assert!(q.suggest(track("b")));
        assert_eq!(q.entries()[0].track.id, "a");
        assert_eq!(q.entries()[1].track.id, "b");
        assert_eq!(q.entries()[1].votes, 0);
    }

    #[test]
    fn duplicate_suggestion_rejected() {
        let mut q = TrackQueue::new();
        assert!(q.suggest(track("a")));
        assert!(!q.suggest(track("a")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn played_track_cannot_be_resuggested() {
        let mut q = TrackQueue::new();
        q.suggest(track("a"));
        assert_eq!(q.take("a").unwrap().id, "a");
        assert!(!q.suggest(track("a")));
        assert!(q.is_empty());
    }

    #[test]
    fn take_top_prefers_highest_votes() {
        let mut q = TrackQueue::new();
        q.suggest(track("a"));
        q.suggest(track("b"));
        q.set_votes("b", 3);
        q.set_votes("a", 1);
        assert_eq!(q.take_top().unwrap().id, "b");
    }

    #[test]
    fn take_top_tie_breaks_to_earliest_suggestion() {
        let mut q = TrackQueue::new();
        q.suggest(track("a"));
        q.suggest(track("b"));
        q.set_votes("a", 2);
        q.set_votes("b", 2);
        assert_eq!(q.take_top().unwrap().id, "a");
    }

    #[test]
    fn take_top_on_empty_queue() {
        let mut q = TrackQueue::new();
        assert!(q.take_top().is_none());
    }
}
