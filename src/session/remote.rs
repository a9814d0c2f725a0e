//! Remote Stream Accumulator
//!
//! Remote tracks arrive one at a time, in any order, through two paths:
//! track events while negotiating and a receiver scan once established.
//! Both feed the same append-only container, deduplicated by track id.

use crate::media::{TrackKind, TrackRef};
use parking_lot::Mutex;

#[derive(Debug)]
pub struct RemoteStream {
    id: String,
    tracks: Mutex<Vec<TrackRef>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends the track unless it is already present. Returns `true` if added.
    pub fn add_track(&self, track: TrackRef) -> bool {
        let mut tracks = self.tracks.lock();
        let id = track.id();
        if tracks.iter().any(|t| t.id() == id) {
            tracing::debug!("Remote track {} already present", id);
            return false;
        }
        tracing::debug!("Remote {} track added: {}", track.kind(), id);
        tracks.push(track);
        true
    }

    pub fn tracks(&self) -> Vec<TrackRef> {
        self.tracks.lock().clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn count_of(&self, kind: TrackKind) -> usize {
        self.tracks.lock().iter().filter(|t| t.kind() == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    /// Drops every track; only used at session teardown
    pub fn clear(&self) {
        self.tracks.lock().clear();
    }
}

impl Default for RemoteStream {
    fn default() -> Self {
        Self::new()
    }
}
