//! Copy/paste buffer for point tracks.

use tracing::debug;

use crate::object::TrackingObject;
use crate::track::{Track, TrackId};

/// Tracks copied from an object, waiting to be pasted.
///
/// The editor owns one of these; nothing in the engine keeps a global one.
#[derive(Debug, Clone, Default)]
pub struct TrackClipboard {
    tracks: Vec<Track>,
}

impl TrackClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with copies of the selected tracks of `object`.
    /// Hidden tracks are skipped.
    pub fn copy_tracks(&mut self, object: &TrackingObject) {
        self.tracks = object
            .tracks
            .iter()
            .filter(|t| t.flags.selected && !t.flags.hidden)
            .cloned()
            .collect();
        debug!(tracks = self.tracks.len(), object = %object.name, "Tracks copied");
    }

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Add fresh duplicates of the copied tracks to `object`, renamed where
    /// the name is taken. Returns the ids of the new tracks.
    pub fn paste_tracks(&self, object: &mut TrackingObject) -> Vec<TrackId> {
        let ids: Vec<TrackId> = self
            .tracks
            .iter()
            .map(|track| object.push_track(track.duplicate()))
            .collect();
        debug!(tracks = ids.len(), object = %object.name, "Tracks pasted");
        ids
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
