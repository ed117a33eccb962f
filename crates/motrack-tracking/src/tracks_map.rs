//! Working copies of tracks for background jobs.
//!
//! A job copies the tracks it needs into a [`TracksMap`], mutates the copies
//! without holding any lock on the document, and merges them back once.

use parking_lot::Mutex;
use tracing::debug;

use crate::document::{SharedTracking, Tracking};
use crate::object::TrackingObject;
use crate::track::{Track, TrackId};

/// Arena of track copies plus, at the same index, the id of the live track
/// each copy came from.
#[derive(Debug)]
pub struct TracksMap {
    object_name: String,
    is_camera: bool,
    tracks: Vec<Track>,
    /// Original ids; also serializes merges of this map.
    originals: Mutex<Vec<TrackId>>,
}

impl TracksMap {
    pub fn new(object_name: impl Into<String>, is_camera: bool) -> Self {
        Self {
            object_name: object_name.into(),
            is_camera,
            tracks: Vec::new(),
            originals: Mutex::new(Vec::new()),
        }
    }

    /// Deep copies of the tracks of `object` accepted by `filter`.
    pub fn from_tracks(object: &TrackingObject, filter: impl Fn(&Track) -> bool) -> Self {
        let mut map = Self::new(object.name.clone(), object.is_camera);
        for track in object.tracks.iter().filter(|t| filter(t)) {
            map.insert(track.clone(), track.id);
        }
        map
    }

    /// Add a copy standing for the live track `original`. Returns its index.
    pub fn insert(&mut self, copy: Track, original: TrackId) -> usize {
        self.tracks.push(copy);
        self.originals.get_mut().push(original);
        self.tracks.len() - 1
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn is_camera(&self) -> bool {
        self.is_camera
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn original_id(&self, index: usize) -> Option<TrackId> {
        self.originals.lock().get(index).copied()
    }

    /// Write the copies back into `doc`.
    ///
    /// Copies whose live track still exists replace its data, keeping the
    /// live name and selection, visibility and lock flags. Copies whose track
    /// was deleted meanwhile are added as new tracks, and the index is
    /// rebound to them so a later merge updates the same track. The object is
    /// re-created if it was deleted. Live tracks with no copy are untouched.
    pub fn merge(&self, doc: &mut Tracking) {
        let mut originals = self.originals.lock();
        let object = doc.ensure_object(&self.object_name, self.is_camera);
        let object = &mut doc.objects[object];

        let (mut updated, mut adopted) = (0usize, 0usize);
        for (copy, original) in self.tracks.iter().zip(originals.iter_mut()) {
            match object.track_mut(*original) {
                Some(live) => {
                    let name = std::mem::take(&mut live.name);
                    let (selected, hidden, locked) =
                        (live.flags.selected, live.flags.hidden, live.flags.locked);
                    *live = copy.clone();
                    live.id = *original;
                    live.name = name;
                    live.flags.selected = selected;
                    live.flags.hidden = hidden;
                    live.flags.locked = locked;
                    updated += 1;
                }
                None => {
                    let mut track = copy.clone();
                    track.id = TrackId::new();
                    *original = object.push_track(track);
                    adopted += 1;
                }
            }
        }
        debug!(object = %self.object_name, updated, adopted, "Tracks map merged");
    }

    /// [`merge`](Self::merge) under the document write lock.
    pub fn merge_shared(&self, shared: &SharedTracking) {
        let mut doc = shared.write();
        self.merge(&mut doc);
    }
}
