//! The tracking document: objects, camera calibration and settings.

use std::sync::Arc;

use motrack_core::{MotrackError, Result, Vec2};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::camera::CameraIntrinsics;
use crate::marker::Marker;
use crate::object::{unique_name, TrackingObject, CAMERA_OBJECT_NAME};
use crate::plane_track::{PlaneTrack, PlaneTrackId};
use crate::settings::{StabilizationSettings, TrackingSettings};
use crate::track::{Track, TrackId};

/// Live document shared between the editor and background jobs.
pub type SharedTracking = Arc<RwLock<Tracking>>;

/// Everything tracking-related attached to one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
    pub objects: Vec<TrackingObject>,
    pub active_object: usize,
    pub camera: CameraIntrinsics,
    pub settings: TrackingSettings,
    pub stabilization: StabilizationSettings,
}

impl Default for Tracking {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracking {
    pub fn new() -> Self {
        Self {
            objects: vec![TrackingObject::new(CAMERA_OBJECT_NAME, true)],
            active_object: 0,
            camera: CameraIntrinsics::default(),
            settings: TrackingSettings::default(),
            stabilization: StabilizationSettings::default(),
        }
    }

    pub fn into_shared(self) -> SharedTracking {
        Arc::new(RwLock::new(self))
    }

    // ── Objects ─────────────────────────────────────────────────

    pub fn object(&self, index: usize) -> Result<&TrackingObject> {
        self.objects
            .get(index)
            .ok_or_else(|| MotrackError::NotFound(format!("tracking object #{}", index)))
    }

    pub fn object_mut(&mut self, index: usize) -> Result<&mut TrackingObject> {
        self.objects
            .get_mut(index)
            .ok_or_else(|| MotrackError::NotFound(format!("tracking object #{}", index)))
    }

    pub fn object_index_by_name(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name == name)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&TrackingObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn camera_object_index(&self) -> Option<usize> {
        self.objects.iter().position(|o| o.is_camera)
    }

    pub fn camera_object(&self) -> Option<&TrackingObject> {
        self.objects.iter().find(|o| o.is_camera)
    }

    pub fn camera_object_mut(&mut self) -> Option<&mut TrackingObject> {
        self.objects.iter_mut().find(|o| o.is_camera)
    }

    pub fn active_object(&self) -> Option<&TrackingObject> {
        self.objects.get(self.active_object)
    }

    pub fn active_object_mut(&mut self) -> Option<&mut TrackingObject> {
        self.objects.get_mut(self.active_object)
    }

    /// Add a non-camera object and make it active. Returns its index.
    pub fn add_object(&mut self, name: &str) -> usize {
        let name = unique_name(name, |n| self.objects.iter().any(|o| o.name == n));
        debug!(object = %name, "Tracking object added");
        self.objects.push(TrackingObject::new(name, false));
        self.active_object = self.objects.len() - 1;
        self.active_object
    }

    /// Remove an object. The camera object can't be deleted.
    pub fn delete_object(&mut self, index: usize) -> Result<TrackingObject> {
        if self.object(index)?.is_camera {
            return Err(MotrackError::Precondition(
                "Object used for camera tracking can't be deleted".into(),
            ));
        }
        let removed = self.objects.remove(index);
        if self.active_object >= index && self.active_object > 0 {
            self.active_object -= 1;
        }
        debug!(object = %removed.name, "Tracking object deleted");
        Ok(removed)
    }

    /// Create an object that went missing while a job held a copy of it.
    pub(crate) fn ensure_object(&mut self, name: &str, is_camera: bool) -> usize {
        if let Some(idx) = self.object_index_by_name(name) {
            return idx;
        }
        let is_camera = is_camera && self.camera_object_index().is_none();
        self.objects.push(TrackingObject::new(name, is_camera));
        self.objects.len() - 1
    }

    // ── Tracks ──────────────────────────────────────────────────

    /// New keyframed track at `pos` (frame-unified) with pattern and search
    /// sizes from the settings. The track becomes the active one.
    pub fn add_track(
        &mut self,
        object: usize,
        pos: Vec2,
        frame: i32,
        width: u32,
        height: u32,
    ) -> Result<TrackId> {
        if width == 0 || height == 0 {
            return Err(MotrackError::InvalidParameter(format!(
                "frame size {}x{}",
                width, height
            )));
        }
        let dims = Vec2::new(width as f32, height as f32);
        let pattern_half = Vec2::splat(self.settings.default_pattern_size as f32 / 2.0) / dims;
        let search_half = Vec2::splat(self.settings.default_search_size as f32 / 2.0) / dims;

        let mut track = Track::with_settings("Track", &self.settings);
        track.insert_marker(Marker::new(frame, pos, pattern_half, search_half));

        let obj = self.object_mut(object)?;
        let id = obj.push_track(track);
        obj.active_track = Some(id);
        Ok(id)
    }

    /// Object index and track for an id, searching every object.
    pub fn find_track(&self, id: TrackId) -> Option<(usize, &Track)> {
        self.objects
            .iter()
            .enumerate()
            .find_map(|(idx, obj)| obj.track(id).map(|t| (idx, t)))
    }

    pub fn find_track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.objects.iter_mut().find_map(|obj| obj.track_mut(id))
    }

    /// Remove a point track. Plane tracks lose the reference; planes that
    /// would drop below four point tracks are removed with it.
    pub fn delete_track(&mut self, object: usize, id: TrackId) -> Result<Track> {
        let obj = self.object_mut(object)?;
        let idx = obj
            .track_index(id)
            .ok_or_else(|| MotrackError::NotFound(format!("track {}", id)))?;
        let removed = obj.tracks.remove(idx);

        obj.plane_tracks.retain_mut(|plane| {
            if !plane.has_point_track(id) {
                return true;
            }
            let kept = plane.remove_point_track(id);
            if !kept {
                debug!(plane = %plane.name, "Plane track removed with its point track");
            }
            kept
        });
        if obj.active_track == Some(id) {
            obj.active_track = None;
        }
        if obj
            .active_plane_track
            .is_some_and(|p| obj.plane_track(p).is_none())
        {
            obj.active_plane_track = None;
        }
        Ok(removed)
    }

    /// Total number of point tracks in every object.
    pub fn track_count(&self) -> usize {
        self.objects.iter().map(|o| o.tracks.len()).sum()
    }

    // ── Plane tracks ────────────────────────────────────────────

    /// Plane track over the selected point tracks of `object` at `frame`.
    pub fn add_plane_track(&mut self, object: usize, frame: i32) -> Result<PlaneTrackId> {
        let obj = self.object_mut(object)?;
        let selected: Vec<&Track> = obj.selected_tracks().collect();
        let name = obj.unique_plane_track_name("Plane Track");
        let plane = PlaneTrack::from_tracks(name, &selected, frame)?;
        let id = plane.id;
        obj.plane_tracks.push(plane);
        obj.active_plane_track = Some(id);
        Ok(id)
    }

    pub fn delete_plane_track(&mut self, object: usize, id: PlaneTrackId) -> Result<PlaneTrack> {
        let obj = self.object_mut(object)?;
        let idx = obj
            .plane_tracks
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| MotrackError::NotFound(format!("plane track {}", id)))?;
        if obj.active_plane_track == Some(id) {
            obj.active_plane_track = None;
        }
        Ok(obj.plane_tracks.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_tracks(n: usize) -> (Tracking, Vec<TrackId>) {
        let mut doc = Tracking::new();
        let ids = (0..n)
            .map(|i| {
                let pos = Vec2::new(0.2 + 0.1 * i as f32, 0.3 + 0.05 * i as f32);
                doc.add_track(0, pos, 1, 1920, 1080).unwrap()
            })
            .collect();
        (doc, ids)
    }

    #[test]
    fn test_new_document_has_camera() {
        let doc = Tracking::new();
        assert_eq!(doc.objects.len(), 1);
        assert!(doc.camera_object().is_some());
        assert_eq!(doc.objects[0].name, "Camera");
    }

    #[test]
    fn test_add_track_sizes_and_names() {
        let (doc, ids) = doc_with_tracks(3);
        let obj = &doc.objects[0];
        assert_eq!(obj.tracks[0].name, "Track");
        assert_eq!(obj.tracks[1].name, "Track.001");
        assert_eq!(obj.tracks[2].name, "Track.002");
        assert_eq!(obj.active_track, Some(ids[2]));

        let marker = obj.tracks[0].exact_marker(1).unwrap();
        let (min, max) = marker.pattern_minmax();
        assert!(((max.x - min.x) * 1920.0 - 21.0).abs() < 1e-3);
        assert!(((marker.search_max.y - marker.search_min.y) * 1080.0 - 71.0).abs() < 1e-3);
    }

    #[test]
    fn test_camera_object_not_deletable() {
        let mut doc = Tracking::new();
        assert!(matches!(doc.delete_object(0), Err(MotrackError::Precondition(_))));
        let idx = doc.add_object("Object");
        assert_eq!(doc.active_object, 1);
        assert_eq!(doc.add_object("Object"), 2);
        assert_eq!(doc.objects[2].name, "Object.001");
        assert!(doc.delete_object(idx).is_ok());
        assert_eq!(doc.objects.len(), 2);
    }

    #[test]
    fn test_add_plane_track_needs_four() {
        let (mut doc, _) = doc_with_tracks(3);
        assert!(matches!(doc.add_plane_track(0, 1), Err(MotrackError::Precondition(_))));
        doc.add_track(0, Vec2::new(0.7, 0.7), 1, 1920, 1080).unwrap();
        let id = doc.add_plane_track(0, 1).unwrap();
        assert_eq!(doc.objects[0].plane_track(id).unwrap().point_tracks.len(), 4);
    }

    #[test]
    fn test_delete_track_cleans_planes() {
        let (mut doc, ids) = doc_with_tracks(5);
        let plane = doc.add_plane_track(0, 1).unwrap();

        doc.delete_track(0, ids[0]).unwrap();
        let p = doc.objects[0].plane_track(plane).unwrap();
        assert_eq!(p.point_tracks.len(), 4);

        doc.delete_track(0, ids[1]).unwrap();
        assert!(doc.objects[0].plane_track(plane).is_none());
        assert!(doc.objects[0].active_plane_track.is_none());
        assert_eq!(doc.track_count(), 3);
        assert!(doc.find_track(ids[1]).is_none());
        assert_eq!(doc.find_track(ids[2]).map(|(o, _)| o), Some(0));
    }
}
