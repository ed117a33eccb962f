//! Plane tracks: a four-corner region carried along by point tracks.

use std::fmt;

use motrack_core::{MotrackError, Quad, Rect, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::marker::{exact_index, insert_sorted, lookup_index, MarkerCursor, PlaneMarker};
use crate::track::{Track, TrackId};

/// Minimum number of point tracks needed to estimate a homography.
pub const MIN_PLANE_POINT_TRACKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaneTrackId(pub Uuid);

impl PlaneTrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlaneTrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaneTrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneTrack {
    pub id: PlaneTrackId,
    pub name: String,
    /// Point tracks whose motion drives this plane.
    pub point_tracks: Vec<TrackId>,
    markers: Vec<PlaneMarker>,
    #[serde(skip)]
    cursor: MarkerCursor,
    /// Stop propagation at user keyframes and blend towards them.
    pub auto_keyframe: bool,
    pub selected: bool,
}

impl PlaneTrack {
    pub fn new(name: impl Into<String>, point_tracks: Vec<TrackId>) -> Self {
        Self {
            id: PlaneTrackId::new(),
            name: name.into(),
            point_tracks,
            markers: Vec::new(),
            cursor: MarkerCursor::default(),
            auto_keyframe: false,
            selected: true,
        }
    }

    /// Plane spanning the pattern bounding box of `tracks` at `frame`.
    pub fn from_tracks(name: impl Into<String>, tracks: &[&Track], frame: i32) -> Result<Self> {
        if tracks.len() < MIN_PLANE_POINT_TRACKS {
            return Err(MotrackError::Precondition(format!(
                "Need at least {} selected point tracks to create a plane track, got {}",
                MIN_PLANE_POINT_TRACKS,
                tracks.len()
            )));
        }

        let mut bounds: Option<Rect> = None;
        for track in tracks {
            let Some(marker) = track.marker(frame) else {
                continue;
            };
            let pattern = marker.pattern_quad().bounds();
            bounds = Some(bounds.map_or(pattern, |b| b.union(pattern)));
        }
        let bounds = bounds.ok_or_else(|| {
            MotrackError::Precondition("Selected tracks have no markers".into())
        })?;

        let mut plane = Self::new(name, tracks.iter().map(|t| t.id).collect());
        plane.insert_marker(PlaneMarker::new(frame, Quad::from_rect(bounds)));
        Ok(plane)
    }

    pub fn markers(&self) -> &[PlaneMarker] {
        &self.markers
    }

    pub fn set_markers(&mut self, markers: Vec<PlaneMarker>) {
        self.markers.clear();
        self.cursor.set(0);
        for marker in markers {
            insert_sorted(&mut self.markers, marker);
        }
    }

    pub fn insert_marker(&mut self, marker: PlaneMarker) -> &mut PlaneMarker {
        let idx = insert_sorted(&mut self.markers, marker);
        self.cursor.set(idx);
        &mut self.markers[idx]
    }

    /// Same clamped lookup as point tracks.
    pub fn marker(&self, frame: i32) -> Option<&PlaneMarker> {
        let idx = lookup_index(&self.markers, frame, self.cursor.get())?;
        self.cursor.set(idx);
        Some(&self.markers[idx])
    }

    pub fn exact_marker(&self, frame: i32) -> Option<&PlaneMarker> {
        let idx = exact_index(&self.markers, frame, self.cursor.get())?;
        self.cursor.set(idx);
        Some(&self.markers[idx])
    }

    pub fn delete_marker(&mut self, frame: i32) -> bool {
        match exact_index(&self.markers, frame, self.cursor.get()) {
            Some(idx) => {
                self.markers.remove(idx);
                self.cursor.set(idx.saturating_sub(1));
                true
            }
            None => false,
        }
    }

    /// Corners at a fractional frame, blended only between consecutive frames.
    pub fn subframe_corners(&self, frame: f32) -> Option<Quad> {
        let base = frame.floor();
        let idx = lookup_index(&self.markers, base as i32, self.cursor.get())?;
        let marker = &self.markers[idx];
        match self.markers.get(idx + 1) {
            Some(next) if next.frame == marker.frame + 1 => {
                Some(marker.corners.lerp(&next.corners, frame - base))
            }
            _ => Some(marker.corners),
        }
    }

    pub fn has_point_track(&self, id: TrackId) -> bool {
        self.point_tracks.contains(&id)
    }

    /// Detach a point track. Refused (returns `false`) when that would leave
    /// fewer than four tracks; callers delete the plane instead.
    pub fn remove_point_track(&mut self, id: TrackId) -> bool {
        if self.point_tracks.len() <= MIN_PLANE_POINT_TRACKS {
            return false;
        }
        let before = self.point_tracks.len();
        self.point_tracks.retain(|t| *t != id);
        self.point_tracks.len() != before
    }

    pub fn replace_point_track(&mut self, old: TrackId, new: TrackId) {
        for t in self.point_tracks.iter_mut().filter(|t| **t == old) {
            *t = new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{Marker, MarkerState};
    use motrack_core::Vec2;

    fn track_at(x: f32, y: f32) -> Track {
        let mut t = Track::new("Track");
        t.insert_marker(Marker::new(1, Vec2::new(x, y), Vec2::splat(0.02), Vec2::splat(0.05)));
        t
    }

    #[test]
    fn test_from_tracks_needs_four() {
        let tracks: Vec<Track> = (0..3).map(|i| track_at(0.2 + i as f32 * 0.1, 0.5)).collect();
        let refs: Vec<&Track> = tracks.iter().collect();
        assert!(matches!(
            PlaneTrack::from_tracks("Plane", &refs, 1),
            Err(MotrackError::Precondition(_))
        ));
    }

    #[test]
    fn test_from_tracks_uses_pattern_bounds() {
        let tracks = [
            track_at(0.2, 0.2),
            track_at(0.8, 0.2),
            track_at(0.8, 0.7),
            track_at(0.2, 0.7),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let plane = PlaneTrack::from_tracks("Plane", &refs, 1).unwrap();
        let m = plane.exact_marker(1).unwrap();
        assert_eq!(m.state, MarkerState::Keyframed);
        assert!((m.corners.corners[0] - Vec2::new(0.18, 0.18)).length() < 1e-6);
        assert!((m.corners.corners[2] - Vec2::new(0.82, 0.72)).length() < 1e-6);
        assert_eq!(plane.point_tracks.len(), 4);
    }

    #[test]
    fn test_remove_point_track_keeps_minimum() {
        let ids: Vec<TrackId> = (0..5).map(|_| TrackId::new()).collect();
        let mut plane = PlaneTrack::new("Plane", ids.clone());
        assert!(plane.remove_point_track(ids[0]));
        assert!(!plane.remove_point_track(ids[1]));
        assert_eq!(plane.point_tracks.len(), 4);
    }

    #[test]
    fn test_subframe_corners() {
        let mut plane = PlaneTrack::new("Plane", Vec::new());
        let q = Quad::from_rect(Rect::new(0.0, 0.0, 1.0, 1.0));
        plane.insert_marker(PlaneMarker::new(1, q));
        plane.insert_marker(PlaneMarker::new(2, q.translated(Vec2::new(1.0, 0.0))));
        let mid = plane.subframe_corners(1.5).unwrap();
        assert!((mid.corners[0].x - 0.5).abs() < 1e-6);
        assert_eq!(plane.marker(40).unwrap().frame, 2);
    }
}
