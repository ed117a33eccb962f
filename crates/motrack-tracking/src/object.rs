//! Tracking objects (the camera or a moving object) and their reconstructions.

use glam::{DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::marker::{exact_index, lookup_index, FrameKeyed};
use crate::plane_track::{PlaneTrack, PlaneTrackId};
use crate::track::{Track, TrackId};

/// Name given to the object every document starts with.
pub const CAMERA_OBJECT_NAME: &str = "Camera";

/// Solved pose of the camera at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedCamera {
    pub frame: i32,
    /// Camera-to-world transform.
    pub matrix: DMat4,
    /// Average reprojection error of this frame, pixels.
    pub error: f32,
}

impl FrameKeyed for ReconstructedCamera {
    #[inline]
    fn frame(&self) -> i32 {
        self.frame
    }
}

/// Result of the last successful camera solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    cameras: Vec<ReconstructedCamera>,
    pub error: f32,
    pub reconstructed: bool,
}

impl Reconstruction {
    /// Build from cameras in any order.
    pub fn new(mut cameras: Vec<ReconstructedCamera>, error: f32) -> Self {
        cameras.sort_by_key(|c| c.frame);
        cameras.dedup_by_key(|c| c.frame);
        Self {
            reconstructed: !cameras.is_empty(),
            cameras,
            error,
        }
    }

    pub fn cameras(&self) -> &[ReconstructedCamera] {
        &self.cameras
    }

    pub fn camera(&self, frame: i32) -> Option<&ReconstructedCamera> {
        exact_index(&self.cameras, frame, 0).map(|idx| &self.cameras[idx])
    }

    /// Camera matrix at a fractional frame.
    ///
    /// Frames between two solved cameras blend them, frames outside the solved
    /// range hold the closest camera. Unsolved documents give the identity.
    /// For moving objects the result is scaled by `1 / object_scale`.
    pub fn interpolated_matrix(&self, frame: f32, object_scale: Option<f32>) -> DMat4 {
        let Some(idx) = lookup_index(&self.cameras, frame.floor() as i32, 0) else {
            return DMat4::IDENTITY;
        };
        let a = &self.cameras[idx];
        let mat = match self.cameras.get(idx + 1) {
            Some(b) if a.frame as f32 != frame && (a.frame as f32) < frame => {
                let t = (frame as f64 - a.frame as f64) / (b.frame - a.frame) as f64;
                blend_matrices(&a.matrix, &b.matrix, t)
            }
            _ => a.matrix,
        };
        match object_scale {
            Some(scale) if scale != 0.0 && scale != 1.0 => {
                mat * DMat4::from_scale(DVec3::splat(1.0 / scale as f64))
            }
            _ => mat,
        }
    }

    pub fn clear(&mut self) {
        self.cameras.clear();
        self.error = 0.0;
        self.reconstructed = false;
    }
}

fn blend_matrices(a: &DMat4, b: &DMat4, t: f64) -> DMat4 {
    let (sa, ra, ta) = a.to_scale_rotation_translation();
    let (sb, rb, tb) = b.to_scale_rotation_translation();
    let rot: DQuat = ra.slerp(rb, t);
    DMat4::from_scale_rotation_translation(sa.lerp(sb, t), rot, ta.lerp(tb, t))
}

/// Unique name: `base`, then `base.001`, `base.002`, ...
///
/// A numeric suffix already on `base` is dropped before numbering.
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let stem = match base.rsplit_once('.') {
        Some((stem, num)) if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => stem,
        _ => base,
    };
    (1..)
        .map(|n| format!("{}.{:03}", stem, n))
        .find(|name| !taken(name))
        .unwrap_or_else(|| stem.to_string())
}

/// The camera or one moving object with its tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingObject {
    pub name: String,
    pub is_camera: bool,
    pub tracks: Vec<Track>,
    pub plane_tracks: Vec<PlaneTrack>,
    pub reconstruction: Reconstruction,
    /// First solver keyframe.
    pub keyframe1: i32,
    /// Second solver keyframe.
    pub keyframe2: i32,
    /// Scale of the object's reconstruction relative to the scene.
    pub scale: f32,
    pub active_track: Option<TrackId>,
    pub active_plane_track: Option<PlaneTrackId>,
}

impl TrackingObject {
    pub fn new(name: impl Into<String>, is_camera: bool) -> Self {
        Self {
            name: name.into(),
            is_camera,
            tracks: Vec::new(),
            plane_tracks: Vec::new(),
            reconstruction: Reconstruction::default(),
            keyframe1: 1,
            keyframe2: 30,
            scale: 1.0,
            active_track: None,
            active_plane_track: None,
        }
    }

    // ── Point tracks ────────────────────────────────────────────

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn track_by_name(&self, name: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.name == name)
    }

    pub fn unique_track_name(&self, base: &str) -> String {
        unique_name(base, |name| self.tracks.iter().any(|t| t.name == name))
    }

    /// Add a track, renaming it if the name is taken. Returns its id.
    pub fn push_track(&mut self, mut track: Track) -> TrackId {
        track.name = self.unique_track_name(&track.name);
        let id = track.id;
        self.tracks.push(track);
        id
    }

    /// Tracks the user can act on: selected, visible and unlocked.
    pub fn selected_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_editable_selection())
    }

    pub fn selected_track_ids(&self) -> Vec<TrackId> {
        self.selected_tracks().map(|t| t.id).collect()
    }

    pub fn deselect_all(&mut self) {
        self.tracks.iter_mut().for_each(|t| t.flags.selected = false);
        self.plane_tracks.iter_mut().for_each(|p| p.selected = false);
    }

    // ── Plane tracks ────────────────────────────────────────────

    pub fn plane_track(&self, id: PlaneTrackId) -> Option<&PlaneTrack> {
        self.plane_tracks.iter().find(|p| p.id == id)
    }

    pub fn plane_track_mut(&mut self, id: PlaneTrackId) -> Option<&mut PlaneTrack> {
        self.plane_tracks.iter_mut().find(|p| p.id == id)
    }

    pub fn unique_plane_track_name(&self, base: &str) -> String {
        unique_name(base, |name| self.plane_tracks.iter().any(|p| p.name == name))
    }

    /// Point tracks of `plane`, in its order. Missing ids are skipped.
    pub fn plane_point_tracks(&self, plane: &PlaneTrack) -> Vec<&Track> {
        plane
            .point_tracks
            .iter()
            .filter_map(|id| self.track(*id))
            .collect()
    }

    /// Frames covered by any enabled marker of any track.
    pub fn enabled_frame_range(&self) -> Option<(i32, i32)> {
        self.tracks
            .iter()
            .filter_map(Track::enabled_frame_range)
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))
    }

    /// Scale argument for [`Reconstruction::interpolated_matrix`].
    pub fn reconstruction_scale(&self) -> Option<f32> {
        (!self.is_camera).then_some(self.scale)
    }
}
