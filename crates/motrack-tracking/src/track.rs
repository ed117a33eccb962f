//! Point tracks: a named feature and its frame-sorted marker history.

use std::fmt;

use glam::DVec3;
use motrack_core::{KeyframeTrack, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::marker::{exact_index, insert_sorted, lookup_index, Marker, MarkerCursor, MarkerState};
use crate::mask::MaskStrokes;
use crate::settings::TrackingSettings;

/// Stable identity of a track, independent of its position in any list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deformation the region tracker may apply to the pattern between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotionModel {
    #[default]
    Translation,
    TranslationRotation,
    TranslationScale,
    /// Translation, rotation and uniform scale.
    Similarity,
    Affine,
    /// Full homography, the four corners move independently.
    Perspective,
}

impl MotionModel {
    pub const ALL: [Self; 6] = [
        Self::Translation,
        Self::TranslationRotation,
        Self::TranslationScale,
        Self::Similarity,
        Self::Affine,
        Self::Perspective,
    ];

    /// Number of free parameters of the warp.
    pub fn parameter_count(self) -> usize {
        match self {
            Self::Translation => 2,
            Self::TranslationRotation | Self::TranslationScale => 3,
            Self::Similarity => 4,
            Self::Affine => 6,
            Self::Perspective => 8,
        }
    }
}

/// What the tracker compares the next frame against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PatternMatch {
    /// The last keyframed marker of the segment.
    #[default]
    Keyframe,
    /// The marker of the frame just tracked.
    PreviousFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerFlags {
    /// Exhaustive translation search before gradient refinement.
    pub use_brute: bool,
    /// Compare mean/variance normalized intensities.
    pub use_normalization: bool,
    /// Weight pixels by the track's stroke mask.
    pub use_mask: bool,
}

impl Default for TrackerFlags {
    fn default() -> Self {
        Self {
            use_brute: true,
            use_normalization: false,
            use_mask: false,
        }
    }
}

/// Channels removed before building the tracking image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackChannels {
    pub disable_red: bool,
    pub disable_green: bool,
    pub disable_blue: bool,
    pub grayscale_preview: bool,
}

impl TrackChannels {
    pub fn any_disabled(&self) -> bool {
        self.disable_red || self.disable_green || self.disable_blue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackFlags {
    pub selected: bool,
    pub hidden: bool,
    pub locked: bool,
    /// Contributes to 2D stabilization location.
    pub use_2d_stab: bool,
    /// Contributes to 2D stabilization rotation and scale.
    pub use_2d_stab_rot: bool,
}

/// Reconstructed 3D position of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub position: DVec3,
}

/// How [`Track::clear_path`] treats markers relative to the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearAction {
    /// Drop everything after the reference frame.
    Remained,
    /// Drop everything before the reference frame.
    UpTo,
    /// Keep only the marker at the reference frame.
    All,
}

/// Contiguous run of enabled markers, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: i32,
    pub end: i32,
}

impl Segment {
    pub fn len(&self) -> i32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// A user-placed feature followed across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    markers: Vec<Marker>,
    #[serde(skip)]
    cursor: MarkerCursor,
    /// Constant offset added to every marker position, unified.
    pub offset: Vec2,
    pub motion_model: MotionModel,
    pub pattern_match: PatternMatch,
    pub algorithm: TrackerFlags,
    pub minimum_correlation: f32,
    /// Distance to the frame border (pixels) below which tracking stops.
    pub margin: i32,
    /// Frames tracked per run before stopping, 0 for unlimited.
    pub frames_limit: i32,
    pub channels: TrackChannels,
    pub mask: Option<MaskStrokes>,
    /// Influence on the camera solve.
    pub weight: KeyframeTrack,
    /// Influence on 2D stabilization.
    pub weight_stab: KeyframeTrack,
    pub bundle: Option<Bundle>,
    /// Average reprojection error in pixels, set by the solver.
    pub error: f32,
    pub flags: TrackFlags,
}

impl Track {
    /// Empty track with built-in defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, &TrackingSettings::default())
    }

    /// Empty track taking its tracker options from `settings`.
    pub fn with_settings(name: impl Into<String>, settings: &TrackingSettings) -> Self {
        Self {
            id: TrackId::new(),
            name: name.into(),
            markers: Vec::new(),
            cursor: MarkerCursor::default(),
            offset: Vec2::ZERO,
            motion_model: settings.default_motion_model,
            pattern_match: settings.default_pattern_match,
            algorithm: settings.default_algorithm,
            minimum_correlation: settings.default_minimum_correlation,
            margin: settings.default_margin,
            frames_limit: settings.default_frames_limit,
            channels: TrackChannels::default(),
            mask: None,
            weight: KeyframeTrack::constant("weight", settings.default_weight as f64),
            weight_stab: KeyframeTrack::constant("weight_stab", 1.0),
            bundle: None,
            error: 0.0,
            flags: TrackFlags {
                selected: true,
                ..TrackFlags::default()
            },
        }
    }

    /// Copy with a fresh identity. The copy never joins stabilization on its own.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = TrackId::new();
        copy.flags.use_2d_stab = false;
        copy.flags.use_2d_stab_rot = false;
        copy
    }

    // ── Marker access ───────────────────────────────────────────

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn has_markers(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Replace the whole history. Markers are sorted and deduplicated by
    /// frame, later entries winning.
    pub fn set_markers(&mut self, markers: Vec<Marker>) {
        self.markers.clear();
        self.cursor.set(0);
        for marker in markers {
            insert_sorted(&mut self.markers, marker);
        }
    }

    /// Store a marker; a marker already at that frame is overwritten.
    pub fn insert_marker(&mut self, marker: Marker) -> &mut Marker {
        let idx = insert_sorted(&mut self.markers, marker);
        self.cursor.set(idx);
        &mut self.markers[idx]
    }

    /// Index of the marker used for `frame`, see [`Track::marker`].
    pub fn marker_index(&self, frame: i32) -> Option<usize> {
        let idx = lookup_index(&self.markers, frame, self.cursor.get())?;
        self.cursor.set(idx);
        Some(idx)
    }

    /// Marker at `frame`, else the closest one before it. Frames before the
    /// first marker give the first marker, frames after the last the last.
    pub fn marker(&self, frame: i32) -> Option<&Marker> {
        self.marker_index(frame).map(|idx| &self.markers[idx])
    }

    pub fn exact_marker(&self, frame: i32) -> Option<&Marker> {
        let idx = exact_index(&self.markers, frame, self.cursor.get())?;
        self.cursor.set(idx);
        Some(&self.markers[idx])
    }

    pub fn exact_marker_mut(&mut self, frame: i32) -> Option<&mut Marker> {
        let idx = exact_index(&self.markers, frame, self.cursor.get())?;
        self.cursor.set(idx);
        Some(&mut self.markers[idx])
    }

    /// Marker at exactly `frame`, created from the closest one if missing.
    pub fn ensure_marker(&mut self, frame: i32) -> Option<&mut Marker> {
        if exact_index(&self.markers, frame, self.cursor.get()).is_none() {
            let closest = *self.marker(frame)?;
            self.insert_marker(closest.at_frame(frame, closest.state));
        }
        self.exact_marker_mut(frame)
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

    pub fn has_marker_at(&self, frame: i32) -> bool {
        self.exact_marker(frame).is_some()
    }

    pub fn has_enabled_marker_at(&self, frame: i32) -> bool {
        self.exact_marker(frame).is_some_and(Marker::is_enabled)
    }

    /// Frames of the first and last marker.
    pub fn frame_range(&self) -> Option<(i32, i32)> {
        Some((self.markers.first()?.frame, self.markers.last()?.frame))
    }

    /// Frames of the first and last enabled marker.
    pub fn enabled_frame_range(&self) -> Option<(i32, i32)> {
        let first = self.markers.iter().find(|m| m.is_enabled())?;
        let last = self.markers.iter().rev().find(|m| m.is_enabled())?;
        Some((first.frame, last.frame))
    }

    /// Mark the frame next to `reference` as having no data.
    ///
    /// The disabled copy lands one frame before or after the reference; an
    /// existing marker there is only replaced when `overwrite` is set.
    pub fn insert_disabled(&mut self, reference: &Marker, before: bool, overwrite: bool) {
        let frame = if before {
            reference.frame - 1
        } else {
            reference.frame + 1
        };
        if overwrite || !self.has_marker_at(frame) {
            self.insert_marker(reference.at_frame(frame, MarkerState::Disabled));
        }
    }

    /// Marker at `frame` interpolated between the enabled markers around it.
    ///
    /// Returns `None` when there is no enabled marker on one of the sides.
    pub fn interpolated_marker(&self, frame: i32) -> Option<Marker> {
        let closest = self.marker_index(frame)?;
        let m = &self.markers[closest];
        if m.frame == frame && m.is_enabled() {
            return Some(*m);
        }

        let left = self.markers[..=closest].iter().rev().find(|m| m.is_enabled())?;
        let right = self.markers.get(closest + 1..)?.iter().find(|m| m.is_enabled())?;

        if left.frame == right.frame {
            return Some(*left);
        }

        let t = (frame - left.frame) as f32 / (right.frame - left.frame) as f32;
        let state = if frame == left.frame {
            left.state
        } else if frame == right.frame {
            right.state
        } else {
            MarkerState::Keyframed
        };
        let mut out = left.lerp(right, t);
        out.frame = frame;
        out.state = state;
        Some(out)
    }

    /// Position (with offset) at a fractional frame. Interpolates only inside
    /// tracked runs of consecutive frames.
    pub fn subframe_position(&self, frame: f32) -> Option<Vec2> {
        let base = frame.floor();
        let idx = self.marker_index(base as i32)?;
        let marker = &self.markers[idx];
        let pos = match self.markers.get(idx + 1) {
            Some(next) if next.frame == marker.frame + 1 => {
                let t = (frame - base) / (next.frame - marker.frame) as f32;
                marker.pos.lerp(next.pos, t)
            }
            _ => marker.pos,
        };
        Some(pos + self.offset)
    }

    /// Remove part of the marker history around `ref_frame`, bracketing what
    /// remains with disabled markers.
    pub fn clear_path(&mut self, ref_frame: i32, action: ClearAction) {
        match action {
            ClearAction::Remained => {
                if let Some(cut) = self.markers.iter().skip(1).position(|m| m.frame > ref_frame) {
                    self.markers.truncate(cut + 1);
                }
                if let Some(last) = self.markers.last().copied() {
                    self.insert_disabled(&last, false, true);
                }
            }
            ClearAction::UpTo => {
                if let Some(keep) = self.markers.iter().rposition(|m| m.frame <= ref_frame) {
                    self.markers.drain(..keep);
                }
                if let Some(first) = self.markers.first().copied() {
                    self.insert_disabled(&first, true, true);
                }
            }
            ClearAction::All => {
                let Some(reference) = self.marker(ref_frame).copied() else {
                    return;
                };
                self.markers.clear();
                self.insert_marker(reference);
                self.insert_disabled(&reference, true, true);
                self.insert_disabled(&reference, false, true);
            }
        }
        self.cursor.set(0);
    }

    /// Merge `other` into this track.
    ///
    /// Frames only one track has are taken from it. Where both are enabled
    /// over a run of frames, positions are blended linearly across the run
    /// so the joined path does not jump.
    pub fn join(&mut self, other: &Track) {
        let src = &other.markers;
        let dst = &self.markers;
        let mut out = Vec::with_capacity(src.len() + dst.len());
        let (mut a, mut b) = (0usize, 0usize);

        while a < src.len() || b < dst.len() {
            if b >= dst.len() {
                out.push(src[a]);
                a += 1;
            } else if a >= src.len() {
                out.push(dst[b]);
                b += 1;
            } else if src[a].frame < dst[b].frame {
                out.push(src[a]);
                a += 1;
            } else if src[a].frame > dst[b].frame {
                out.push(dst[b]);
                b += 1;
            } else if src[a].is_enabled() && dst[b].is_enabled() {
                let start_frame = src[a].frame;
                let inverse =
                    b == 0 || !dst[b - 1].is_enabled() || dst[b - 1].frame != start_frame - 1;

                let mut len = 0usize;
                while a + len < src.len() && b + len < dst.len() {
                    let (ma, mb) = (&src[a + len], &dst[b + len]);
                    let expected = start_frame + len as i32;
                    if !ma.is_enabled() || !mb.is_enabled() || ma.frame != expected || mb.frame != expected {
                        break;
                    }
                    len += 1;
                }

                for j in 0..len {
                    let mut fac = if len > 1 {
                        j as f32 / (len - 1) as f32
                    } else {
                        0.5
                    };
                    if inverse {
                        fac = 1.0 - fac;
                    }
                    let mut m = dst[b + j];
                    m.pos = dst[b + j].pos.lerp(src[a + j].pos, fac);
                    out.push(m);
                }
                a += len;
                b += len;
            } else {
                out.push(if src[a].is_enabled() { src[a] } else { dst[b] });
                a += 1;
                b += 1;
            }
        }

        self.markers = out;
        self.cursor.set(0);
    }

    /// Build a track whose markers average `sources` frame by frame.
    ///
    /// Each source contributes its interpolated marker where it has one; the
    /// offset is the mean of the sources' offsets.
    pub fn average(name: impl Into<String>, sources: &[&Track]) -> Option<Track> {
        let first = sources.first()?;
        let (lo, hi) = sources
            .iter()
            .filter_map(|t| t.frame_range())
            .fold((i32::MAX, i32::MIN), |(lo, hi), (f, l)| (lo.min(f), hi.max(l)));

        let mut track = Track::new(name);
        track.motion_model = first.motion_model;
        track.pattern_match = first.pattern_match;
        track.algorithm = first.algorithm;
        track.minimum_correlation = first.minimum_correlation;

        for frame in lo..=hi {
            let mut acc: Option<Marker> = None;
            let mut tracked = true;
            let mut count = 0usize;
            for source in sources {
                let Some(m) = source.interpolated_marker(frame) else {
                    continue;
                };
                if !m.is_enabled() {
                    continue;
                }
                tracked &= m.state.is_tracked();
                count += 1;
                acc = Some(match acc {
                    None => m,
                    Some(mut sum) => {
                        sum.pos += m.pos;
                        for (c, o) in sum.pattern_corners.iter_mut().zip(m.pattern_corners.iter()) {
                            *c += *o;
                        }
                        sum.search_min += m.search_min;
                        sum.search_max += m.search_max;
                        sum
                    }
                });
            }
            if let Some(mut sum) = acc {
                let k = 1.0 / count as f32;
                sum.pos *= k;
                sum.pattern_corners.iter_mut().for_each(|c| *c *= k);
                sum.search_min *= k;
                sum.search_max *= k;
                sum.frame = frame;
                sum.state = if tracked {
                    MarkerState::Tracked
                } else {
                    MarkerState::Keyframed
                };
                track.insert_marker(sum);
            }
        }

        track.offset = sources.iter().map(|t| t.offset).sum::<Vec2>() / sources.len() as f32;
        Some(track)
    }

    /// Runs of consecutive enabled markers.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut i = 0;
        while i < self.markers.len() {
            if !self.markers[i].is_enabled() {
                i += 1;
                continue;
            }
            let start = self.markers[i].frame;
            let mut end = start;
            i += 1;
            while i < self.markers.len()
                && self.markers[i].is_enabled()
                && self.markers[i].frame == end + 1
            {
                end += 1;
                i += 1;
            }
            segments.push(Segment { start, end });
        }
        segments
    }

    // ── Flags ───────────────────────────────────────────────────

    /// Selected and neither hidden nor locked.
    pub fn is_editable_selection(&self) -> bool {
        self.flags.selected && !self.flags.hidden && !self.flags.locked
    }

    pub fn uses_stabilization(&self) -> bool {
        self.flags.use_2d_stab || self.flags.use_2d_stab_rot
    }

    pub fn weight_at(&self, frame: i32) -> f32 {
        self.weight.value_at(frame)
    }

    pub fn stab_weight_at(&self, frame: i32) -> f32 {
        self.weight_stab.value_at(frame)
    }
}
