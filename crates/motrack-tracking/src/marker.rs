//! Per-frame marker records for point and plane tracks.

use std::sync::atomic::{AtomicUsize, Ordering};

use motrack_core::{Quad, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// How a marker came to exist.
///
/// `Disabled` markers bracket tracked segments: they record that the track has
/// no usable data from this frame on (or up to it), instead of leaving that
/// implicit in a missing marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MarkerState {
    /// Placed or adjusted by the user.
    #[default]
    Keyframed,
    /// Produced by a tracker.
    Tracked,
    Disabled,
}

impl MarkerState {
    #[inline]
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }

    #[inline]
    pub fn is_tracked(self) -> bool {
        self == Self::Tracked
    }
}

/// Clamping applied after the user edits a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampEvent {
    /// Pattern was moved: keep it inside the search area.
    PatternPosition,
    /// Search area was resized: grow it to cover the pattern.
    SearchSize,
    /// Search area was moved: slide it back over the pattern.
    SearchPosition,
}

/// One frame of a point track.
///
/// Position is in frame-unified space (0..1 across the frame). Pattern corners
/// and search bounds are relative to `pos`, in the same space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub frame: i32,
    pub pos: Vec2,
    pub pattern_corners: [Vec2; 4],
    pub search_min: Vec2,
    pub search_max: Vec2,
    pub state: MarkerState,
}

impl Marker {
    /// Keyframed marker with a square pattern of half-size `pattern_half` and
    /// a square search area of half-size `search_half`, both unified.
    pub fn new(frame: i32, pos: Vec2, pattern_half: Vec2, search_half: Vec2) -> Self {
        Self {
            frame,
            pos,
            pattern_corners: [
                Vec2::new(-pattern_half.x, -pattern_half.y),
                Vec2::new(pattern_half.x, -pattern_half.y),
                Vec2::new(pattern_half.x, pattern_half.y),
                Vec2::new(-pattern_half.x, pattern_half.y),
            ],
            search_min: -search_half,
            search_max: search_half,
            state: MarkerState::Keyframed,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.state == MarkerState::Disabled
    }

    #[inline]
    pub fn is_keyframed(&self) -> bool {
        self.state == MarkerState::Keyframed
    }

    /// Same marker moved to another frame with another state.
    pub fn at_frame(&self, frame: i32, state: MarkerState) -> Self {
        Self {
            frame,
            state,
            ..*self
        }
    }

    /// Bounding box of the pattern corners, relative to `pos`.
    pub fn pattern_minmax(&self) -> (Vec2, Vec2) {
        let bounds = self.pattern_bounds();
        (bounds.min(), bounds.max())
    }

    pub fn pattern_bounds(&self) -> Rect {
        Rect::bounding(&self.pattern_corners).unwrap_or_default()
    }

    /// Pattern corners in frame-unified space.
    pub fn pattern_quad(&self) -> Quad {
        Quad::new(self.pattern_corners.map(|c| c + self.pos))
    }

    /// Search area in frame-unified space.
    pub fn search_rect(&self) -> Rect {
        Rect::from_corners(self.pos + self.search_min, self.pos + self.search_max)
    }

    pub fn clamp(&mut self, event: ClampEvent) {
        let (pat_min, pat_max) = self.pattern_minmax();
        match event {
            ClampEvent::PatternPosition => {
                for axis in 0..2 {
                    if pat_min[axis] < self.search_min[axis] {
                        let d = self.search_min[axis] - pat_min[axis];
                        self.pattern_corners.iter_mut().for_each(|c| c[axis] += d);
                    }
                    if pat_max[axis] > self.search_max[axis] {
                        let d = pat_max[axis] - self.search_max[axis];
                        self.pattern_corners.iter_mut().for_each(|c| c[axis] -= d);
                    }
                }
            }
            ClampEvent::SearchSize => {
                self.search_min = self.search_min.min(pat_min);
                self.search_max = self.search_max.max(pat_max);
            }
            ClampEvent::SearchPosition => {
                let dim = self.search_max - self.search_min;
                for axis in 0..2 {
                    if self.search_min[axis] > pat_min[axis] {
                        self.search_min[axis] = pat_min[axis];
                        self.search_max[axis] = pat_min[axis] + dim[axis];
                    }
                    if self.search_max[axis] < pat_max[axis] {
                        self.search_max[axis] = pat_max[axis];
                        self.search_min[axis] = pat_max[axis] - dim[axis];
                    }
                }
            }
        }
    }

    /// Geometric blend of two markers; frame and state are taken from `self`.
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut out = *self;
        out.pos = self.pos.lerp(other.pos, t);
        for (c, o) in out.pattern_corners.iter_mut().zip(other.pattern_corners.iter()) {
            *c = c.lerp(*o, t);
        }
        out.search_min = self.search_min.lerp(other.search_min, t);
        out.search_max = self.search_max.lerp(other.search_max, t);
        out
    }
}

/// One frame of a plane track. Corners are absolute, frame-unified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneMarker {
    pub frame: i32,
    pub corners: Quad,
    pub state: MarkerState,
}

impl PlaneMarker {
    pub fn new(frame: i32, corners: Quad) -> Self {
        Self {
            frame,
            corners,
            state: MarkerState::Keyframed,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }
}

// ── Sorted storage ──────────────────────────────────────────────

/// Anything stored in a frame-sorted marker array.
pub trait FrameKeyed {
    fn frame(&self) -> i32;
}

impl FrameKeyed for Marker {
    #[inline]
    fn frame(&self) -> i32 {
        self.frame
    }
}

impl FrameKeyed for PlaneMarker {
    #[inline]
    fn frame(&self) -> i32 {
        self.frame
    }
}

/// Last looked-up marker index.
///
/// Lookups happen through shared references from worker threads, hence the
/// relaxed atomic. It carries no meaning beyond speeding up the next lookup.
#[derive(Debug, Default)]
pub(crate) struct MarkerCursor(AtomicUsize);

impl MarkerCursor {
    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set(&self, idx: usize) {
        self.0.store(idx, Ordering::Relaxed);
    }
}

impl Clone for MarkerCursor {
    fn clone(&self) -> Self {
        Self(AtomicUsize::new(self.get()))
    }
}

impl PartialEq for MarkerCursor {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Insert keeping the slice sorted; an element at the same frame is replaced.
/// Returns the index of the stored element.
pub(crate) fn insert_sorted<M: FrameKeyed>(markers: &mut Vec<M>, marker: M) -> usize {
    let frame = marker.frame();
    match markers.binary_search_by_key(&frame, FrameKeyed::frame) {
        Ok(idx) => {
            markers[idx] = marker;
            idx
        }
        Err(idx) => {
            markers.insert(idx, marker);
            idx
        }
    }
}

/// Index of the marker at `frame`, or of the closest one before it; frames
/// before the first marker clamp to index 0.
///
/// `hint` is the last index looked up on this array. Sequential playback
/// walks a step or two from it instead of searching from scratch.
pub(crate) fn lookup_index<M: FrameKeyed>(markers: &[M], frame: i32, hint: usize) -> Option<usize> {
    let last = markers.len().checked_sub(1)?;
    if frame <= markers[0].frame() {
        return Some(0);
    }
    if frame >= markers[last].frame() {
        return Some(last);
    }

    let mut a = hint.min(last);
    if markers[a].frame() <= frame {
        while a < last && markers[a + 1].frame() <= frame {
            a += 1;
        }
    } else {
        while a > 0 && markers[a].frame() > frame {
            a -= 1;
        }
    }
    Some(a)
}

pub(crate) fn exact_index<M: FrameKeyed>(markers: &[M], frame: i32, hint: usize) -> Option<usize> {
    let idx = lookup_index(markers, frame, hint)?;
    (markers[idx].frame() == frame).then_some(idx)
}
