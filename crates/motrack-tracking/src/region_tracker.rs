//! Frame-by-frame region tracking of point tracks.

use std::sync::Arc;

use motrack_core::{MotrackError, Result, Vec2};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::backend::{PatchAligner, RegionTrackOptions, RegionTrackRequest, TrackDirection};
use crate::coords::{
    marker_coords_for_tracking, scale_marker_search, search_origin_frame_pixel, search_size_pixels,
    set_marker_coords_from_tracking,
};
use crate::document::{SharedTracking, Tracking};
use crate::frame_source::FrameSource;
use crate::image::GrayImage;
use crate::marker::{Marker, MarkerState};
use crate::track::{PatternMatch, Track, TrackId};
use crate::tracks_map::TracksMap;

/// Per-track progress within one run.
#[derive(Debug, Clone, Default)]
struct TrackState {
    active: bool,
    /// Markers produced so far.
    tracked_frames: i32,
    /// Reference for keyframe matching, found once per segment.
    reference: Option<Marker>,
}

/// What one step decided for one track.
enum Outcome {
    Tracked { marker: Marker, reference: Option<Marker> },
    Lost(Marker),
    Stop,
}

/// Is the marker far enough from the frame border to keep tracking?
fn check_margin(track: &Track, marker: &Marker, width: u32, height: u32) -> bool {
    let (pat_min, pat_max) = marker.pattern_minmax();
    let margin = Vec2::new(
        track.margin as f32 / width as f32,
        track.margin as f32 / height as f32,
    );
    let left = pat_min.x.abs().max(margin.x);
    let right = pat_max.x.abs().max(margin.x);
    let top = pat_min.y.abs().max(margin.y);
    let bottom = pat_max.y.abs().max(margin.y);
    let pos = marker.pos;
    !(pos.x < left || pos.x > 1.0 - right || pos.y < top || pos.y > 1.0 - bottom)
}

/// The marker keyframe matching compares against: walking from `frame`
/// against the tracking direction, the first enabled marker that was placed
/// by hand or that starts its segment.
fn keyframed_marker(track: &Track, frame: i32, direction: TrackDirection) -> Option<Marker> {
    let markers = track.markers();
    let mut idx = track.marker_index(frame)? as isize;
    let step: isize = if direction.is_backward() { 1 } else { -1 };
    while idx >= 0 && (idx as usize) < markers.len() {
        let current = &markers[idx as usize];
        let next = idx + step;
        let neighbour = (next >= 0)
            .then(|| markers.get(next as usize))
            .flatten();
        if current.is_enabled() {
            let boundary = neighbour.map_or(true, |m| m.is_disabled());
            if boundary || !current.state.is_tracked() {
                return Some(*current);
            }
        }
        idx = next;
    }
    None
}

/// Tracks the selected tracks of one object through a frame source.
pub struct RegionTrackContext {
    map: TracksMap,
    states: Vec<TrackState>,
    frames: Arc<dyn FrameSource>,
    aligner: Arc<dyn PatchAligner>,
    direction: TrackDirection,
    start_frame: i32,
    current_frame: i32,
    width: u32,
    height: u32,
    iterations: u32,
    sigma: f64,
}

impl RegionTrackContext {
    /// Snapshot the trackable tracks of `object`: selected, visible,
    /// unlocked, enabled at `start_frame` and with the search area inside
    /// the frame.
    pub fn new(
        doc: &Tracking,
        object: usize,
        start_frame: i32,
        direction: TrackDirection,
        frames: Arc<dyn FrameSource>,
        aligner: Arc<dyn PatchAligner>,
    ) -> Result<Self> {
        let obj = doc.object(object)?;
        let (width, height) = frames.size();
        if width == 0 || height == 0 {
            return Err(MotrackError::FrameUnavailable(start_frame));
        }

        let map = TracksMap::from_tracks(obj, |track| {
            if !track.is_editable_selection() {
                return false;
            }
            let Some(marker) = track.marker(start_frame) else {
                return false;
            };
            let search = marker.search_rect();
            marker.is_enabled()
                && search.min().cmpge(Vec2::ZERO).all()
                && search.max().cmple(Vec2::ONE).all()
        });
        let states = vec![
            TrackState {
                active: true,
                ..TrackState::default()
            };
            map.len()
        ];
        info!(
            tracks = map.len(),
            frame = start_frame,
            backwards = direction.is_backward(),
            "Region tracking started"
        );

        Ok(Self {
            map,
            states,
            frames,
            aligner,
            direction,
            start_frame,
            current_frame: start_frame,
            width,
            height,
            iterations: doc.settings.region_iterations,
            sigma: doc.settings.region_sigma,
        })
    }

    pub fn start_frame(&self) -> i32 {
        self.start_frame
    }

    pub fn current_frame(&self) -> i32 {
        self.current_frame
    }

    pub fn direction(&self) -> TrackDirection {
        self.direction
    }

    pub fn active_tracks(&self) -> usize {
        self.states.iter().filter(|s| s.active).count()
    }

    pub fn tracks_map(&self) -> &TracksMap {
        &self.map
    }

    /// Ids of live tracks that received at least one marker this run.
    pub fn tracked_ids(&self) -> Vec<TrackId> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.tracked_frames > 0)
            .filter_map(|(i, _)| self.map.original_id(i))
            .collect()
    }

    fn track_one(&self, index: usize, next_frame: i32) -> Result<Outcome> {
        let (Some(track), Some(state)) = (self.map.track(index), self.states.get(index)) else {
            return Ok(Outcome::Stop);
        };
        if track.frames_limit > 0 && state.tracked_frames >= track.frames_limit {
            return Ok(Outcome::Stop);
        }
        let Some(marker) = track.marker(self.current_frame).copied() else {
            return Ok(Outcome::Stop);
        };
        if marker.is_disabled() {
            return Ok(Outcome::Stop);
        }
        if !check_margin(track, &marker, self.width, self.height) {
            return Ok(Outcome::Lost(marker.at_frame(next_frame, MarkerState::Disabled)));
        }

        let reference = match track.pattern_match {
            PatternMatch::PreviousFrame => marker,
            PatternMatch::Keyframe => match state.reference {
                Some(reference) => reference,
                None => keyframed_marker(track, self.current_frame, self.direction).unwrap_or(marker),
            },
        };
        let keep_reference = (track.pattern_match == PatternMatch::Keyframe).then_some(reference);

        let (w, h) = (self.width, self.height);
        let reference_frame = self.frames.frame(reference.frame)?;
        let destination_frame = self.frames.frame(next_frame)?;

        let ref_origin = search_origin_frame_pixel(w, h, &reference);
        let (ref_w, ref_h) = search_size_pixels(w, h, &reference);
        let dst_origin = search_origin_frame_pixel(w, h, &marker);
        let (dst_w, dst_h) = search_size_pixels(w, h, &marker);
        if ref_w <= 0 || ref_h <= 0 || dst_w <= 0 || dst_h <= 0 {
            return Ok(Outcome::Lost(marker.at_frame(next_frame, MarkerState::Disabled)));
        }

        let reference_image = GrayImage::from_frame_region(
            &reference_frame,
            ref_origin.x as i32,
            ref_origin.y as i32,
            ref_w as u32,
            ref_h as u32,
            &track.channels,
        );
        let destination_image = GrayImage::from_frame_region(
            &destination_frame,
            dst_origin.x as i32,
            dst_origin.y as i32,
            dst_w as u32,
            dst_h as u32,
            &track.channels,
        );
        let mask = track
            .mask
            .as_ref()
            .filter(|m| track.algorithm.use_mask && !m.is_empty())
            .map(|m| m.rasterize(w, h, ref_origin, ref_w as u32, ref_h as u32));

        let options = RegionTrackOptions {
            direction: self.direction,
            motion_model: track.motion_model,
            use_brute: track.algorithm.use_brute,
            use_normalization: track.algorithm.use_normalization,
            minimum_correlation: track.minimum_correlation as f64,
            num_iterations: self.iterations,
            sigma: self.sigma,
        };
        let reference_coords = marker_coords_for_tracking(w, h, &reference);
        let guess_coords = marker_coords_for_tracking(w, h, &marker);
        let request = RegionTrackRequest {
            reference: &reference_image,
            destination: &destination_image,
            mask: mask.as_ref(),
            reference_coords: &reference_coords,
            guess_coords: &guess_coords,
            options: &options,
        };

        match self.aligner.track_region(&request) {
            Ok(result) => {
                let mut tracked = marker.at_frame(next_frame, MarkerState::Tracked);
                set_marker_coords_from_tracking(w, h, &mut tracked, &result.coords);
                scale_marker_search(&marker, &mut tracked);
                Ok(Outcome::Tracked {
                    marker: tracked,
                    reference: keep_reference,
                })
            }
            Err(MotrackError::TrackingFailed(reason)) => {
                debug!(track = %track.name, frame = next_frame, %reason, "Track lost");
                Ok(Outcome::Lost(marker.at_frame(next_frame, MarkerState::Disabled)))
            }
            Err(err) => Err(err),
        }
    }

    /// Track every active track one frame further.
    ///
    /// Returns `false` once nothing is left to track: no active track, or the
    /// next frame is outside the source.
    pub fn step(&mut self) -> Result<bool> {
        let next_frame = self.current_frame + self.direction.step();
        if self.active_tracks() == 0 || !self.frames.contains(next_frame) {
            return Ok(false);
        }

        let outcomes: Vec<(usize, Result<Outcome>)> = {
            let this = &*self;
            (0..this.states.len())
                .into_par_iter()
                .filter(|i| this.states[*i].active)
                .map(|i| (i, this.track_one(i, next_frame)))
                .collect()
        };

        for (index, outcome) in outcomes {
            let outcome = outcome?;
            let (Some(track), Some(state)) = (self.map.track_mut(index), self.states.get_mut(index))
            else {
                continue;
            };
            match outcome {
                Outcome::Tracked { marker, reference } => {
                    track.insert_marker(marker);
                    state.tracked_frames += 1;
                    state.reference = reference;
                }
                Outcome::Lost(marker) => {
                    track.insert_marker(marker);
                    state.active = false;
                }
                Outcome::Stop => state.active = false,
            }
        }

        self.current_frame = next_frame;
        Ok(self.active_tracks() > 0)
    }

    /// Step until done. Returns the number of frames stepped.
    pub fn run(&mut self) -> Result<usize> {
        while self.step()? {}
        Ok((self.current_frame - self.start_frame).unsigned_abs() as usize)
    }

    /// Write the tracked markers back into the document.
    pub fn sync(&self, doc: &mut Tracking) {
        self.map.merge(doc);
    }

    pub fn sync_shared(&self, shared: &SharedTracking) {
        self.map.merge_shared(shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LucasKanadeAligner, RegionTrackResult, UnavailableAligner};
    use crate::frame_source::FrameSequence;
    use motrack_core::{FrameBuffer, PixelFormat};
    use parking_lot::Mutex;

    /// Keeps every pattern where it was, scoring `correlation`. Records the
    /// brightness of each reference patch.
    struct FixedAligner {
        correlation: f64,
        references: Mutex<Vec<f32>>,
    }

    impl FixedAligner {
        fn new(correlation: f64) -> Self {
            Self {
                correlation,
                references: Mutex::new(Vec::new()),
            }
        }

        /// Frame numbers the reference patches came from.
        fn reference_frames(&self) -> Vec<i32> {
            self.references
                .lock()
                .iter()
                .map(|v| (v * 10.0).round() as i32)
                .collect()
        }
    }

    impl PatchAligner for FixedAligner {
        fn track_region(&self, request: &RegionTrackRequest<'_>) -> Result<RegionTrackResult> {
            self.references.lock().push(request.reference.get(0, 0));
            if self.correlation < request.options.minimum_correlation {
                return Err(MotrackError::TrackingFailed("correlation too low".into()));
            }
            Ok(RegionTrackResult {
                coords: *request.guess_coords,
                correlation: self.correlation,
                iterations: 0,
            })
        }
    }

    /// Flat frames whose brightness is a tenth of the frame number.
    fn numbered_frames(count: i32) -> Arc<dyn FrameSource> {
        let frames = (1..=count).map(|f| {
            let v = f as f32 / 10.0;
            let mut frame = FrameBuffer::new(120, 80, PixelFormat::RgbaF32);
            for y in 0..80 {
                for x in 0..120 {
                    frame.set_pixel(x, y, [v, v, v, 1.0]);
                }
            }
            frame
        });
        Arc::new(FrameSequence::from_frames(1, frames).unwrap())
    }

    fn static_frames(count: i32) -> Arc<dyn FrameSource> {
        let frames = (0..count).map(|_| FrameBuffer::checkerboard(120, 80, 7));
        Arc::new(FrameSequence::from_frames(1, frames).unwrap())
    }

    fn doc_with_track(pos: Vec2) -> (Tracking, TrackId) {
        let mut doc = Tracking::new();
        doc.settings.default_pattern_size = 15;
        doc.settings.default_search_size = 31;
        let id = doc.add_track(0, pos, 1, 120, 80).unwrap();
        (doc, id)
    }

    #[test]
    fn test_static_footage_keeps_position() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            static_frames(4),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap();
        assert_eq!(ctx.run().unwrap(), 3);
        ctx.sync(&mut doc);

        let track = doc.objects[0].track(id).unwrap();
        assert_eq!(track.marker_count(), 4);
        for frame in 2..=4 {
            let m = track.exact_marker(frame).unwrap();
            assert_eq!(m.state, MarkerState::Tracked);
            assert!((m.pos - Vec2::new(0.5, 0.5)).length() < 1e-3);
        }
        assert_eq!(ctx.tracked_ids(), vec![id]);
    }

    #[test]
    fn test_frames_limit() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        doc.objects[0].track_mut(id).unwrap().frames_limit = 1;
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            static_frames(5),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap();
        ctx.run().unwrap();
        ctx.sync(&mut doc);
        assert_eq!(doc.objects[0].track(id).unwrap().marker_count(), 2);
    }

    #[test]
    fn test_margin_disables_next_frame() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        doc.objects[0].track_mut(id).unwrap().margin = 70;
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            static_frames(3),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap();
        assert!(!ctx.step().unwrap());
        ctx.sync(&mut doc);
        let track = doc.objects[0].track(id).unwrap();
        assert!(track.exact_marker(2).unwrap().is_disabled());
        assert!(track.exact_marker(3).is_none());
    }

    #[test]
    fn test_margin_is_checked_per_side() {
        let track = Track::new("Track");
        // pattern reaching far to the right of the marker position
        let mut marker = Marker::new(1, Vec2::new(0.05, 0.5), Vec2::splat(0.01), Vec2::splat(0.3));
        marker.pattern_corners[1].x = 0.2;
        marker.pattern_corners[2].x = 0.2;

        assert!(check_margin(&track, &marker, 100, 100));
        marker.pos.x = 0.79;
        assert!(check_margin(&track, &marker, 100, 100));
        marker.pos.x = 0.81;
        assert!(!check_margin(&track, &marker, 100, 100));
        marker.pos.x = 0.005;
        assert!(!check_margin(&track, &marker, 100, 100));

        let mut wide_margin = Track::new("Track");
        wide_margin.margin = 10;
        marker.pos.x = 0.05;
        assert!(!check_margin(&wide_margin, &marker, 100, 100));
        marker.pos.x = 0.15;
        assert!(check_margin(&wide_margin, &marker, 100, 100));
    }

    #[test]
    fn test_unselected_and_border_tracks_skipped() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        doc.add_track(0, Vec2::new(0.05, 0.5), 1, 120, 80).unwrap();
        doc.objects[0].track_mut(id).unwrap().flags.selected = false;
        let ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            static_frames(3),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap();
        assert_eq!(ctx.active_tracks(), 0);
    }

    #[test]
    fn test_backwards_stops_at_source_start() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        let marker = *doc.objects[0].track(id).unwrap().marker(1).unwrap();
        doc.objects[0].track_mut(id).unwrap().insert_marker(marker.at_frame(3, MarkerState::Keyframed));
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            3,
            TrackDirection::Backward,
            static_frames(3),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap();
        assert_eq!(ctx.run().unwrap(), 2);
        assert_eq!(ctx.current_frame(), 1);
        ctx.sync(&mut doc);
        let track = doc.objects[0].track(id).unwrap();
        assert_eq!(track.exact_marker(2).map(|m| m.state), Some(MarkerState::Tracked));
        assert_eq!(track.exact_marker(1).map(|m| m.state), Some(MarkerState::Tracked));
    }

    #[test]
    fn test_unavailable_backend_is_an_error() {
        let (doc, _) = doc_with_track(Vec2::new(0.5, 0.5));
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            static_frames(3),
            Arc::new(UnavailableAligner),
        )
        .unwrap();
        assert!(matches!(ctx.step(), Err(MotrackError::BackendUnavailable(_))));
    }

    #[test]
    fn test_keyframed_marker_lookup() {
        let mut track = Track::new("Track");
        let base = Marker::new(1, Vec2::splat(0.5), Vec2::splat(0.01), Vec2::splat(0.04));
        track.insert_marker(base);
        for f in 2..=4 {
            track.insert_marker(base.at_frame(f, MarkerState::Tracked));
        }
        track.insert_marker(base.at_frame(6, MarkerState::Tracked));
        track.insert_marker(base.at_frame(5, MarkerState::Disabled));

        let found = keyframed_marker(&track, 4, TrackDirection::Forward).unwrap();
        assert_eq!(found.frame, 1);
        // segment start after a disabled marker counts as a keyframe
        let found = keyframed_marker(&track, 6, TrackDirection::Forward).unwrap();
        assert_eq!(found.frame, 6);
        let found = keyframed_marker(&track, 2, TrackDirection::Backward).unwrap();
        assert_eq!(found.frame, 4);
    }

    #[test]
    fn test_previous_frame_matches_last_tracked_marker() {
        let (mut doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        doc.objects[0].track_mut(id).unwrap().pattern_match = PatternMatch::PreviousFrame;
        let aligner = Arc::new(FixedAligner::new(0.9));
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            numbered_frames(4),
            aligner.clone(),
        )
        .unwrap();
        assert_eq!(ctx.run().unwrap(), 3);
        assert_eq!(aligner.reference_frames(), vec![1, 2, 3]);

        ctx.sync(&mut doc);
        let track = doc.objects[0].track(id).unwrap();
        for frame in 2..=4 {
            assert_eq!(track.exact_marker(frame).unwrap().state, MarkerState::Tracked);
        }
    }

    #[test]
    fn test_keyframe_matching_keeps_first_reference() {
        let (doc, id) = doc_with_track(Vec2::new(0.5, 0.5));
        assert_eq!(
            doc.objects[0].track(id).unwrap().pattern_match,
            PatternMatch::Keyframe
        );
        let aligner = Arc::new(FixedAligner::new(0.9));
        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            numbered_frames(4),
            aligner.clone(),
        )
        .unwrap();
        ctx.run().unwrap();
        assert_eq!(aligner.reference_frames(), vec![1, 1, 1]);
    }

    #[test]
    fn test_lost_track_leaves_others_running() {
        let (mut doc, healthy) = doc_with_track(Vec2::new(0.3, 0.5));
        let lost = doc.add_track(0, Vec2::new(0.7, 0.5), 1, 120, 80).unwrap();
        let near_border = doc.add_track(0, Vec2::new(0.5, 0.3), 1, 120, 80).unwrap();
        doc.objects[0].track_mut(lost).unwrap().minimum_correlation = 0.95;
        doc.objects[0].track_mut(near_border).unwrap().margin = 30;

        let mut ctx = RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            numbered_frames(5),
            Arc::new(FixedAligner::new(0.9)),
        )
        .unwrap();
        assert_eq!(ctx.active_tracks(), 3);
        assert!(ctx.step().unwrap());
        assert_eq!(ctx.active_tracks(), 1);
        assert_eq!(ctx.run().unwrap(), 4);
        assert_eq!(ctx.tracked_ids(), vec![healthy]);

        ctx.sync(&mut doc);
        let obj = &doc.objects[0];
        let track = obj.track(healthy).unwrap();
        for frame in 2..=5 {
            assert_eq!(track.exact_marker(frame).unwrap().state, MarkerState::Tracked);
        }
        for id in [lost, near_border] {
            let track = obj.track(id).unwrap();
            assert!(track.exact_marker(2).unwrap().is_disabled());
            assert_eq!(track.frame_range(), Some((1, 2)));
        }
    }
}
