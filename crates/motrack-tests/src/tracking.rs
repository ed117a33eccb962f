//! Region tracking jobs on synthetic footage, and what they hand on to plane
//! tracks and the live document.

use std::sync::Arc;

use motrack_core::Vec2;
use motrack_tracking::{
    spawn_region_tracking, DltHomographySolver, LucasKanadeAligner, MarkerState,
    RegionTrackContext, RegionTrackingRequest, SharedTracking, TrackDirection, TrackId,
    TrackingSummary,
};

use crate::scene::{half_noise_footage, panning_footage, to_px, tracking_doc, H, W};

fn track(
    shared: &SharedTracking,
    frames: i32,
    step: (i32, i32),
    start_frame: i32,
    direction: TrackDirection,
) -> TrackingSummary {
    spawn_region_tracking(
        shared.clone(),
        panning_footage(frames, step),
        Arc::new(LucasKanadeAligner),
        Arc::new(DltHomographySolver),
        RegionTrackingRequest {
            object: 0,
            start_frame,
            direction,
            sequence: true,
        },
    )
    .unwrap()
    .join()
    .unwrap()
}

fn assert_close(actual: Vec2, expected: Vec2, tolerance: f32) {
    assert!(
        (actual - expected).length() < tolerance,
        "expected {expected:?}, got {actual:?}"
    );
}

#[test]
fn panning_texture_is_followed() {
    let mut doc = tracking_doc();
    let id = doc.add_track(0, Vec2::new(0.5, 0.5), 1, W, H).unwrap();
    let shared = doc.into_shared();

    let summary = track(&shared, 5, (2, 1), 1, TrackDirection::Forward);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.tracked, vec![id]);

    let doc = shared.read();
    let track = doc.objects[0].track(id).unwrap();
    let origin = track.exact_marker(1).unwrap().pos;
    for frame in 2..=5 {
        let marker = track.exact_marker(frame).unwrap();
        assert_eq!(marker.state, MarkerState::Tracked);
        let moved = to_px(marker.pos - origin);
        let n = (frame - 1) as f32;
        assert_close(moved, Vec2::new(2.0 * n, n), 0.25);
    }
}

#[test]
fn lost_track_does_not_stop_the_others() {
    let mut doc = tracking_doc();
    let steady = doc.add_track(0, Vec2::new(0.3, 0.5), 1, W, H).unwrap();
    let noisy = doc.add_track(0, Vec2::new(0.75, 0.5), 1, W, H).unwrap();
    let shared = doc.into_shared();

    let summary = spawn_region_tracking(
        shared.clone(),
        half_noise_footage(5, (1, 0)),
        Arc::new(LucasKanadeAligner),
        Arc::new(DltHomographySolver),
        RegionTrackingRequest {
            object: 0,
            start_frame: 1,
            direction: TrackDirection::Forward,
            sequence: true,
        },
    )
    .unwrap()
    .join()
    .unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.tracked, vec![steady]);

    let doc = shared.read();
    let lost = doc.objects[0].track(noisy).unwrap();
    assert!(lost.exact_marker(2).unwrap().is_disabled());
    assert_eq!(lost.frame_range(), Some((1, 2)));

    let track = doc.objects[0].track(steady).unwrap();
    let origin = track.exact_marker(1).unwrap().pos;
    for frame in 2..=5 {
        let marker = track.exact_marker(frame).unwrap();
        assert_eq!(marker.state, MarkerState::Tracked);
        let n = (frame - 1) as f32;
        assert_close(to_px(marker.pos - origin), Vec2::new(n, 0.0), 0.25);
    }
}

#[test]
fn backward_tracking_reaches_first_frame() {
    let mut doc = tracking_doc();
    let start = Vec2::new(0.55, 0.5);
    let id = doc.add_track(0, start, 4, W, H).unwrap();
    let shared = doc.into_shared();

    let summary = track(&shared, 4, (-2, 0), 4, TrackDirection::Backward);
    assert_eq!(summary.frames, 3);

    let doc = shared.read();
    let track = doc.objects[0].track(id).unwrap();
    assert_eq!(track.frame_range(), Some((1, 4)));
    let moved = to_px(track.exact_marker(1).unwrap().pos - start);
    assert_close(moved, Vec2::new(6.0, 0.0), 0.25);
}

#[test]
fn plane_track_follows_its_points() {
    let mut doc = tracking_doc();
    for (x, y) in [(0.3, 0.3), (0.7, 0.3), (0.7, 0.7), (0.3, 0.7)] {
        doc.add_track(0, Vec2::new(x, y), 1, W, H).unwrap();
    }
    let plane = doc.add_plane_track(0, 1).unwrap();
    let shared = doc.into_shared();

    let summary = track(&shared, 4, (3, -1), 1, TrackDirection::Forward);
    assert_eq!(summary.tracked.len(), 4);
    assert_eq!(summary.plane_markers, 3);

    let doc = shared.read();
    let plane = doc.objects[0].plane_track(plane).unwrap();
    let first = plane.exact_marker(1).unwrap().corners;
    let last = plane.exact_marker(4).unwrap();
    assert_eq!(last.state, MarkerState::Tracked);
    for (a, b) in first.corners.iter().zip(last.corners.corners.iter()) {
        assert_close(to_px(*b - *a), Vec2::new(9.0, -3.0), 0.5);
    }
}

#[test]
fn autokeyed_planes_are_left_alone() {
    let mut doc = tracking_doc();
    for (x, y) in [(0.3, 0.3), (0.7, 0.3), (0.7, 0.7), (0.3, 0.7)] {
        doc.add_track(0, Vec2::new(x, y), 1, W, H).unwrap();
    }
    let plane = doc.add_plane_track(0, 1).unwrap();
    doc.objects[0].plane_track_mut(plane).unwrap().auto_keyframe = true;
    let shared = doc.into_shared();

    let summary = track(&shared, 3, (1, 1), 1, TrackDirection::Forward);
    assert_eq!(summary.plane_markers, 0);
    assert_eq!(
        shared.read().objects[0].plane_track(plane).unwrap().markers().len(),
        1
    );
}

#[test]
fn locked_and_hidden_tracks_are_skipped() {
    let mut doc = tracking_doc();
    let locked = doc.add_track(0, Vec2::new(0.4, 0.5), 1, W, H).unwrap();
    let hidden = doc.add_track(0, Vec2::new(0.6, 0.5), 1, W, H).unwrap();
    doc.objects[0].track_mut(locked).unwrap().flags.locked = true;
    doc.objects[0].track_mut(hidden).unwrap().flags.hidden = true;
    let shared = doc.into_shared();

    let summary = track(&shared, 3, (1, 0), 1, TrackDirection::Forward);
    assert!(summary.tracked.is_empty());
    let doc = shared.read();
    for id in [locked, hidden] {
        assert_eq!(doc.objects[0].track(id).unwrap().marker_count(), 1);
    }
}

#[test]
fn live_edits_survive_the_merge() {
    let mut doc = tracking_doc();
    let kept = doc.add_track(0, Vec2::new(0.4, 0.5), 1, W, H).unwrap();
    let deleted = doc.add_track(0, Vec2::new(0.6, 0.5), 1, W, H).unwrap();
    let shared = doc.into_shared();

    let mut ctx = {
        let doc = shared.read();
        RegionTrackContext::new(
            &doc,
            0,
            1,
            TrackDirection::Forward,
            panning_footage(4, (1, 0)),
            Arc::new(LucasKanadeAligner),
        )
        .unwrap()
    };
    assert_eq!(ctx.run().unwrap(), 3);

    {
        let mut doc = shared.write();
        doc.objects[0].track_mut(kept).unwrap().name = "Corner".into();
        doc.delete_track(0, deleted).unwrap();
    }
    ctx.sync_shared(&shared);

    let doc = shared.read();
    let obj = &doc.objects[0];
    assert_eq!(obj.tracks.len(), 2);
    let renamed = obj.track(kept).unwrap();
    assert_eq!(renamed.name, "Corner");
    assert_eq!(renamed.marker_count(), 4);

    let adopted: Vec<TrackId> = obj.tracks.iter().map(|t| t.id).filter(|id| *id != kept).collect();
    assert_eq!(adopted.len(), 1);
    assert_ne!(adopted[0], deleted);
    assert_eq!(obj.track(adopted[0]).unwrap().marker_count(), 4);
}
