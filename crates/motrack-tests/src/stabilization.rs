//! Stabilizing shaky footage from tracks produced by a tracking job.

use std::sync::Arc;

use motrack_core::Vec2;
use motrack_tracking::stabilize::update_autoscale;
use motrack_tracking::{
    spawn_region_tracking, DltHomographySolver, LucasKanadeAligner, RegionTrackingRequest,
    SharedTracking, Stabilizer, TrackDirection, TrackingFile,
};

use crate::scene::{footage, tracking_doc, H, W};

const JITTER: [(i32, i32); 6] = [(0, 0), (3, -1), (-2, 2), (1, 1), (-3, -2), (2, 0)];

/// Two stabilization tracks followed through the jittering footage.
fn tracked_shake() -> SharedTracking {
    let mut doc = tracking_doc();
    doc.stabilization.enabled = true;
    for x in [0.35, 0.65] {
        let id = doc.add_track(0, Vec2::new(x, 0.5), 1, W, H).unwrap();
        doc.objects[0].track_mut(id).unwrap().flags.use_2d_stab = true;
    }
    let shared = doc.into_shared();
    spawn_region_tracking(
        shared.clone(),
        footage(&JITTER),
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
    shared
}

#[test]
fn jitter_is_compensated() {
    let shared = tracked_shake();
    let doc = shared.read();
    let stabilizer = Stabilizer::new(&doc);
    assert_eq!(stabilizer.track_count(), 2);

    for (i, (dx, dy)) in JITTER.iter().enumerate() {
        let data = stabilizer.stabilization_data(i as i32 + 1, W, H);
        let expected = Vec2::new(-*dx as f32, -*dy as f32);
        assert!(
            (data.translation - expected).length() < 0.3,
            "frame {}: {:?} vs {:?}",
            i + 1,
            data.translation,
            expected
        );
        assert_eq!(data.angle, 0.0);
        assert_eq!(data.scale, 1.0);
    }
}

#[test]
fn stabilized_frame_lines_up_with_the_anchor() {
    let shared = tracked_shake();
    let doc = shared.read();
    let stabilizer = Stabilizer::new(&doc);

    let frame = 2;
    let matrix = stabilizer.stabilization_matrix(frame, W, H);
    // A feature at (80, 60) on the anchor frame sits at (83, 59) on frame 2
    let moved = matrix.transform_point2(Vec2::new(83.0, 59.0));
    assert!((moved - Vec2::new(80.0, 60.0)).length() < 0.3, "{moved:?}");
}

#[test]
fn autoscale_covers_the_shake() {
    let shared = tracked_shake();
    let mut doc = shared.write();
    doc.stabilization.autoscale = true;
    let scale = update_autoscale(&mut doc, W, H);

    // Largest shift is 3 px horizontally on a 160 px wide frame.
    assert!(scale > 1.0);
    assert!(scale < 1.1, "scale {scale}");
    assert_eq!(doc.stabilization.scale, scale);

    let stabilizer = Stabilizer::new(&doc);
    let data = stabilizer.stabilization_data(2, W, H);
    assert!((data.scale - scale).abs() < 1e-6);
}

#[test]
fn reloaded_document_stabilizes_the_same() {
    let shared = tracked_shake();
    let doc = shared.read().clone();
    let data = TrackingFile::new(doc.clone()).to_json().unwrap();
    let loaded = TrackingFile::from_json(&data).unwrap().into_tracking();

    let before = Stabilizer::new(&doc);
    let after = Stabilizer::new(&loaded);
    for frame in 1..=JITTER.len() as i32 {
        assert_eq!(
            before.stabilization_data(frame, W, H),
            after.stabilization_data(frame, W, H)
        );
    }
}
