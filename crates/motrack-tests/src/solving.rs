//! Camera solving through the background job, and what the solve leaves in
//! the document.

use std::sync::Arc;

use glam::DMat4;
use motrack_core::MotrackError;
use motrack_tracking::{
    spawn_camera_solve, JobEvent, LinearBundleAdjuster, MarkerState, TrackingFile,
    UnavailableBundleAdjuster,
};

use crate::scene::{solvable_doc, SOLVE_H, SOLVE_W};

#[test]
fn solve_job_reconstructs_camera_path() {
    let shared = solvable_doc(30, 1..=12).into_shared();
    let job = spawn_camera_solve(
        shared.clone(),
        Arc::new(LinearBundleAdjuster),
        0,
        SOLVE_W,
        SOLVE_H,
    )
    .unwrap();
    let events = job.events().clone();
    let report = job.join().unwrap();

    assert_eq!(report.cameras, 12);
    assert_eq!(report.bundles, 30);
    assert!(report.error < 0.1, "error {}", report.error);
    assert!(events
        .try_iter()
        .any(|e| matches!(e, JobEvent::Progress { .. })));

    let doc = shared.read();
    let obj = doc.camera_object().unwrap();
    assert!(obj.reconstruction.reconstructed);
    let first = obj.reconstruction.camera(1).unwrap();
    assert!(first.matrix.abs_diff_eq(DMat4::IDENTITY, 1e-6));
    assert!(obj.tracks.iter().all(|t| t.bundle.is_some()));
}

#[test]
fn disabled_frame_leaves_a_gap_in_the_reconstruction() {
    let mut doc = solvable_doc(30, 1..=12);
    for track in &mut doc.objects[0].tracks {
        let marker = *track.exact_marker(7).unwrap();
        track.insert_marker(marker.at_frame(7, MarkerState::Disabled));
    }
    let shared = doc.into_shared();

    let report = spawn_camera_solve(shared.clone(), Arc::new(LinearBundleAdjuster), 0, SOLVE_W, SOLVE_H)
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(report.missing_frames, vec![7]);
    let doc = shared.read();
    let reconstruction = &doc.camera_object().unwrap().reconstruction;
    assert!(reconstruction.camera(7).is_none());
    assert!(reconstruction.camera(8).is_some());
}

#[test]
fn solved_document_survives_persistence() {
    let shared = solvable_doc(20, 1..=10).into_shared();
    spawn_camera_solve(shared.clone(), Arc::new(LinearBundleAdjuster), 0, SOLVE_W, SOLVE_H)
        .unwrap()
        .join()
        .unwrap();

    let solved = shared.read().clone();
    let data = TrackingFile::new(solved.clone()).to_json().unwrap();
    let loaded = TrackingFile::from_json(&data).unwrap().into_tracking();
    assert_eq!(loaded, solved);
    assert_eq!(
        loaded.camera_object().unwrap().reconstruction.cameras().len(),
        10
    );
}

#[test]
fn missing_backend_reports_and_keeps_document() {
    let doc = solvable_doc(12, 1..=10);
    let before = doc.clone();
    let shared = doc.into_shared();

    let result = spawn_camera_solve(
        shared.clone(),
        Arc::new(UnavailableBundleAdjuster),
        0,
        SOLVE_W,
        SOLVE_H,
    )
    .unwrap()
    .join();
    assert!(matches!(result, Err(MotrackError::BackendUnavailable(_))));
    assert_eq!(*shared.read(), before);
}

#[test]
fn too_few_tracks_fail_before_the_job_starts() {
    let shared = solvable_doc(7, 1..=10).into_shared();
    let result = spawn_camera_solve(shared, Arc::new(LinearBundleAdjuster), 0, SOLVE_W, SOLVE_H);
    assert!(matches!(result, Err(MotrackError::Precondition(_))));
}
