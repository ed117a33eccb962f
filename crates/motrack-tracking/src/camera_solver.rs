//! Camera and object motion solving.
//!
//! Tracks are snapshotted into a [`TracksMap`], handed to a
//! [`BundleAdjuster`] as pixel observations, and the solution is written back
//! as per-frame camera matrices and per-track bundles.

use std::collections::BTreeMap;

use glam::{DMat3, DMat4, DVec3, DVec4};
use motrack_core::{MotrackError, Result};
use tracing::{info, warn};

use crate::backend::{BundleAdjuster, BundleProblem, BundleSolution, Observation, SolveProgress};
use crate::camera::CameraIntrinsics;
use crate::document::{SharedTracking, Tracking};
use crate::object::{ReconstructedCamera, Reconstruction};
use crate::settings::RefineFlags;
use crate::track::Bundle;
use crate::tracks_map::TracksMap;

/// Tracks needed on both keyframes before a solve is attempted.
pub const MIN_KEYFRAME_TRACKS: usize = 8;

const FAILED_MESSAGE: &str = "Some data failed to reconstruct (see console for details)";

/// Refuse to solve when the keyframes can't possibly initialize.
///
/// Tripod solves and automatic keyframe selection skip the check.
pub fn check(doc: &Tracking, object: usize) -> Result<()> {
    let obj = doc.object(object)?;
    let solver = &doc.settings.solver;
    if solver.tripod || solver.auto_keyframes {
        return Ok(());
    }
    let common = obj
        .tracks
        .iter()
        .filter(|t| t.has_enabled_marker_at(obj.keyframe1) && t.has_enabled_marker_at(obj.keyframe2))
        .count();
    if common < MIN_KEYFRAME_TRACKS {
        return Err(MotrackError::Precondition(
            "At least 8 common tracks on both keyframes are needed for reconstruction".into(),
        ));
    }
    Ok(())
}

/// Outcome of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Overall RMS reprojection error, pixels.
    pub error: f32,
    pub cameras: usize,
    pub bundles: usize,
    /// Frames inside the tracked range the solver found no camera for.
    pub missing_frames: Vec<i32>,
    pub keyframe1: i32,
    pub keyframe2: i32,
}

/// CV camera pose (world to camera, looking down +Z) as a camera-to-world
/// matrix looking down -Z with Y up.
fn camera_matrix(rotation: &DMat3, translation: DVec3) -> DMat4 {
    let rt = rotation.transpose();
    let center = -(rt * translation);
    let cam_to_world = DMat4::from_cols(
        rt.x_axis.extend(0.0),
        rt.y_axis.extend(0.0),
        rt.z_axis.extend(0.0),
        center.extend(1.0),
    );
    let flip = DMat4::from_diagonal(DVec4::new(1.0, -1.0, -1.0, 1.0));
    cam_to_world * flip
}

/// One solve of one object, detached from the live document.
pub struct ReconstructionContext {
    map: TracksMap,
    observations: Vec<Observation>,
    width: u32,
    height: u32,
    sfra: i32,
    efra: i32,
    keyframe1: i32,
    keyframe2: i32,
    select_keyframes: bool,
    tripod: bool,
    intrinsics: CameraIntrinsics,
    refine: RefineFlags,
    solution: Option<BundleSolution>,
    error_message: Option<String>,
}

impl ReconstructionContext {
    pub fn new(doc: &Tracking, object: usize, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MotrackError::InvalidParameter(format!(
                "frame size {width}x{height} can't be solved"
            )));
        }
        let obj = doc.object(object)?;
        let map = TracksMap::from_tracks(obj, |_| true);
        let aspect = doc.camera.pixel_aspect;

        let mut observations = Vec::new();
        let mut range: Option<(i32, i32)> = None;
        for (index, track) in map.tracks().iter().enumerate() {
            for marker in track.markers().iter().filter(|m| m.is_enabled()) {
                let pos = (marker.pos + track.offset).as_dvec2();
                observations.push(Observation {
                    frame: marker.frame,
                    track: index,
                    x: pos.x * width as f64,
                    y: pos.y * height as f64 * aspect,
                    weight: track.weight_at(marker.frame) as f64,
                });
            }
            if let Some((first, last)) = track.enabled_frame_range() {
                range = Some(range.map_or((first, last), |(a, b)| (a.min(first), b.max(last))));
            }
        }
        let (sfra, efra) = range.unwrap_or((obj.keyframe1, obj.keyframe2));

        Ok(Self {
            observations,
            width,
            height,
            sfra,
            efra,
            keyframe1: obj.keyframe1,
            keyframe2: obj.keyframe2,
            select_keyframes: doc.settings.solver.auto_keyframes,
            tripod: doc.settings.solver.tripod,
            intrinsics: doc.camera.clone(),
            refine: if obj.is_camera {
                doc.settings.solver.refine
            } else {
                RefineFlags::NONE
            },
            map,
            solution: None,
            error_message: None,
        })
    }

    pub fn frame_range(&self) -> (i32, i32) {
        (self.sfra, self.efra)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Message for the user after a failed solve.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_solved(&self) -> bool {
        self.solution.as_ref().is_some_and(|s| s.is_valid)
    }

    /// Run the adjuster. Touches nothing outside the context.
    pub fn solve(&mut self, adjuster: &dyn BundleAdjuster, progress: SolveProgress<'_>) -> Result<()> {
        info!(
            object = %self.map.object_name(),
            tracks = self.map.len(),
            observations = self.observations.len(),
            tripod = self.tripod,
            "Camera solve started"
        );
        let problem = BundleProblem {
            observations: &self.observations,
            intrinsics: self.intrinsics.clone(),
            width: self.width,
            height: self.height,
            keyframe1: self.keyframe1,
            keyframe2: self.keyframe2,
            select_keyframes: self.select_keyframes,
            tripod: self.tripod,
            refine: self.refine,
        };
        let solution = adjuster.solve(&problem, progress)?;
        if !solution.is_valid {
            warn!(
                keyframe1 = solution.keyframe1,
                keyframe2 = solution.keyframe2,
                "Reconstruction failed"
            );
            self.error_message = Some(FAILED_MESSAGE.into());
            self.solution = None;
            return Err(MotrackError::Solver(format!(
                "{FAILED_MESSAGE}: most likely no good keyframes were chosen"
            )));
        }
        self.error_message = None;
        self.solution = Some(solution);
        Ok(())
    }

    /// Write the solution into `doc`.
    pub fn finish(&mut self, doc: &mut Tracking) -> Result<SolveReport> {
        let solution = self
            .solution
            .take()
            .ok_or_else(|| MotrackError::Precondition("Nothing has been solved yet".into()))?;

        if self.map.is_camera() && self.refine.any() {
            doc.camera = solution.intrinsics.clone();
        }

        let poses: BTreeMap<i32, _> = solution.cameras.iter().map(|c| (c.frame, c)).collect();
        let mut cameras = Vec::new();
        let mut missing_frames = Vec::new();
        for frame in self.sfra..=self.efra {
            match poses.get(&frame) {
                Some(cam) => cameras.push(ReconstructedCamera {
                    frame,
                    matrix: camera_matrix(&cam.rotation, cam.translation),
                    error: cam.error as f32,
                }),
                None => {
                    warn!(frame, "No camera for frame {frame}");
                    missing_frames.push(frame);
                }
            }
        }

        let to_first = cameras.first().map_or(DMat4::IDENTITY, |c| c.matrix.inverse());
        for cam in &mut cameras {
            cam.matrix = to_first * cam.matrix;
        }

        let points: BTreeMap<usize, _> = solution.points.iter().map(|p| (p.track, p)).collect();
        for index in 0..self.map.len() {
            let Some(track) = self.map.track_mut(index) else {
                continue;
            };
            match points.get(&index) {
                Some(point) => {
                    track.bundle = Some(Bundle {
                        position: to_first.transform_point3(point.position),
                    });
                    track.error = point.error as f32;
                }
                None => {
                    track.bundle = None;
                    track.error = 0.0;
                }
            }
        }

        self.map.merge(doc);
        let object = doc
            .object_index_by_name(self.map.object_name())
            .ok_or_else(|| MotrackError::Internal("solved object vanished during merge".into()))?;
        let obj = doc.object_mut(object)?;
        if self.select_keyframes {
            obj.keyframe1 = solution.keyframe1;
            obj.keyframe2 = solution.keyframe2;
        }
        let report = SolveReport {
            error: solution.error as f32,
            cameras: cameras.len(),
            bundles: points.len(),
            missing_frames,
            keyframe1: solution.keyframe1,
            keyframe2: solution.keyframe2,
        };
        obj.reconstruction = Reconstruction::new(cameras, report.error);

        info!(
            object = %obj.name,
            error = report.error,
            cameras = report.cameras,
            bundles = report.bundles,
            "Camera solve finished"
        );
        Ok(report)
    }
}

/// Check, solve and write back in one go, holding the lock only while
/// reading and writing the document.
pub fn solve_shared(
    shared: &SharedTracking,
    object: usize,
    width: u32,
    height: u32,
    adjuster: &dyn BundleAdjuster,
    progress: SolveProgress<'_>,
) -> Result<SolveReport> {
    let mut ctx = {
        let doc = shared.read();
        check(&doc, object)?;
        ReconstructionContext::new(&doc, object, width, height)?
    };
    ctx.solve(adjuster, progress)?;
    let mut doc = shared.write();
    ctx.finish(&mut doc)
}

/// Same as [`solve_shared`] on a document owned by the caller.
pub fn solve(
    doc: &mut Tracking,
    object: usize,
    width: u32,
    height: u32,
    adjuster: &dyn BundleAdjuster,
    progress: SolveProgress<'_>,
) -> Result<SolveReport> {
    check(doc, object)?;
    let mut ctx = ReconstructionContext::new(doc, object, width, height)?;
    ctx.solve(adjuster, progress)?;
    ctx.finish(doc)
}
