//! Background jobs: region tracking and camera solving on a worker thread.
//!
//! Jobs work on detached copies and write back into the shared document
//! once, when they finish or are cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use motrack_core::{MotrackError, Result};
use tracing::{debug, info, warn};

use crate::backend::{BundleAdjuster, HomographySolver, PatchAligner, TrackDirection};
use crate::camera_solver::{check, ReconstructionContext, SolveReport};
use crate::document::SharedTracking;
use crate::frame_source::FrameSource;
use crate::plane_tracker::track_object_plane;
use crate::region_tracker::RegionTrackContext;
use crate::track::TrackId;

/// Handle for cancelling a running job.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress reported by a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { fraction: f32, message: String },
    /// A tracking step finished at `frame`.
    Frame { frame: i32, active_tracks: usize },
    Finished,
}

/// A job running on its own thread.
pub struct JobHandle<T> {
    cancel: CancelToken,
    events: Receiver<JobEvent>,
    worker: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Ask the job to stop at the next frame boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the job and take its result.
    pub fn join(self) -> Result<T> {
        self.worker
            .join()
            .map_err(|_| MotrackError::Internal("job thread panicked".into()))?
    }
}

fn spawn<T: Send + 'static>(
    name: &str,
    work: impl FnOnce(CancelToken, Sender<JobEvent>) -> Result<T> + Send + 'static,
) -> Result<JobHandle<T>> {
    let cancel = CancelToken::new();
    let (tx, rx) = unbounded();
    let token = cancel.clone();
    let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
        let result = work(token, tx.clone());
        let _ = tx.send(JobEvent::Finished);
        result
    })?;
    Ok(JobHandle {
        cancel,
        events: rx,
        worker,
    })
}

// ── Region tracking ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTrackingRequest {
    pub object: usize,
    pub start_frame: i32,
    pub direction: TrackDirection,
    /// Track until the tracks are lost or the clip ends, instead of one frame.
    pub sequence: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSummary {
    /// Frames stepped.
    pub frames: usize,
    pub cancelled: bool,
    /// Tracks that received at least one marker.
    pub tracked: Vec<TrackId>,
    /// Plane markers written by propagation afterwards.
    pub plane_markers: usize,
}

/// Track the selected tracks of `request.object` on a worker thread.
///
/// Plane tracks without auto-keyframing whose point tracks moved are
/// propagated from the start frame afterwards.
pub fn spawn_region_tracking(
    shared: SharedTracking,
    frames: Arc<dyn FrameSource>,
    aligner: Arc<dyn PatchAligner>,
    homography: Arc<dyn HomographySolver>,
    request: RegionTrackingRequest,
) -> Result<JobHandle<TrackingSummary>> {
    let (first, last) = frames.frame_range();
    let mut ctx = {
        let doc = shared.read();
        RegionTrackContext::new(
            &doc,
            request.object,
            request.start_frame,
            request.direction,
            frames,
            aligner,
        )?
    };
    let total = if !request.sequence {
        1
    } else if request.direction.is_backward() {
        (request.start_frame - first).max(1)
    } else {
        (last - request.start_frame).max(1)
    };

    spawn("motrack-track", move |cancel, events| {
        let mut cancelled = false;
        let mut failure = None;
        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let before = ctx.current_frame();
            match ctx.step() {
                Ok(more) => {
                    let frame = ctx.current_frame();
                    if frame != before {
                        let done = (frame - ctx.start_frame()).abs();
                        let _ = events.send(JobEvent::Frame {
                            frame,
                            active_tracks: ctx.active_tracks(),
                        });
                        let _ = events.send(JobEvent::Progress {
                            fraction: (done as f32 / total as f32).min(1.0),
                            message: format!("Tracking frame {frame}"),
                        });
                    }
                    if !more || !request.sequence {
                        break;
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        ctx.sync_shared(&shared);
        let summary = TrackingSummary {
            frames: (ctx.current_frame() - ctx.start_frame()).unsigned_abs() as usize,
            cancelled,
            tracked: ctx.tracked_ids(),
            plane_markers: 0,
        };
        if let Some(err) = failure {
            warn!(%err, frames = summary.frames, "Region tracking aborted");
            return Err(err);
        }

        let plane_markers = propagate_planes(
            &shared,
            ctx.tracks_map().object_name(),
            &summary.tracked,
            request.start_frame,
            &*homography,
        )?;
        info!(
            frames = summary.frames,
            tracks = summary.tracked.len(),
            cancelled,
            "Region tracking finished"
        );
        Ok(TrackingSummary {
            plane_markers,
            ..summary
        })
    })
}

fn propagate_planes(
    shared: &SharedTracking,
    object_name: &str,
    tracked: &[TrackId],
    start_frame: i32,
    solver: &dyn HomographySolver,
) -> Result<usize> {
    if tracked.is_empty() {
        return Ok(0);
    }
    let mut doc = shared.write();
    let Some(index) = doc.object_index_by_name(object_name) else {
        return Ok(0);
    };
    let obj = doc.object_mut(index)?;
    let planes: Vec<_> = obj
        .plane_tracks
        .iter()
        .filter(|p| !p.auto_keyframe && p.point_tracks.iter().any(|id| tracked.contains(id)))
        .map(|p| p.id)
        .collect();
    let mut written = 0;
    for id in planes {
        written += track_object_plane(obj, id, start_frame, solver)?;
    }
    debug!(planes = written, "Plane tracks propagated");
    Ok(written)
}

// ── Camera solve ────────────────────────────────────────────────

/// Solve the camera (or an object) of the shared document on a worker
/// thread. Preconditions are checked before the thread starts.
///
/// A cancelled solve discards its result.
pub fn spawn_camera_solve(
    shared: SharedTracking,
    adjuster: Arc<dyn BundleAdjuster>,
    object: usize,
    width: u32,
    height: u32,
) -> Result<JobHandle<SolveReport>> {
    let mut ctx = {
        let doc = shared.read();
        check(&doc, object)?;
        ReconstructionContext::new(&doc, object, width, height)?
    };

    spawn("motrack-solve", move |cancel, events| {
        let mut progress = |fraction: f32, message: &str| {
            let _ = events.send(JobEvent::Progress {
                fraction,
                message: message.to_string(),
            });
        };
        ctx.solve(&*adjuster, &mut progress)?;
        if cancel.is_cancelled() {
            return Err(MotrackError::Cancelled);
        }
        let mut doc = shared.write();
        ctx.finish(&mut doc)
    })
}
