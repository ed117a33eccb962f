//! Plane track propagation from the motion of its point tracks.

use glam::{DMat3, DVec2};
use motrack_core::{MotrackError, Quad, Result, Vec2};
use tracing::debug;

use crate::backend::homography::{apply_homography, quad_to_quad};
use crate::backend::{HomographySolver, TrackDirection};
use crate::marker::{MarkerState, PlaneMarker};
use crate::object::TrackingObject;
use crate::plane_track::{PlaneTrackId, PlaneTrack, MIN_PLANE_POINT_TRACKS};
use crate::track::Track;

#[inline]
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    3.0 * t * t - 2.0 * t * t * t
}

fn to_dvec2(quad: &Quad) -> [DVec2; 4] {
    quad.corners.map(|c| c.as_dvec2())
}

/// Marker positions of tracks enabled at both frames.
fn correspondences(tracks: &[&Track], from: i32, to: i32) -> (Vec<DVec2>, Vec<DVec2>) {
    tracks
        .iter()
        .filter_map(|track| {
            let a = track.exact_marker(from)?;
            let b = track.exact_marker(to)?;
            (a.is_enabled() && b.is_enabled()).then(|| (a.pos.as_dvec2(), b.pos.as_dvec2()))
        })
        .unzip()
}

fn transform_quad(h: &DMat3, quad: &Quad) -> Option<Quad> {
    let mut corners = [Vec2::ZERO; 4];
    for (dst, src) in corners.iter_mut().zip(quad.corners) {
        *dst = apply_homography(h, src.as_dvec2())?.as_vec2();
    }
    Some(Quad::new(corners))
}

/// First user keyframe strictly past `frame` in `direction`.
fn keyframe_beyond(plane: &PlaneTrack, frame: i32, direction: TrackDirection) -> Option<PlaneMarker> {
    let keyed = |m: &&PlaneMarker| m.state == MarkerState::Keyframed;
    match direction {
        TrackDirection::Forward => plane.markers().iter().filter(|m| m.frame > frame).find(keyed),
        TrackDirection::Backward => plane.markers().iter().rev().filter(|m| m.frame < frame).find(keyed),
    }
    .copied()
}

/// Nearest user keyframe at or past `frame` in `direction`.
fn keyframe_from(plane: &PlaneTrack, frame: i32, direction: TrackDirection) -> Option<PlaneMarker> {
    keyframe_beyond(plane, frame - direction.step(), direction)
}

fn propagate(
    plane: &mut PlaneTrack,
    tracks: &[&Track],
    start_frame: i32,
    direction: TrackDirection,
    retrack: bool,
    solver: &dyn HomographySolver,
) -> Result<usize> {
    let Some(start) = plane.marker(start_frame).copied() else {
        return Ok(0);
    };
    let keyframe = keyframe_beyond(plane, start_frame, direction);
    let respect_keyframes = retrack || plane.auto_keyframe;

    let mut corners = start.corners;
    let mut current = start_frame;
    let mut written = 0;
    loop {
        let next = current + direction.step();
        let (x1, x2) = correspondences(tracks, current, next);
        if x1.len() < MIN_PLANE_POINT_TRACKS {
            debug!(plane = %plane.name, frame = next, pairs = x1.len(), "Plane propagation stopped");
            break;
        }
        let existing = plane.exact_marker(next).copied();
        if respect_keyframes && existing.is_some_and(|m| !m.state.is_tracked()) {
            break;
        }

        let h = match solver.solve(&x1, &x2) {
            Ok(h) => h,
            Err(MotrackError::Solver(reason)) => {
                debug!(plane = %plane.name, frame = next, %reason, "Plane propagation stopped");
                break;
            }
            Err(err) => return Err(err),
        };
        let Some(mut next_corners) = transform_quad(&h, &corners) else {
            break;
        };

        if respect_keyframes {
            if let (Some(key), Some(existing)) = (keyframe, existing) {
                let span = (key.frame - start_frame) as f32;
                if span != 0.0 {
                    let fac = smoothstep((next - start_frame) as f32 / span);
                    next_corners = next_corners.lerp(&existing.corners, fac);
                }
            }
        }

        plane.insert_marker(PlaneMarker {
            frame: next,
            corners: next_corners,
            state: MarkerState::Tracked,
        });
        corners = next_corners;
        current = next;
        written += 1;
    }
    Ok(written)
}

/// Propagate `plane` forward and then backward from `start_frame` through
/// the motion of `tracks`. Returns the number of plane markers written.
pub fn track_plane_from_existing_motion(
    plane: &mut PlaneTrack,
    tracks: &[&Track],
    start_frame: i32,
    solver: &dyn HomographySolver,
) -> Result<usize> {
    let forward = propagate(plane, tracks, start_frame, TrackDirection::Forward, false, solver)?;
    let backward = propagate(plane, tracks, start_frame, TrackDirection::Backward, false, solver)?;
    Ok(forward + backward)
}

/// Re-estimate the tracked segment around `frame`: forward from the
/// previous keyframe, then backward from the next one, blending the two
/// passes so the shape meets both keyframes.
pub fn retrack_plane_segment(
    plane: &mut PlaneTrack,
    tracks: &[&Track],
    frame: i32,
    solver: &dyn HomographySolver,
) -> Result<usize> {
    let mut written = 0;
    if let Some(prev) = keyframe_from(plane, frame, TrackDirection::Backward) {
        written += propagate(plane, tracks, prev.frame, TrackDirection::Forward, true, solver)?;
    }
    if let Some(next) = keyframe_from(plane, frame, TrackDirection::Forward) {
        written += propagate(plane, tracks, next.frame, TrackDirection::Backward, true, solver)?;
    }
    Ok(written)
}

/// Propagate a plane track of `object` using the object's own point tracks.
pub fn track_object_plane(
    object: &mut TrackingObject,
    id: PlaneTrackId,
    start_frame: i32,
    solver: &dyn HomographySolver,
) -> Result<usize> {
    let TrackingObject {
        tracks, plane_tracks, ..
    } = object;
    let plane = plane_tracks
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| MotrackError::NotFound(format!("plane track {id}")))?;
    let points: Vec<&Track> = plane
        .point_tracks
        .iter()
        .filter_map(|pid| tracks.iter().find(|t| t.id == *pid))
        .collect();
    track_plane_from_existing_motion(plane, &points, start_frame, solver)
}

/// Homography mapping one quad onto another, corner to corner.
pub fn homography_between_two_quads(from: &Quad, to: &Quad) -> Option<DMat3> {
    quad_to_quad(&to_dvec2(from), &to_dvec2(to))
}

/// Homography from the plane's reference keyframe quad to its quad at `frame`.
///
/// The reference is the closest keyframe at or before `frame`, or the first
/// one after it.
pub fn plane_marker_homography(plane: &PlaneTrack, frame: i32) -> Option<DMat3> {
    let reference = keyframe_from(plane, frame, TrackDirection::Backward)
        .or_else(|| keyframe_from(plane, frame, TrackDirection::Forward))?;
    let current = plane.marker(frame)?;
    homography_between_two_quads(&reference.corners, &current.corners)
}
