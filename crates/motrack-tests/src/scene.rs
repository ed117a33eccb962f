//! Synthetic footage and scenes shared by the integration tests.

use std::sync::Arc;

use glam::{DMat3, DVec2, DVec3};
use motrack_core::{FrameBuffer, PixelFormat, Vec2};
use motrack_tracking::{CameraIntrinsics, FrameSequence, FrameSource, Marker, Track, Tracking};

pub const W: u32 = 160;
pub const H: u32 = 120;

fn noise(x: i32, y: i32) -> f32 {
    let v = ((x as f64 * 12.9898 + y as f64 * 78.233).sin() * 43758.5453).fract();
    v.abs() as f32
}

/// Random texture shifted by whole pixels.
pub fn textured_frame(shift: (i32, i32)) -> FrameBuffer {
    let mut frame = FrameBuffer::new(W, H, PixelFormat::RgbaF32);
    for y in 0..H {
        for x in 0..W {
            let v = noise(x as i32 - shift.0, y as i32 - shift.1);
            frame.set_pixel(x, y, [v, v, v, 1.0]);
        }
    }
    frame
}

/// Footage starting at frame 1 whose content is shifted by `shifts[i]` on
/// frame `i + 1`.
pub fn footage(shifts: &[(i32, i32)]) -> Arc<dyn FrameSource> {
    let frames = shifts.iter().map(|s| textured_frame(*s));
    Arc::new(FrameSequence::from_frames(1, frames).unwrap())
}

/// Footage panning by `step` pixels per frame.
pub fn panning_footage(frames: i32, step: (i32, i32)) -> Arc<dyn FrameSource> {
    let shifts: Vec<(i32, i32)> = (0..frames).map(|i| (i * step.0, i * step.1)).collect();
    footage(&shifts)
}

/// Footage whose left half pans by `step` per frame while the right half is
/// fresh noise on every frame, so nothing there can be followed.
pub fn half_noise_footage(frames: i32, step: (i32, i32)) -> Arc<dyn FrameSource> {
    let frames = (0..frames).map(|i| {
        let mut frame = textured_frame((i * step.0, i * step.1));
        for y in 0..H {
            for x in W / 2..W {
                let v = noise(x as i32 + 977 * (i + 1), y as i32 - 613 * (i + 1));
                frame.set_pixel(x, y, [v, v, v, 1.0]);
            }
        }
        frame
    });
    Arc::new(FrameSequence::from_frames(1, frames).unwrap())
}

/// Document with small pattern and search sizes that suit the test footage.
pub fn tracking_doc() -> Tracking {
    let mut doc = Tracking::new();
    doc.settings.default_pattern_size = 15;
    doc.settings.default_search_size = 35;
    doc
}

pub fn to_px(v: Vec2) -> Vec2 {
    Vec2::new(v.x * W as f32, v.y * H as f32)
}

// ── Structure from motion ───────────────────────────────────────

pub const SOLVE_W: u32 = 1920;
pub const SOLVE_H: u32 = 1080;

fn world_point(i: usize) -> DVec3 {
    let f = i as f64;
    DVec3::new(
        (f * 0.41).sin() * 3.0,
        (f * 0.67).cos() * 2.0,
        9.0 + (f * 0.29).sin() * 2.0,
    )
}

fn project(frame: i32, x: DVec3) -> DVec2 {
    let f = frame as f64;
    let r = DMat3::from_rotation_y(0.012 * f) * DMat3::from_rotation_x(-0.003 * f);
    let center = DVec3::new(0.1 * f, -0.03 * f, 0.02 * f);
    let c = r * (x - center);
    CameraIntrinsics::default().denormalize(SOLVE_W, SOLVE_H, DVec2::new(c.x / c.z, c.y / c.z))
}

/// Camera object with `tracks` tracks observing a static point cloud from a
/// moving camera.
pub fn solvable_doc(tracks: usize, frames: std::ops::RangeInclusive<i32>) -> Tracking {
    let mut doc = Tracking::new();
    let obj = doc.camera_object_mut().unwrap();
    obj.keyframe1 = *frames.start();
    obj.keyframe2 = *frames.start() + 9;
    for i in 0..tracks {
        let mut track = Track::new("Point");
        for frame in frames.clone() {
            let px = project(frame, world_point(i));
            let pos = Vec2::new(
                (px.x / SOLVE_W as f64) as f32,
                (px.y / SOLVE_H as f64) as f32,
            );
            track.insert_marker(Marker::new(frame, pos, Vec2::splat(0.005), Vec2::splat(0.02)));
        }
        obj.push_track(track);
    }
    doc
}
