//! 2D stabilization from point tracks.
//!
//! Each stabilization track gets a baseline at the frame closest to the
//! anchor, so that its contribution there matches the average of the tracks
//! already set up. Per frame the weighted average of all contributions gives
//! translation, rotation and scale of the footage, and the inverse of that is
//! the compensation applied to the frame.

use glam::{Mat2, Mat3};
use motrack_core::{FrameBuffer, Vec2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Tracking;
use crate::marker::Marker;
use crate::settings::StabilizationSettings;
use crate::track::Track;

/// Compensation for one frame, in frame pixels around the frame center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizationData {
    pub translation: Vec2,
    pub scale: f32,
    /// Radians.
    pub angle: f32,
}

impl StabilizationData {
    pub const IDENTITY: Self = Self {
        translation: Vec2::ZERO,
        scale: 1.0,
        angle: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for StabilizationData {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Matrix applying `data` to a `width` x `height` frame with the given pixel
/// aspect: `aspect * T * pivot * S * R * pivot^-1 * aspect^-1`, pivoting on
/// the frame center.
pub fn stabilization_matrix(width: u32, height: u32, pixel_aspect: f32, data: &StabilizationData) -> Mat3 {
    let center = Vec2::new(0.5 * pixel_aspect * width as f32, 0.5 * height as f32);
    let aspect = Mat3::from_scale(Vec2::new(1.0 / pixel_aspect, 1.0));
    let inv_aspect = Mat3::from_scale(Vec2::new(pixel_aspect, 1.0));
    aspect
        * Mat3::from_translation(data.translation)
        * Mat3::from_translation(center)
        * Mat3::from_scale(Vec2::splat(data.scale))
        * Mat3::from_angle(data.angle)
        * Mat3::from_translation(-center)
        * inv_aspect
}

/// Per-track constant part of the contribution.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    offset: Vec2,
    rotation: Mat2,
    scale: f32,
}

/// Averaged raw motion at one frame, unified coordinates.
#[derive(Debug, Clone, Copy, Default)]
struct Measurement {
    translation: Vec2,
    pivot: Vec2,
    angle: f32,
    scale_step: f32,
}

impl Measurement {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            pivot: self.pivot.lerp(other.pivot, t),
            angle: self.angle + (other.angle - self.angle) * t,
            scale_step: self.scale_step + (other.scale_step - self.scale_step) * t,
        }
    }
}

struct StabTrack {
    track: Track,
    location: bool,
    rotation: bool,
}

/// Computes stabilization for the camera object's stabilization tracks.
///
/// Holds a snapshot of the tracks and settings; rebuild it after edits.
pub struct Stabilizer {
    settings: StabilizationSettings,
    pixel_aspect: f32,
    tracks: Vec<StabTrack>,
}

impl Stabilizer {
    pub fn new(doc: &Tracking) -> Self {
        let tracks = doc
            .camera_object()
            .map(|obj| {
                obj.tracks
                    .iter()
                    .filter(|t| t.uses_stabilization())
                    .map(|t| StabTrack {
                        track: t.clone(),
                        location: t.flags.use_2d_stab,
                        rotation: t.flags.use_2d_stab_rot,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            settings: doc.stabilization.clone(),
            pixel_aspect: doc.camera.pixel_aspect as f32,
            tracks,
        }
    }

    pub fn settings(&self) -> &StabilizationSettings {
        &self.settings
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Frame aspect in square pixels.
    fn aspect(&self, width: u32, height: u32) -> f32 {
        width as f32 * self.pixel_aspect / height as f32
    }

    fn active(&self, width: u32, height: u32) -> bool {
        self.settings.enabled && !self.tracks.is_empty() && width > 0 && height > 0
    }

    /// Compensation for `frame`, identity when disabled or without data.
    pub fn stabilization_data(&self, frame: i32, width: u32, height: u32) -> StabilizationData {
        if !self.active(width, height) {
            return StabilizationData::IDENTITY;
        }
        let ctx = Context::new(self, self.aspect(width, height));
        ctx.data(frame, height, self.settings.scale)
    }

    pub fn stabilization_matrix(&self, frame: i32, width: u32, height: u32) -> Mat3 {
        let data = self.stabilization_data(frame, width, height);
        stabilization_matrix(width, height, self.pixel_aspect, &data)
    }

    /// Frames from the first to the last marker of any track that takes part.
    fn stabilized_range(&self) -> Option<(i32, i32)> {
        self.tracks
            .iter()
            .filter(|t| t.location || (self.settings.stabilize_rotation && t.rotation))
            .filter_map(|t| t.track.frame_range())
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))
    }

    /// Smallest zoom (at least 1, at most `max_scale`) that keeps every
    /// stabilized frame covering the whole canvas. Stored as the applied
    /// scale when autoscale is on.
    pub fn compute_autoscale(&mut self, width: u32, height: u32) -> f32 {
        let mut scale = 1.0f32;
        if let (true, Some((sfra, efra))) = (self.active(width, height), self.stabilized_range()) {
            let ctx = Context::new(self, self.aspect(width, height));
            let (w, h) = (width as f32, height as f32);
            let corners = [Vec2::ZERO, Vec2::new(0.0, h), Vec2::new(w, h), Vec2::new(w, 0.0)];
            let center = Vec2::new(0.5 * self.pixel_aspect * w, 0.5 * h);

            for frame in sfra..=efra {
                let data = ctx.data(frame, height, 1.0);
                if data.is_identity() {
                    continue;
                }
                let mat = stabilization_matrix(width, height, self.pixel_aspect, &data);
                let moved = corners.map(|c| mat.transform_point2(c));
                // fixed point of a zoom change, in frame pixels
                let zoom_center = Vec2::new(
                    (data.translation.x + center.x) / self.pixel_aspect,
                    data.translation.y + center.y,
                );
                scale = scale.max(required_scale(&moved, &corners, zoom_center));
            }
            if self.settings.max_scale > 0.0 {
                scale = scale.min(self.settings.max_scale);
            }
            debug!(scale, sfra, efra, "Stabilization autoscale");
        }
        if self.settings.autoscale {
            self.settings.scale = scale;
        }
        scale
    }

    /// Resample `frame_buffer` (frame number `frame`) through the inverse of
    /// the stabilization matrix. Areas with no source pixels are transparent.
    pub fn stabilize_frame(&self, frame_buffer: &FrameBuffer, frame: i32) -> FrameBuffer {
        let (width, height) = (frame_buffer.width, frame_buffer.height);
        let data = self.stabilization_data(frame, width, height);
        if data.is_identity() {
            return frame_buffer.clone();
        }
        let inverse = stabilization_matrix(width, height, self.pixel_aspect, &data).inverse();
        let mut out = FrameBuffer::new(width, height, frame_buffer.format);
        for y in 0..height {
            for x in 0..width {
                let src = inverse.transform_point2(Vec2::new(x as f32, y as f32));
                out.set_pixel(x, y, sample_bilinear(frame_buffer, src));
            }
        }
        out
    }
}

/// Update the document's applied scale from autoscale. Returns the scale.
pub fn update_autoscale(doc: &mut Tracking, width: u32, height: u32) -> f32 {
    let mut stabilizer = Stabilizer::new(doc);
    let scale = stabilizer.compute_autoscale(width, height);
    if doc.stabilization.autoscale {
        doc.stabilization.scale = scale;
    }
    scale
}

/// Zoom about `zoom_center` needed so the quad `moved` covers every point of
/// `canvas`.
fn required_scale(moved: &[Vec2; 4], canvas: &[Vec2; 4], zoom_center: Vec2) -> f32 {
    let area: f32 = (0..4).map(|i| moved[i].perp_dot(moved[(i + 1) % 4])).sum();
    if area.abs() < 1e-6 {
        return 1.0;
    }
    let orientation = area.signum();
    let mut scale = 1.0f32;
    for i in 0..4 {
        let (p1, p2) = (moved[i], moved[(i + 1) % 4]);
        let edge = p2 - p1;
        let len = edge.length();
        if len < 1e-6 {
            continue;
        }
        let center_dist = (edge.perp_dot(zoom_center - p1) * orientation) / len;
        if center_dist <= 1e-6 {
            continue;
        }
        for q in canvas {
            let dist = (edge.perp_dot(*q - p1) * orientation) / len;
            if dist < 0.0 {
                scale = scale.max(1.0 - dist / center_dist);
            }
        }
    }
    scale
}

fn sample_bilinear(frame: &FrameBuffer, p: Vec2) -> [f32; 4] {
    let (w, h) = (frame.width as f32, frame.height as f32);
    if p.x < -0.5 || p.y < -0.5 || p.x > w - 0.5 || p.y > h - 0.5 {
        return [0.0; 4];
    }
    let (x0, y0) = (p.x.floor(), p.y.floor());
    let (fx, fy) = (p.x - x0, p.y - y0);
    let (x0, y0) = (x0 as i32, y0 as i32);
    let a = frame.pixel(x0, y0);
    let b = frame.pixel(x0 + 1, y0);
    let c = frame.pixel(x0, y0 + 1);
    let d = frame.pixel(x0 + 1, y0 + 1);
    std::array::from_fn(|i| {
        let top = a[i] + (b[i] - a[i]) * fx;
        let bottom = c[i] + (d[i] - c[i]) * fx;
        top + (bottom - top) * fy
    })
}

// ── Per-call context ────────────────────────────────────────────

/// Baselines for one frame aspect.
struct Context<'a> {
    stab: &'a Stabilizer,
    settings: &'a StabilizationSettings,
    aspect: f32,
    baselines: Vec<Option<Baseline>>,
}

impl<'a> Context<'a> {
    fn new(stab: &'a Stabilizer, aspect: f32) -> Self {
        let mut ctx = Self {
            stab,
            settings: &stab.settings,
            aspect,
            baselines: vec![None; stab.tracks.len()],
        };
        ctx.init();
        ctx
    }

    /// Weights at or below `min_weight` count as no data.
    fn has_weight(&self, weight: f32) -> bool {
        weight > self.settings.min_weight
    }

    fn usable(&self, track: &Track, marker: &Marker) -> bool {
        marker.is_enabled() && self.has_weight(track.stab_weight_at(marker.frame))
    }

    /// Usable marker exactly at `frame` and its weight.
    fn data_point<'t>(&self, track: &'t Track, frame: i32) -> Option<(&'t Marker, f32)> {
        let marker = track.exact_marker(frame).filter(|m| self.usable(track, m))?;
        Some((marker, track.stab_weight_at(frame)))
    }

    /// Closest usable frames at or below and at or above `frame`.
    fn usable_frames_around(&self, track: &Track, frame: i32) -> (Option<i32>, Option<i32>) {
        let markers = track.markers();
        let start = track.marker_index(frame).unwrap_or(0);
        let higher = markers[start..]
            .iter()
            .find(|m| m.frame >= frame && self.usable(track, m))
            .map(|m| m.frame);
        let lower = markers[..markers.len().min(start + 1)]
            .iter()
            .rev()
            .find(|m| m.frame <= frame && self.usable(track, m))
            .map(|m| m.frame);
        (lower, higher)
    }

    /// Nearest frames on both sides where some location track has data.
    fn next_working_frames(&self, frame: i32, initialized_only: bool) -> (Option<i32>, Option<i32>) {
        let mut lower: Option<i32> = None;
        let mut higher: Option<i32> = None;
        for (i, st) in self.stab.tracks.iter().enumerate() {
            if !st.location || (initialized_only && self.baselines[i].is_none()) {
                continue;
            }
            let (l, h) = self.usable_frames_around(&st.track, frame);
            lower = lower.max(l);
            higher = match (higher, h) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        (lower, higher)
    }

    fn weighted_positions(&self, frame: i32) -> Option<Vec2> {
        let mut sum = Vec2::ZERO;
        let mut weight_sum = 0.0;
        for st in self.stab.tracks.iter().filter(|t| t.location) {
            if let Some((marker, weight)) = self.data_point(&st.track, frame) {
                sum += marker.pos * weight;
                weight_sum += weight;
            }
        }
        self.has_weight(weight_sum).then(|| sum / weight_sum)
    }

    /// Weighted center of the location tracks, borrowed from the nearest
    /// frame with data when `frame` has none.
    fn average_marker_positions(&self, frame: i32) -> Vec2 {
        self.weighted_positions(frame)
            .or_else(|| {
                let (lower, higher) = self.next_working_frames(frame, false);
                lower.or(higher).and_then(|f| self.weighted_positions(f))
            })
            .unwrap_or(Vec2::splat(0.5))
    }

    fn rotation_contribution(&self, base: &Baseline, marker: &Marker, pivot: Vec2) -> (f32, f32, f32) {
        let bias = self.settings.scale_error_bias;
        let mut pos = marker.pos - pivot;
        pos.x *= self.aspect;
        let pos = base.rotation * pos;
        let angle = pos.y.atan2(pos.x);
        let len = pos.length();
        let quality = 1.0 - (-len * len / bias).exp();
        let scale = (len + bias) * base.scale;
        (angle, scale, quality)
    }

    fn average_track_contributions(&self, frame: i32) -> Option<Measurement> {
        let mut translation = Vec2::ZERO;
        let mut pivot = Vec2::ZERO;
        let mut weight_sum = 0.0;
        for (st, base) in self.stab.tracks.iter().zip(&self.baselines) {
            let (true, Some(base)) = (st.location, base) else {
                continue;
            };
            if let Some((marker, weight)) = self.data_point(&st.track, frame) {
                weight_sum += weight;
                translation += (base.offset + marker.pos) * weight;
                pivot += marker.pos * weight;
            }
        }
        if !self.has_weight(weight_sum) {
            return None;
        }
        translation /= weight_sum;
        pivot /= weight_sum;

        let mut out = Measurement {
            translation,
            pivot,
            ..Measurement::default()
        };
        if !(self.settings.stabilize_rotation || self.settings.stabilize_scale) {
            return Some(out);
        }

        let mut angle = 0.0;
        let mut scale_step = 0.0;
        let mut weight_sum = 0.0;
        for (st, base) in self.stab.tracks.iter().zip(&self.baselines) {
            let (true, Some(base)) = (st.rotation, base) else {
                continue;
            };
            if let Some((marker, weight)) = self.data_point(&st.track, frame) {
                let (a, s, quality) = self.rotation_contribution(base, marker, pivot);
                let w = weight * quality;
                weight_sum += w;
                angle += a * w;
                scale_step += s.ln() * w;
            }
        }
        if self.has_weight(weight_sum) {
            if self.settings.stabilize_rotation {
                out.angle = angle / weight_sum;
            }
            if self.settings.stabilize_scale {
                out.scale_step = scale_step / weight_sum;
            }
        }
        Some(out)
    }

    /// Set up baselines, closest tracks to the anchor first.
    fn init(&mut self) {
        let anchor = self.settings.anchor_frame;
        let mut order: Vec<(i32, i32, usize)> = Vec::new();
        for (i, st) in self.stab.tracks.iter().enumerate() {
            let (lower, higher) = self.usable_frames_around(&st.track, anchor);
            let closest = match (lower, higher) {
                (Some(l), Some(h)) if h - anchor < anchor - l => Some(h),
                (Some(l), _) => Some(l),
                (None, h) => h,
            };
            if let Some(frame) = closest {
                order.push(((frame - anchor).abs(), frame, i));
            }
        }
        if order.is_empty() {
            return;
        }
        order.sort_by_key(|(dist, _, _)| *dist);

        let pivot = self.average_marker_positions(anchor);
        let bias = self.settings.scale_error_bias;
        let mut reference = anchor;
        let mut average = Measurement::default();
        for (_, frame, i) in order {
            if frame != reference {
                reference = frame;
                average = self.average_track_contributions(reference).unwrap_or_default();
            }
            let Some(marker) = self.stab.tracks[i].track.exact_marker(reference) else {
                continue;
            };
            let mut pos = marker.pos - pivot;
            pos.x *= self.aspect;
            self.baselines[i] = Some(Baseline {
                offset: average.translation - marker.pos,
                rotation: Mat2::from_angle(average.angle - pos.y.atan2(pos.x)),
                scale: average.scale_step.exp() / (pos.length() + bias),
            });
        }
    }

    /// Raw motion at `frame`, filling gaps from the nearest frames with data.
    fn determine_offset(&self, frame: i32) -> Option<Measurement> {
        if let Some(m) = self.average_track_contributions(frame) {
            return Some(m);
        }
        match self.next_working_frames(frame, true) {
            (Some(a), Some(b)) if a < b => {
                let ma = self.average_track_contributions(a)?;
                let mb = self.average_track_contributions(b)?;
                let t = (frame - a) as f32 / (b - a) as f32;
                Some(ma.lerp(&mb, t))
            }
            (Some(f), _) | (None, Some(f)) => self.average_track_contributions(f),
            (None, None) => None,
        }
    }

    /// Compensation at `frame`, with `extra_scale` multiplied in and the
    /// rotation center moved to the frame center.
    fn data(&self, frame: i32, height: u32, extra_scale: f32) -> StabilizationData {
        let Some(m) = self.determine_offset(frame) else {
            return StabilizationData::IDENTITY;
        };
        let s = self.settings;
        let f = frame as f64;

        let mut scale = if s.stabilize_scale {
            (m.scale_step * s.scale_influence.evaluate(f) as f32).exp()
        } else {
            1.0
        };
        let mut translation = m.translation * s.location_influence.evaluate(f) as f32;
        let mut angle = m.angle * s.rotation_influence.evaluate(f) as f32;

        translation -= Vec2::new(s.target_x.evaluate(f) as f32, s.target_y.evaluate(f) as f32);
        angle -= s.target_rotation.evaluate(f) as f32;
        let target_scale = s.target_scale.evaluate(f) as f32;
        if target_scale != 0.0 {
            scale /= target_scale;
        }

        let size = height as f32;
        let to_pixels = Vec2::new(size * self.aspect, size);
        translation *= to_pixels;
        let pivot = m.pivot * to_pixels;

        translation = -translation;
        angle = -angle;
        if scale != 0.0 {
            scale = 1.0 / scale;
        }
        scale *= extra_scale;

        // rotate and scale about the measured pivot instead of the center
        let origin = Vec2::new(0.5 * self.aspect * size, 0.5 * size);
        let rotated = Mat2::from_angle(angle) * (pivot - origin) * scale + origin;
        translation += pivot - rotated;

        StabilizationData {
            translation,
            scale,
            angle,
        }
    }
}
