//! Conversions between the three coordinate spaces markers live in.
//!
//! * frame-unified: `0..1` across the frame, what markers store;
//! * frame-pixel: pixels from the frame origin;
//! * search-pixel: pixels from the (floored) origin of a marker's search area,
//!   the space patch aligners work in.

use glam::DVec2;
use motrack_core::Vec2;

use crate::marker::{ClampEvent, Marker};

#[inline]
pub fn unified_to_pixel(width: u32, height: u32, unified: Vec2) -> Vec2 {
    unified * Vec2::new(width as f32, height as f32)
}

#[inline]
pub fn pixel_to_unified(width: u32, height: u32, pixel: Vec2) -> Vec2 {
    pixel / Vec2::new(width as f32, height as f32)
}

/// Marker position with the track offset applied.
#[inline]
pub fn marker_to_frame_unified(marker: &Marker, offset: Vec2) -> Vec2 {
    marker.pos + offset
}

/// Search bounds relative to the marker position.
#[inline]
pub fn search_minmax(marker: &Marker) -> (Vec2, Vec2) {
    (marker.search_min, marker.search_max)
}

/// Clamp after an edit, then keep the search area one pixel inside the frame.
pub fn clamp_marker(width: u32, height: u32, marker: &mut Marker, event: ClampEvent) {
    marker.clamp(event);
    if width == 0 || height == 0 {
        return;
    }
    let px = Vec2::new(1.0 / width as f32, 1.0 / height as f32);
    let lo = px - marker.pos;
    let hi = Vec2::ONE - px - marker.pos;
    marker.search_min = marker.search_min.clamp(lo, hi);
    marker.search_max = marker.search_max.clamp(lo, hi);
}

/// Frame-pixel position of a point given relative to the marker position.
#[inline]
pub fn marker_relative_to_frame_pixel(width: u32, height: u32, marker: &Marker, rel: Vec2) -> Vec2 {
    unified_to_pixel(width, height, marker.pos + rel)
}

/// Frame-pixel origin of the marker's search area, snapped to whole pixels.
pub fn search_origin_frame_pixel(width: u32, height: u32, marker: &Marker) -> Vec2 {
    marker_relative_to_frame_pixel(width, height, marker, marker.search_min).floor()
}

/// Size of the search area in whole pixels.
pub fn search_size_pixels(width: u32, height: u32, marker: &Marker) -> (i32, i32) {
    let size = unified_to_pixel(width, height, marker.search_max - marker.search_min);
    (size.x.round() as i32, size.y.round() as i32)
}

fn marker_relative_to_search_pixel(width: u32, height: u32, marker: &Marker, rel: Vec2) -> Vec2 {
    marker_relative_to_frame_pixel(width, height, marker, rel)
        - search_origin_frame_pixel(width, height, marker)
}

fn search_pixel_to_marker_relative(width: u32, height: u32, marker: &Marker, search_pixel: Vec2) -> Vec2 {
    let frame_pixel = search_origin_frame_pixel(width, height, marker) + search_pixel;
    pixel_to_unified(width, height, frame_pixel) - marker.pos
}

/// Pattern corners followed by the marker center, in search-pixel space with
/// pixel centers at integer coordinates.
pub fn marker_coords_for_tracking(width: u32, height: u32, marker: &Marker) -> [DVec2; 5] {
    let mut out = [DVec2::ZERO; 5];
    for (dst, corner) in out.iter_mut().zip(marker.pattern_corners.iter()) {
        *dst = (marker_relative_to_search_pixel(width, height, marker, *corner) - 0.5).as_dvec2();
    }
    out[4] = (marker_relative_to_search_pixel(width, height, marker, Vec2::ZERO) - 0.5).as_dvec2();
    out
}

/// Inverse of [`marker_coords_for_tracking`], writing into `marker`.
///
/// The search origin is taken from `marker` as it is before the update. The
/// marker moves by the tracked center delta; corners stay relative to it.
pub fn set_marker_coords_from_tracking(width: u32, height: u32, marker: &mut Marker, coords: &[DVec2; 5]) {
    let to_rel = |m: &Marker, p: DVec2| search_pixel_to_marker_relative(width, height, m, (p + 0.5).as_vec2());

    let mut corners = [Vec2::ZERO; 4];
    for (dst, p) in corners.iter_mut().zip(coords.iter()) {
        *dst = to_rel(marker, *p);
    }
    let delta = to_rel(marker, coords[4]);

    for (dst, c) in marker.pattern_corners.iter_mut().zip(corners.iter()) {
        *dst = *c - delta;
    }
    marker.pos += delta;
}

/// Scale the search area of `new` by how much the pattern grew from `old`.
pub fn scale_marker_search(old: &Marker, new: &mut Marker) {
    let (old_min, old_max) = old.pattern_minmax();
    let (new_min, new_max) = new.pattern_minmax();
    let old_size = old_max - old_min;
    if old_size.x <= 0.0 || old_size.y <= 0.0 {
        return;
    }
    let scale = (new_max - new_min) / old_size;
    new.search_min = old.search_min * scale;
    new.search_max = old.search_max * scale;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> Marker {
        Marker::new(
            1,
            Vec2::new(0.5, 0.5),
            Vec2::new(10.5 / 200.0, 10.5 / 100.0),
            Vec2::new(35.5 / 200.0, 35.5 / 100.0),
        )
    }

    #[test]
    fn test_unified_pixel_roundtrip() {
        let p = unified_to_pixel(1920, 1080, Vec2::new(0.25, 0.5));
        assert_eq!(p, Vec2::new(480.0, 540.0));
        assert_eq!(pixel_to_unified(1920, 1080, p), Vec2::new(0.25, 0.5));
    }

    #[test]
    fn test_search_origin_is_floored() {
        let m = marker();
        let origin = search_origin_frame_pixel(200, 100, &m);
        assert_eq!(origin, Vec2::new(64.0, 14.0));
        assert_eq!(search_size_pixels(200, 100, &m), (71, 71));
    }

    #[test]
    fn test_tracking_coords_center() {
        let m = marker();
        let coords = marker_coords_for_tracking(200, 100, &m);
        // center pixel 100,50 minus origin 64,14 minus half a pixel
        assert!((coords[4] - DVec2::new(35.5, 35.5)).length() < 1e-4);
        assert!((coords[0] - DVec2::new(25.0, 25.0)).length() < 1e-4);
    }

    #[test]
    fn test_set_coords_identity_keeps_marker() {
        let mut m = marker();
        let coords = marker_coords_for_tracking(200, 100, &m);
        let before = m;
        set_marker_coords_from_tracking(200, 100, &mut m, &coords);
        assert!((m.pos - before.pos).length() < 1e-5);
        for (a, b) in m.pattern_corners.iter().zip(before.pattern_corners.iter()) {
            assert!((*a - *b).length() < 1e-5);
        }
    }

    #[test]
    fn test_set_coords_shift() {
        let mut m = marker();
        let mut coords = marker_coords_for_tracking(200, 100, &m);
        coords.iter_mut().for_each(|c| *c += DVec2::new(4.0, -2.0));
        let before = m;
        set_marker_coords_from_tracking(200, 100, &mut m, &coords);
        assert!((m.pos - (before.pos + Vec2::new(0.02, -0.02))).length() < 1e-5);
        assert!((m.pattern_corners[2] - before.pattern_corners[2]).length() < 1e-5);
    }

    #[test]
    fn test_clamp_marker_keeps_search_inside_frame() {
        let mut m = marker();
        m.pos = Vec2::new(0.05, 0.5);
        clamp_marker(200, 100, &mut m, ClampEvent::SearchSize);
        let rect = m.search_rect();
        assert!(rect.min().x >= 1.0 / 200.0 - 1e-6);
        assert!(rect.max().y <= 1.0 - 1.0 / 100.0 + 1e-6);
        assert_eq!(search_minmax(&m).0, m.search_min);
        assert_eq!(marker_to_frame_unified(&m, Vec2::new(0.1, 0.0)), Vec2::new(0.15, 0.5));
    }

    #[test]
    fn test_scale_marker_search() {
        let old = marker();
        let mut new = old;
        new.pattern_corners.iter_mut().for_each(|c| *c *= 2.0);
        scale_marker_search(&old, &mut new);
        assert!((new.search_max - old.search_max * 2.0).length() < 1e-6);
    }
}
