//! Stroke masks restricting which pattern pixels drive the tracker.

use motrack_core::Vec2;
use serde::{Deserialize, Serialize};

/// Closed polygons drawn over the clip, points in frame-unified space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskStrokes {
    pub strokes: Vec<Vec<Vec2>>,
}

impl MaskStrokes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stroke(&mut self, points: Vec<Vec2>) {
        self.strokes.push(points);
    }

    /// True when no stroke can cover any pixel.
    pub fn is_empty(&self) -> bool {
        self.strokes.iter().all(|s| s.len() < 3)
    }

    /// Rasterize into a `width` x `height` window whose top-left pixel sits at
    /// `region_min` (frame pixels). Pixels covered by any stroke are 1.
    pub fn rasterize(
        &self,
        frame_width: u32,
        frame_height: u32,
        region_min: Vec2,
        width: u32,
        height: u32,
    ) -> FloatMask {
        let mut mask = FloatMask::new(width, height);
        let scale = Vec2::new(frame_width as f32, frame_height as f32);
        for stroke in self.strokes.iter().filter(|s| s.len() >= 3) {
            let poly: Vec<Vec2> = stroke.iter().map(|p| *p * scale - region_min).collect();
            fill_polygon(&poly, &mut mask);
        }
        mask
    }
}

/// Even-odd scanline fill sampling pixel centers.
fn fill_polygon(poly: &[Vec2], mask: &mut FloatMask) {
    let n = poly.len();
    let mut crossings: Vec<f32> = Vec::with_capacity(n);
    for y in 0..mask.height {
        let sy = y as f32 + 0.5;
        crossings.clear();
        for i in 0..n {
            let p0 = poly[i];
            let p1 = poly[(i + 1) % n];
            if (p0.y <= sy && p1.y > sy) || (p1.y <= sy && p0.y > sy) {
                let t = (sy - p0.y) / (p1.y - p0.y);
                crossings.push(p0.x + t * (p1.x - p0.x));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let x0 = (span[0] - 0.5).ceil().max(0.0) as u32;
            let x1 = (span[1] - 0.5).ceil().min(mask.width as f32).max(0.0) as u32;
            for x in x0..x1 {
                mask.set(x, y, 1.0);
            }
        }
    }
}

/// Per-pixel weight over a search window.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatMask {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl FloatMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0.0; width as usize * height as usize],
            width,
            height,
        }
    }

    /// Zero outside the window.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0.0;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: f32) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = val;
        }
    }

    /// Bilinear lookup in window pixel coordinates.
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;
        let (ix, iy) = (x0 as i32, y0 as i32);
        let top = self.get(ix, iy) * (1.0 - fx) + self.get(ix + 1, iy) * fx;
        let bottom = self.get(ix, iy + 1) * (1.0 - fx) + self.get(ix + 1, iy + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    pub fn coverage(&self) -> usize {
        self.data.iter().filter(|v| **v > 0.0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f32, max: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(min, min),
            Vec2::new(max, min),
            Vec2::new(max, max),
            Vec2::new(min, max),
        ]
    }

    #[test]
    fn test_rasterize_square() {
        let mut strokes = MaskStrokes::new();
        strokes.add_stroke(square(0.25, 0.75));
        let mask = strokes.rasterize(100, 100, Vec2::new(20.0, 20.0), 60, 60);
        // square covers pixels 25..75 of the frame, 5..55 of the window
        assert_eq!(mask.get(4, 30), 0.0);
        assert_eq!(mask.get(5, 30), 1.0);
        assert_eq!(mask.get(54, 54), 1.0);
        assert_eq!(mask.get(55, 30), 0.0);
        assert_eq!(mask.coverage(), 50 * 50);
    }

    #[test]
    fn test_open_strokes_are_ignored() {
        let mut strokes = MaskStrokes::new();
        strokes.add_stroke(vec![Vec2::ZERO, Vec2::ONE]);
        assert!(strokes.is_empty());
        let mask = strokes.rasterize(10, 10, Vec2::ZERO, 10, 10);
        assert_eq!(mask.coverage(), 0);
    }

    #[test]
    fn test_mask_sample_is_zero_outside() {
        let mut mask = FloatMask::new(2, 2);
        mask.set(0, 0, 1.0);
        assert_eq!(mask.sample(-5.0, -5.0), 0.0);
        assert!((mask.sample(0.5, 0.0) - 0.5).abs() < 1e-6);
    }
}
