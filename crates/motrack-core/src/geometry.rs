//! Geometric primitives: rectangles and four-corner regions.

use bytemuck::{Pod, Zeroable};
use glam::Vec2 as GlamVec2;
use serde::{Deserialize, Serialize};

/// 2D vector.
pub type Vec2 = GlamVec2;

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from two corners.
    pub fn from_corners(min: Vec2, max: Vec2) -> Self {
        Self {
            x: min.x,
            y: min.y,
            width: max.x - min.x,
            height: max.y - min.y,
        }
    }

    /// Smallest rectangle containing all points. `None` for an empty slice.
    pub fn bounding(points: &[Vec2]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
        Some(Self::from_corners(min, max))
    }

    /// Minimum corner.
    #[inline]
    pub fn min(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Maximum corner.
    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.x + self.width, self.y + self.height)
    }

    /// Size as a vector.
    #[inline]
    pub fn size(self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    /// Check if a point is inside the rectangle.
    #[inline]
    pub fn contains(self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }

    /// Compute union with another rectangle (bounding box).
    pub fn union(self, other: Self) -> Self {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// Four-corner region. Corners run from the minimum corner along x first,
/// the same order as marker pattern corners.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Vec2; 4],
}

impl Quad {
    pub const fn new(corners: [Vec2; 4]) -> Self {
        Self { corners }
    }

    /// Axis-aligned quad covering a rectangle.
    pub fn from_rect(rect: Rect) -> Self {
        let (min, max) = (rect.min(), rect.max());
        Self::new([
            min,
            Vec2::new(max.x, min.y),
            max,
            Vec2::new(min.x, max.y),
        ])
    }

    pub fn bounds(&self) -> Rect {
        // Four corners, never empty.
        Rect::bounding(&self.corners).unwrap_or_default()
    }

    pub fn translated(&self, delta: Vec2) -> Self {
        Self::new(self.corners.map(|c| c + delta))
    }

    /// Per-corner linear blend, `t = 0` gives `self`.
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut corners = self.corners;
        for (c, o) in corners.iter_mut().zip(other.corners.iter()) {
            *c = c.lerp(*o, t);
        }
        Self::new(corners)
    }
}
