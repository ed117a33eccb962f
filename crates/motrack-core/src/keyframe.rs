//! Frame-keyed animation curves.
//!
//! Track weights, stabilization influences and stabilization targets can all
//! be animated. Curves are keyed by (possibly fractional) frame number and
//! eased with cubic Bézier segments evaluated by Newton-Raphson.

use serde::{Deserialize, Serialize};

// ── Easing curves ───────────────────────────────────────────────

/// Cubic Bézier control points for easing (x1, y1, x2, y2).
/// The curve goes from (0,0) to (1,1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubicBezier {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl CubicBezier {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Evaluate the X coordinate of the Bézier curve at parameter t.
    fn sample_x(&self, t: f64) -> f64 {
        let t2 = t * t;
        let t3 = t2 * t;
        let mt = 1.0 - t;
        let mt2 = mt * mt;
        3.0 * mt2 * t * self.x1 + 3.0 * mt * t2 * self.x2 + t3
    }

    /// Evaluate the Y coordinate of the Bézier curve at parameter t.
    fn sample_y(&self, t: f64) -> f64 {
        let t2 = t * t;
        let t3 = t2 * t;
        let mt = 1.0 - t;
        let mt2 = mt * mt;
        3.0 * mt2 * t * self.y1 + 3.0 * mt * t2 * self.y2 + t3
    }

    /// Derivative of X with respect to t.
    fn sample_dx(&self, t: f64) -> f64 {
        let mt = 1.0 - t;
        3.0 * mt * mt * self.x1 + 6.0 * mt * t * (self.x2 - self.x1) + 3.0 * t * t * (1.0 - self.x2)
    }

    /// Solve for the parameter t given an x value using Newton-Raphson.
    /// Returns the y value at that x.
    pub fn evaluate(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }

        // Newton-Raphson: find t such that sample_x(t) = x
        let mut t = x; // initial guess

        for _ in 0..8 {
            let x_est = self.sample_x(t) - x;
            let dx = self.sample_dx(t);
            if dx.abs() < 1e-12 {
                break;
            }
            t -= x_est / dx;
            t = t.clamp(0.0, 1.0);
            if x_est.abs() < 1e-10 {
                break;
            }
        }

        self.sample_y(t)
    }

    // Common easing presets
    pub const LINEAR: Self = Self::new(0.0, 0.0, 1.0, 1.0);
    pub const EASE: Self = Self::new(0.25, 0.1, 0.25, 1.0);
    pub const EASE_IN_OUT: Self = Self::new(0.42, 0.0, 0.58, 1.0);
}

/// How to interpolate between keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum EasingCurve {
    /// No interpolation: hold the value until the next keyframe.
    Hold,
    /// Linear interpolation.
    #[default]
    Linear,
    /// Cubic Bézier easing.
    Bezier(CubicBezier),
}

// ── Keyframe ────────────────────────────────────────────────────

/// A single keyframe at a frame number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub frame: f64,
    pub value: f64,
    /// Easing curve to use when interpolating TO the next keyframe.
    pub easing: EasingCurve,
}

impl Keyframe {
    pub fn new(frame: f64, value: f64) -> Self {
        Self {
            frame,
            value,
            easing: EasingCurve::Linear,
        }
    }

    pub fn with_easing(frame: f64, value: f64, easing: EasingCurve) -> Self {
        Self {
            frame,
            value,
            easing,
        }
    }
}

// ── Keyframe track ──────────────────────────────────────────────

/// An animated scalar parameter.
///
/// Keyframes are kept sorted by frame. Interpolation between keyframes
/// uses the easing curve of the earlier keyframe; outside the keyed range
/// the nearest value is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeTrack {
    /// Human-readable parameter name.
    pub name: String,
    keyframes: Vec<Keyframe>,
}

impl KeyframeTrack {
    /// Create a new empty keyframe track. Evaluates to 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyframes: Vec::new(),
        }
    }

    /// Create a track with a constant value (single keyframe at frame 0).
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        let mut track = Self::new(name);
        track.set(0.0, value, EasingCurve::Hold);
        track
    }

    /// Insert or update a keyframe. Maintains sorted order.
    pub fn set(&mut self, frame: f64, value: f64, easing: EasingCurve) {
        if let Some(kf) = self.keyframes.iter_mut().find(|kf| kf.frame == frame) {
            kf.value = value;
            kf.easing = easing;
            return;
        }
        let pos = self.keyframes.partition_point(|kf| kf.frame < frame);
        self.keyframes
            .insert(pos, Keyframe::with_easing(frame, value, easing));
    }

    /// Replace the whole curve by a single constant value.
    pub fn set_constant(&mut self, value: f64) {
        self.keyframes.clear();
        self.keyframes
            .push(Keyframe::with_easing(0.0, value, EasingCurve::Hold));
    }

    /// Remove the keyframe at the given frame.
    pub fn remove(&mut self, frame: f64) -> bool {
        if let Some(pos) = self.keyframes.iter().position(|kf| kf.frame == frame) {
            self.keyframes.remove(pos);
            true
        } else {
            false
        }
    }

    /// Evaluate the curve at a frame.
    pub fn evaluate(&self, frame: f64) -> f64 {
        let (first, last) = match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        if frame <= first.frame {
            return first.value;
        }
        if frame >= last.frame {
            return last.value;
        }
        let idx = self
            .keyframes
            .partition_point(|kf| kf.frame <= frame)
            .saturating_sub(1);
        Self::interpolate(&self.keyframes[idx], &self.keyframes[idx + 1], frame)
    }

    /// Evaluate at an integer frame, narrowed to `f32`.
    #[inline]
    pub fn value_at(&self, frame: i32) -> f32 {
        self.evaluate(frame as f64) as f32
    }

    fn interpolate(a: &Keyframe, b: &Keyframe, frame: f64) -> f64 {
        let span = b.frame - a.frame;
        if span <= 0.0 {
            return a.value;
        }

        let t = ((frame - a.frame) / span).clamp(0.0, 1.0);

        match a.easing {
            EasingCurve::Hold => a.value,
            EasingCurve::Linear => a.value + (b.value - a.value) * t,
            EasingCurve::Bezier(bezier) => {
                let eased_t = bezier.evaluate(t);
                a.value + (b.value - a.value) * eased_t
            }
        }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Whether this track is animated (has more than one keyframe).
    pub fn is_animated(&self) -> bool {
        self.keyframes.len() > 1
    }

    /// First and last keyed frame.
    pub fn frame_range(&self) -> Option<(f64, f64)> {
        Some((self.keyframes.first()?.frame, self.keyframes.last()?.frame))
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_interpolation() {
        let mut track = KeyframeTrack::new("weight");
        track.set(10.0, 0.0, EasingCurve::Linear);
        track.set(20.0, 1.0, EasingCurve::Linear);

        assert!((track.evaluate(10.0) - 0.0).abs() < 0.001);
        assert!((track.evaluate(15.0) - 0.5).abs() < 0.001);
        assert!((track.value_at(20) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_hold_interpolation() {
        let mut track = KeyframeTrack::new("influence");
        track.set(0.0, 0.0, EasingCurve::Hold);
        track.set(8.0, 1.0, EasingCurve::Hold);

        assert!((track.evaluate(4.0) - 0.0).abs() < 0.001);
        assert!((track.evaluate(8.0) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_bezier_ease_in_out() {
        let mut track = KeyframeTrack::new("target_rotation");
        track.set(0.0, 0.0, EasingCurve::Bezier(CubicBezier::EASE_IN_OUT));
        track.set(100.0, 100.0, EasingCurve::Linear);

        let mid = track.evaluate(50.0);
        assert!((mid - 50.0).abs() < 5.0);
        assert!(track.evaluate(10.0) < 10.0);
    }

    #[test]
    fn test_cubic_bezier_linear() {
        let bezier = CubicBezier::LINEAR;
        for i in 0..=10 {
            let x = i as f64 / 10.0;
            let y = bezier.evaluate(x);
            assert!((y - x).abs() < 0.001, "linear bezier at x={}: got y={}", x, y);
        }
    }

    #[test]
    fn test_keyframe_track_clamp_edges() {
        let mut track = KeyframeTrack::new("test");
        track.set(1.0, 10.0, EasingCurve::Linear);
        track.set(3.0, 30.0, EasingCurve::Linear);

        assert!((track.evaluate(0.0) - 10.0).abs() < 0.001);
        assert!((track.evaluate(5.0) - 30.0).abs() < 0.001);
        assert_eq!(track.frame_range(), Some((1.0, 3.0)));
    }

    #[test]
    fn test_keyframe_overwrite_and_remove() {
        let mut track = KeyframeTrack::new("test");
        track.set(0.0, 0.0, EasingCurve::Linear);
        track.set(0.0, 5.0, EasingCurve::Hold);
        track.set(4.0, 1.0, EasingCurve::Linear);
        assert_eq!(track.len(), 2);
        assert!((track.evaluate(0.0) - 5.0).abs() < 0.001);

        assert!(track.remove(4.0));
        assert!(!track.remove(7.0));
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_constant_track() {
        let mut track = KeyframeTrack::constant("weight", 1.5);
        assert!(!track.is_animated());
        assert!((track.evaluate(100.0) - 1.5).abs() < 0.001);

        track.set(10.0, 0.0, EasingCurve::Linear);
        track.set_constant(0.25);
        assert_eq!(track.len(), 1);
        assert!((track.value_at(-3) - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_empty_track_is_zero() {
        let track = KeyframeTrack::new("empty");
        assert_eq!(track.evaluate(3.0), 0.0);
        assert!(track.frame_range().is_none());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn linear_curves_stay_within_key_bounds(
                keys in proptest::collection::vec((-500i32..500, -10.0f64..10.0), 1..12),
                frame in -600.0f64..600.0,
            ) {
                let mut track = KeyframeTrack::new("prop");
                for (f, v) in &keys {
                    track.set(*f as f64, *v, EasingCurve::Linear);
                }
                let lo = track.keyframes().iter().map(|k| k.value).fold(f64::INFINITY, f64::min);
                let hi = track.keyframes().iter().map(|k| k.value).fold(f64::NEG_INFINITY, f64::max);
                let v = track.evaluate(frame);
                prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
                prop_assert!(track.keyframes().windows(2).all(|w| w[0].frame < w[1].frame));
            }
        }
    }
}
