//! Camera intrinsics and lens distortion models.
//!
//! Normalized coordinates are `(pixel - principal) / focal` in square-pixel
//! space; distortion models map between ideal and distorted normalized points.

use glam::DVec2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraUnits {
    Pixels,
    #[default]
    Millimeters,
}

/// Supported lens distortion models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistortionModel {
    /// Radial polynomial `1 + k1 r² + k2 r⁴ + k3 r⁶`.
    Polynomial { k1: f64, k2: f64, k3: f64 },
    /// Division model, divides by `1 + k1 r² + k2 r⁴`.
    Division { k1: f64, k2: f64 },
    /// Nuke classic model, defined in the undistortion direction.
    Nuke { k1: f64, k2: f64, p1: f64, p2: f64 },
    /// Brown-Conrady with four radial and two tangential terms.
    Brown {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
        p1: f64,
        p2: f64,
    },
}

impl Default for DistortionModel {
    fn default() -> Self {
        Self::Polynomial {
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
        }
    }
}

fn tangential(p: DVec2, r2: f64, p1: f64, p2: f64) -> DVec2 {
    DVec2::new(
        2.0 * p1 * p.x * p.y + p2 * (r2 + 2.0 * p.x * p.x),
        p1 * (r2 + 2.0 * p.y * p.y) + 2.0 * p2 * p.x * p.y,
    )
}

/// Solve `f(x) = target` by Newton iterations with a numeric Jacobian.
fn invert(f: impl Fn(DVec2) -> DVec2, target: DVec2) -> DVec2 {
    const H: f64 = 1e-7;
    let mut x = target;
    for _ in 0..20 {
        let r = f(x) - target;
        if r.length_squared() < 1e-24 {
            break;
        }
        let jx = (f(x + DVec2::new(H, 0.0)) - f(x)) / H;
        let jy = (f(x + DVec2::new(0.0, H)) - f(x)) / H;
        let det = jx.x * jy.y - jy.x * jx.y;
        if det.abs() < 1e-15 {
            break;
        }
        let step = DVec2::new(jy.y * r.x - jy.x * r.y, -jx.y * r.x + jx.x * r.y) / det;
        x -= step;
    }
    x
}

impl DistortionModel {
    /// True when the model leaves points untouched.
    pub fn is_identity(&self) -> bool {
        match *self {
            Self::Polynomial { k1, k2, k3 } => k1 == 0.0 && k2 == 0.0 && k3 == 0.0,
            Self::Division { k1, k2 } => k1 == 0.0 && k2 == 0.0,
            Self::Nuke { k1, k2, p1, p2 } => k1 == 0.0 && k2 == 0.0 && p1 == 0.0 && p2 == 0.0,
            Self::Brown {
                k1,
                k2,
                k3,
                k4,
                p1,
                p2,
            } => [k1, k2, k3, k4, p1, p2].iter().all(|k| *k == 0.0),
        }
    }

    /// Ideal normalized point to distorted normalized point.
    pub fn distort(&self, p: DVec2) -> DVec2 {
        let r2 = p.length_squared();
        match *self {
            Self::Polynomial { k1, k2, k3 } => p * (1.0 + r2 * (k1 + r2 * (k2 + r2 * k3))),
            Self::Division { k1, k2 } => {
                let d = 1.0 + r2 * (k1 + r2 * k2);
                if d.abs() < 1e-12 {
                    p
                } else {
                    p / d
                }
            }
            Self::Nuke { .. } => invert(|x| self.undistort_direct(x), p),
            Self::Brown {
                k1,
                k2,
                k3,
                k4,
                p1,
                p2,
            } => {
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * (k3 + r2 * k4)));
                p * radial + tangential(p, r2, p1, p2)
            }
        }
    }

    /// Distorted normalized point back to the ideal one.
    pub fn undistort(&self, p: DVec2) -> DVec2 {
        if self.is_identity() {
            return p;
        }
        match self {
            Self::Nuke { .. } => self.undistort_direct(p),
            _ => invert(|x| self.distort(x), p),
        }
    }

    /// Closed-form undistortion of the Nuke model.
    fn undistort_direct(&self, p: DVec2) -> DVec2 {
        match *self {
            Self::Nuke { k1, k2, p1, p2 } => {
                let r2 = p.length_squared();
                p * (1.0 + r2 * (k1 + r2 * k2)) + tangential(p, r2, p1, p2)
            }
            _ => p,
        }
    }
}

/// Calibration of the tracked camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraIntrinsics {
    pub sensor_width: f64,
    pub focal_mm: f64,
    /// Principal point offset in `[-1, 1]` across the frame; zero is the center.
    pub principal_point: DVec2,
    pub pixel_aspect: f64,
    pub units: CameraUnits,
    pub distortion: DistortionModel,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            sensor_width: 35.0,
            focal_mm: 35.0,
            principal_point: DVec2::ZERO,
            pixel_aspect: 1.0,
            units: CameraUnits::Millimeters,
            distortion: DistortionModel::default(),
        }
    }
}

impl CameraIntrinsics {
    /// Focal length in pixels for a frame `width` pixels wide.
    pub fn focal_px(&self, width: u32) -> f64 {
        self.focal_mm * width as f64 / self.sensor_width
    }

    pub fn set_focal_px(&mut self, focal: f64, width: u32) {
        if width > 0 {
            self.focal_mm = focal * self.sensor_width / width as f64;
        }
    }

    /// Principal point in frame pixels.
    pub fn principal_px(&self, width: u32, height: u32) -> DVec2 {
        (self.principal_point + 1.0) * 0.5 * DVec2::new(width as f64, height as f64)
    }

    pub fn set_principal_px(&mut self, principal: DVec2, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.principal_point = principal / DVec2::new(width as f64, height as f64) * 2.0 - 1.0;
        }
    }

    /// Pixel (vertical axis already scaled by pixel aspect) to normalized.
    pub fn normalize(&self, width: u32, height: u32, pixel: DVec2) -> DVec2 {
        let c = self.principal_px(width, height) * DVec2::new(1.0, self.pixel_aspect);
        (pixel - c) / self.focal_px(width)
    }

    pub fn denormalize(&self, width: u32, height: u32, normalized: DVec2) -> DVec2 {
        let c = self.principal_px(width, height) * DVec2::new(1.0, self.pixel_aspect);
        normalized * self.focal_px(width) + c
    }

    /// Remove lens distortion from a pixel position.
    pub fn undistort_pixel(&self, width: u32, height: u32, pixel: DVec2) -> DVec2 {
        let n = self.normalize(width, height, pixel);
        self.denormalize(width, height, self.distortion.undistort(n))
    }

    /// Apply lens distortion to an ideal pixel position.
    pub fn distort_pixel(&self, width: u32, height: u32, pixel: DVec2) -> DVec2 {
        let n = self.normalize(width, height, pixel);
        self.denormalize(width, height, self.distortion.distort(n))
    }
}
