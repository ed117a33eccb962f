//! Numerical backends behind traits.
//!
//! Each concern has a production implementation and an `Unavailable*` stub
//! that fails with [`MotrackError::BackendUnavailable`], for builds or tests
//! that run without the vision solvers.

pub mod aligner;
pub mod bundle;
pub mod homography;
pub mod unavailable;

use glam::{DMat3, DVec2, DVec3};
use motrack_core::{MotrackError, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::CameraIntrinsics;
use crate::image::GrayImage;
use crate::mask::FloatMask;
use crate::settings::RefineFlags;
use crate::track::MotionModel;

pub use aligner::LucasKanadeAligner;
pub use bundle::LinearBundleAdjuster;
pub use homography::DltHomographySolver;
pub use unavailable::{UnavailableAligner, UnavailableBundleAdjuster, UnavailableHomographySolver};

/// Direction a tracker walks through the clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackDirection {
    #[default]
    Forward,
    Backward,
}

impl TrackDirection {
    /// Frame increment for one step.
    #[inline]
    pub fn step(self) -> i32 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }

    #[inline]
    pub fn is_backward(self) -> bool {
        self == Self::Backward
    }
}

// ── Patch alignment ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RegionTrackOptions {
    pub direction: TrackDirection,
    pub motion_model: MotionModel,
    /// Integer translation search before refinement.
    pub use_brute: bool,
    /// Compare patches after removing gain and bias.
    pub use_normalization: bool,
    pub minimum_correlation: f64,
    pub num_iterations: u32,
    /// Pre-blur applied to both images.
    pub sigma: f64,
}

/// One alignment problem. Coordinates are the pattern corners followed by
/// the center, in the pixel space of the respective image.
#[derive(Debug, Clone, Copy)]
pub struct RegionTrackRequest<'a> {
    pub reference: &'a GrayImage,
    pub destination: &'a GrayImage,
    /// Per-pixel weights over the reference image.
    pub mask: Option<&'a FloatMask>,
    pub reference_coords: &'a [DVec2; 5],
    pub guess_coords: &'a [DVec2; 5],
    pub options: &'a RegionTrackOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionTrackResult {
    pub coords: [DVec2; 5],
    pub correlation: f64,
    pub iterations: u32,
}

/// Why a single pattern could not be followed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignError {
    #[error("pattern has no texture to track")]
    NoTexture,
    #[error("correlation {correlation:.3} is below the minimum {minimum:.3}")]
    LowCorrelation { correlation: f64, minimum: f64 },
    #[error("pattern left the search area")]
    OutOfBounds,
    #[error("refinement produced a degenerate pattern")]
    Degenerate,
}

impl From<AlignError> for MotrackError {
    fn from(err: AlignError) -> Self {
        MotrackError::TrackingFailed(err.to_string())
    }
}

/// Follows a pattern from a reference image into a destination image.
pub trait PatchAligner: Send + Sync {
    /// `Err(TrackingFailed)` means this pattern was lost; any other error
    /// means the aligner itself can't run.
    fn track_region(&self, request: &RegionTrackRequest<'_>) -> Result<RegionTrackResult>;
}

// ── Homography estimation ───────────────────────────────────────

/// Estimates `H` with `x2 ~ H x1` from point pairs.
pub trait HomographySolver: Send + Sync {
    fn solve(&self, x1: &[DVec2], x2: &[DVec2]) -> Result<DMat3>;
}

// ── Bundle adjustment ───────────────────────────────────────────

/// One 2D observation of a track, in pixels with the vertical axis scaled by
/// the pixel aspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub frame: i32,
    pub track: usize,
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct BundleProblem<'a> {
    pub observations: &'a [Observation],
    pub intrinsics: CameraIntrinsics,
    pub width: u32,
    pub height: u32,
    pub keyframe1: i32,
    pub keyframe2: i32,
    pub select_keyframes: bool,
    /// Rotation-only solve.
    pub tripod: bool,
    pub refine: RefineFlags,
}

/// World-to-camera pose, `x_cam = rotation * x_world + translation`, with
/// the camera looking down +Z and image y pointing down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedCamera {
    pub frame: i32,
    pub rotation: DMat3,
    pub translation: DVec3,
    /// RMS reprojection error, pixels.
    pub error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedPoint {
    pub track: usize,
    pub position: DVec3,
    pub error: f64,
}

#[derive(Debug, Clone)]
pub struct BundleSolution {
    pub cameras: Vec<SolvedCamera>,
    pub points: Vec<SolvedPoint>,
    pub intrinsics: CameraIntrinsics,
    pub keyframe1: i32,
    pub keyframe2: i32,
    pub error: f64,
    pub is_valid: bool,
}

/// Progress callback: fraction done and a short status message.
pub type SolveProgress<'a> = &'a mut dyn FnMut(f32, &str);

/// Recovers camera motion and 3D points from tracks.
pub trait BundleAdjuster: Send + Sync {
    fn solve(&self, problem: &BundleProblem<'_>, progress: SolveProgress<'_>) -> Result<BundleSolution>;
}
