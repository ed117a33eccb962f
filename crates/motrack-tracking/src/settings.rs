//! Tunable defaults for tracking, solving and stabilization.
//!
//! Every struct here is plain serde data with a `Default` impl; documents
//! carry their own copy so a saved project keeps its tuning.

use motrack_core::KeyframeTrack;
use serde::{Deserialize, Serialize};

use crate::track::{MotionModel, PatternMatch, TrackerFlags};

/// Defaults applied to newly created tracks, plus region tracker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub default_motion_model: MotionModel,
    pub default_pattern_match: PatternMatch,
    pub default_algorithm: TrackerFlags,
    pub default_minimum_correlation: f32,
    /// Pattern size in pixels.
    pub default_pattern_size: u32,
    /// Search area size in pixels.
    pub default_search_size: u32,
    /// Margin to the frame border in pixels.
    pub default_margin: i32,
    /// Maximum frames tracked per run, 0 for unlimited.
    pub default_frames_limit: i32,
    pub default_weight: f32,
    /// Iteration cap handed to the patch aligner.
    pub region_iterations: u32,
    /// Gaussian pre-blur applied to both patches.
    pub region_sigma: f64,
    pub solver: SolverSettings,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            default_motion_model: MotionModel::Translation,
            default_pattern_match: PatternMatch::Keyframe,
            default_algorithm: TrackerFlags::default(),
            default_minimum_correlation: 0.75,
            default_pattern_size: 21,
            default_search_size: 71,
            default_margin: 0,
            default_frames_limit: 0,
            default_weight: 1.0,
            region_iterations: 50,
            region_sigma: 0.9,
            solver: SolverSettings::default(),
        }
    }
}

/// Intrinsics the bundle adjuster may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefineFlags {
    pub focal_length: bool,
    pub principal_point: bool,
    pub radial_distortion: bool,
    pub tangential_distortion: bool,
}

impl RefineFlags {
    pub const NONE: Self = Self {
        focal_length: false,
        principal_point: false,
        radial_distortion: false,
        tangential_distortion: false,
    };

    pub fn any(&self) -> bool {
        self.focal_length || self.principal_point || self.radial_distortion || self.tangential_distortion
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Let the solver pick the two initialization keyframes.
    pub auto_keyframes: bool,
    /// Tripod solve: camera rotates about a fixed point, no bundles at depth.
    pub tripod: bool,
    pub refine: RefineFlags,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            auto_keyframes: false,
            tripod: false,
            refine: RefineFlags::NONE,
        }
    }
}

/// 2D stabilization configuration.
///
/// Influences and targets are animation curves evaluated per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationSettings {
    pub enabled: bool,
    /// Frame at which the compensation is zero.
    pub anchor_frame: i32,
    pub stabilize_rotation: bool,
    pub stabilize_scale: bool,
    pub autoscale: bool,
    /// Upper bound for autoscale.
    pub max_scale: f32,
    /// Scale currently applied; written by autoscale.
    pub scale: f32,
    pub location_influence: KeyframeTrack,
    pub rotation_influence: KeyframeTrack,
    pub scale_influence: KeyframeTrack,
    /// Expected position of the stabilized footage, unified offsets.
    pub target_x: KeyframeTrack,
    pub target_y: KeyframeTrack,
    /// Expected rotation in radians.
    pub target_rotation: KeyframeTrack,
    /// Expected zoom factor.
    pub target_scale: KeyframeTrack,
    /// Damps scale measurements of tracks close to the pivot.
    pub scale_error_bias: f32,
    /// Track or summed weights at or below this count as no data.
    pub min_weight: f32,
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            anchor_frame: 1,
            stabilize_rotation: false,
            stabilize_scale: false,
            autoscale: false,
            max_scale: 2.0,
            scale: 1.0,
            location_influence: KeyframeTrack::constant("location_influence", 1.0),
            rotation_influence: KeyframeTrack::constant("rotation_influence", 1.0),
            scale_influence: KeyframeTrack::constant("scale_influence", 1.0),
            target_x: KeyframeTrack::constant("target_x", 0.0),
            target_y: KeyframeTrack::constant("target_y", 0.0),
            target_rotation: KeyframeTrack::constant("target_rotation", 0.0),
            target_scale: KeyframeTrack::constant("target_scale", 1.0),
            scale_error_bias: 0.01,
            min_weight: 0.005,
        }
    }
}
