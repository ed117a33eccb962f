//! Stand-ins for builds without the vision solvers.

use glam::{DMat3, DVec2};
use motrack_core::{MotrackError, Result};

use super::{
    BundleAdjuster, BundleProblem, BundleSolution, HomographySolver, PatchAligner,
    RegionTrackRequest, RegionTrackResult, SolveProgress,
};

fn unavailable(what: &str) -> MotrackError {
    MotrackError::BackendUnavailable(format!("{} is not available in this build", what))
}

#[derive(Debug, Clone, Default)]
pub struct UnavailableAligner;

impl PatchAligner for UnavailableAligner {
    fn track_region(&self, _request: &RegionTrackRequest<'_>) -> Result<RegionTrackResult> {
        Err(unavailable("Region tracking"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnavailableHomographySolver;

impl HomographySolver for UnavailableHomographySolver {
    fn solve(&self, _x1: &[DVec2], _x2: &[DVec2]) -> Result<DMat3> {
        Err(unavailable("Homography estimation"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnavailableBundleAdjuster;

impl BundleAdjuster for UnavailableBundleAdjuster {
    fn solve(&self, _problem: &BundleProblem<'_>, _progress: SolveProgress<'_>) -> Result<BundleSolution> {
        Err(unavailable("Camera solving"))
    }
}
