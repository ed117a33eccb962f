//! Motrack Tracking - Feature tracking, camera solving and stabilization
//!
//! Implements the tracking engine on top of motrack-core:
//! - Point tracks with frame-sorted marker histories, and plane tracks
//! - Region tracking through a frame source, one rayon step per frame
//! - Plane propagation via homographies of point-track motion
//! - Camera and object solving through a bundle adjuster
//! - 2D stabilization transforms and autoscale
//! - Background jobs with cancellation and progress events

pub mod backend;
pub mod camera;
pub mod camera_solver;
pub mod clipboard;
pub mod coords;
pub mod document;
pub mod dopesheet;
pub mod frame_source;
pub mod image;
pub mod job;
pub mod marker;
pub mod mask;
pub mod object;
pub mod plane_track;
pub mod plane_tracker;
pub mod region_tracker;
pub mod serialization;
pub mod settings;
pub mod stabilize;
pub mod track;
pub mod tracks_map;

pub use backend::{
    BundleAdjuster, DltHomographySolver, HomographySolver, LinearBundleAdjuster, LucasKanadeAligner,
    PatchAligner, TrackDirection, UnavailableAligner, UnavailableBundleAdjuster,
    UnavailableHomographySolver,
};
pub use camera::{CameraIntrinsics, CameraUnits, DistortionModel};
pub use camera_solver::{ReconstructionContext, SolveReport};
pub use clipboard::TrackClipboard;
pub use document::{SharedTracking, Tracking};
pub use dopesheet::{
    ChannelSort, Coverage, CoverageSegment, Dopesheet, DopesheetChannel, DopesheetOptions,
    FrameCoverage,
};
pub use frame_source::{FrameSequence, FrameSource};
pub use job::{
    spawn_camera_solve, spawn_region_tracking, CancelToken, JobEvent, JobHandle,
    RegionTrackingRequest, TrackingSummary,
};
pub use marker::{ClampEvent, Marker, MarkerState, PlaneMarker};
pub use mask::MaskStrokes;
pub use object::{Reconstruction, ReconstructedCamera, TrackingObject};
pub use plane_track::{PlaneTrack, PlaneTrackId};
pub use region_tracker::RegionTrackContext;
pub use serialization::TrackingFile;
pub use settings::{RefineFlags, SolverSettings, StabilizationSettings, TrackingSettings};
pub use stabilize::{stabilization_matrix, StabilizationData, Stabilizer};
pub use track::{MotionModel, PatternMatch, Track, TrackId};
pub use tracks_map::TracksMap;
