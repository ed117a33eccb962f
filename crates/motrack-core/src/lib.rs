//! Motrack Core - Foundation types for the tracking engine
//!
//! This crate provides the fundamental types used throughout motrack:
//! - Error type shared by every crate
//! - Frame buffers and pixel formats
//! - Geometric primitives (rectangles, quads)
//! - Frame-keyed animation curves

pub mod error;
pub mod frame;
pub mod geometry;
pub mod keyframe;

pub use error::{MotrackError, Result};
pub use frame::{FrameBuffer, PixelFormat, SharedFrameBuffer};
pub use geometry::{Quad, Rect, Vec2};
pub use keyframe::{CubicBezier, EasingCurve, Keyframe, KeyframeTrack};
