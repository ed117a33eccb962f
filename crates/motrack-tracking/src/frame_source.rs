//! Access to decoded clip frames.

use std::collections::BTreeMap;
use std::sync::Arc;

use motrack_core::{FrameBuffer, MotrackError, Result, SharedFrameBuffer};

/// Supplies decoded frames to trackers. Decoding and caching live behind it.
pub trait FrameSource: Send + Sync {
    fn frame(&self, frame: i32) -> Result<SharedFrameBuffer>;

    /// Inclusive range of frames this source can provide.
    fn frame_range(&self) -> (i32, i32);

    /// Pixel dimensions shared by every frame.
    fn size(&self) -> (u32, u32);

    fn contains(&self, frame: i32) -> bool {
        let (start, end) = self.frame_range();
        (start..=end).contains(&frame)
    }
}

/// Frames held in memory, keyed by frame number.
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: BTreeMap<i32, SharedFrameBuffer>,
    size: (u32, u32),
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive frames starting at `first`.
    pub fn from_frames(first: i32, frames: impl IntoIterator<Item = FrameBuffer>) -> Result<Self> {
        let mut seq = Self::new();
        for (i, frame) in frames.into_iter().enumerate() {
            seq.insert(first + i as i32, frame)?;
        }
        Ok(seq)
    }

    /// Add or replace a frame. Every frame must share the size of the first.
    pub fn insert(&mut self, number: i32, frame: FrameBuffer) -> Result<()> {
        if self.frames.is_empty() {
            self.size = (frame.width, frame.height);
        } else if (frame.width, frame.height) != self.size {
            return Err(MotrackError::InvalidParameter(format!(
                "frame {} is {}x{}, sequence is {}x{}",
                number, frame.width, frame.height, self.size.0, self.size.1
            )));
        }
        self.frames.insert(number, Arc::new(frame));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for FrameSequence {
    fn frame(&self, frame: i32) -> Result<SharedFrameBuffer> {
        self.frames
            .get(&frame)
            .cloned()
            .ok_or(MotrackError::FrameUnavailable(frame))
    }

    fn frame_range(&self) -> (i32, i32) {
        match (self.frames.keys().next(), self.frames.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => (0, -1),
        }
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }
}
