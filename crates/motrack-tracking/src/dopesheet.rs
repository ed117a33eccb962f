//! Dopesheet data: one channel per track with its tracked segments, and
//! per-frame track coverage used to spot frames the solver will struggle with.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::object::TrackingObject;
use crate::track::{Segment, Track, TrackId};

/// Fewer tracks than this on a frame is not enough to solve it.
pub const COVERAGE_BAD_BELOW: usize = 8;
/// Fewer tracks than this is workable but weak.
pub const COVERAGE_ACCEPTABLE_BELOW: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    Bad,
    Acceptable,
    Ok,
}

impl Coverage {
    pub fn from_count(count: usize) -> Self {
        if count < COVERAGE_BAD_BELOW {
            Self::Bad
        } else if count < COVERAGE_ACCEPTABLE_BELOW {
            Self::Acceptable
        } else {
            Self::Ok
        }
    }
}

/// Run of frames sharing one coverage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageSegment {
    pub start: i32,
    pub end: i32,
    pub coverage: Coverage,
}

/// Enabled-marker counts per frame over the object's frame range.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCoverage {
    pub start: i32,
    pub counts: Vec<usize>,
}

impl FrameCoverage {
    pub fn compute(object: &TrackingObject) -> Option<Self> {
        let (start, end) = object
            .tracks
            .iter()
            .filter_map(|t| t.frame_range())
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))?;

        let mut counts = vec![0usize; (end - start + 1) as usize];
        for track in &object.tracks {
            for marker in track.markers().iter().filter(|m| m.is_enabled()) {
                counts[(marker.frame - start) as usize] += 1;
            }
        }
        Some(Self { start, counts })
    }

    pub fn count(&self, frame: i32) -> usize {
        usize::try_from(frame - self.start)
            .ok()
            .and_then(|i| self.counts.get(i).copied())
            .unwrap_or(0)
    }

    /// Coverage runs. Empty first and last frames count as fine, they are
    /// just where tracks were bracketed with disabled markers.
    pub fn segments(&self) -> Vec<CoverageSegment> {
        let last = self.counts.len().saturating_sub(1);
        let mut out: Vec<CoverageSegment> = Vec::new();
        for (i, &count) in self.counts.iter().enumerate() {
            let frame = self.start + i as i32;
            let coverage = if count == 0 && (i == 0 || i == last) {
                Coverage::Ok
            } else {
                Coverage::from_count(count)
            };
            match out.last_mut() {
                Some(seg) if seg.coverage == coverage => seg.end = frame,
                _ => out.push(CoverageSegment {
                    start: frame,
                    end: frame,
                    coverage,
                }),
            }
        }
        out
    }
}

// ── Channels ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelSort {
    #[default]
    Name,
    /// Longest continuously tracked segment.
    Longest,
    /// Total tracked frames.
    Total,
    AverageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DopesheetOptions {
    pub sort: ChannelSort,
    /// Reverse the sort order.
    pub inverse: bool,
    pub selected_only: bool,
    pub show_hidden: bool,
}

/// One track's row in the dopesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct DopesheetChannel {
    pub track: TrackId,
    /// Track name, with the solve error appended once the object is reconstructed.
    pub label: String,
    pub name: String,
    pub segments: Vec<Segment>,
    pub total_frames: i32,
    pub longest_segment: i32,
    pub error: f32,
}

impl DopesheetChannel {
    pub fn new(track: &Track, reconstructed: bool) -> Self {
        let segments = track.segments();
        let total_frames = segments.iter().map(Segment::len).sum();
        let longest_segment = segments.iter().map(Segment::len).max().unwrap_or(0);
        let label = if reconstructed {
            format!("{} ({:.4})", track.name, track.error)
        } else {
            track.name.clone()
        };
        Self {
            track: track.id,
            label,
            name: track.name.clone(),
            segments,
            total_frames,
            longest_segment,
            error: track.error,
        }
    }

    fn compare(&self, other: &Self, method: ChannelSort) -> Ordering {
        match method {
            ChannelSort::Name => self.name.to_lowercase().cmp(&other.name.to_lowercase()),
            ChannelSort::Longest => self.longest_segment.cmp(&other.longest_segment),
            ChannelSort::Total => self.total_frames.cmp(&other.total_frames),
            ChannelSort::AverageError => self.error.total_cmp(&other.error),
        }
    }
}

/// Channels and coverage of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Dopesheet {
    pub channels: Vec<DopesheetChannel>,
    pub coverage: Option<FrameCoverage>,
}

impl Dopesheet {
    pub fn build(object: &TrackingObject, options: &DopesheetOptions) -> Self {
        let reconstructed = object.reconstruction.reconstructed;
        let channels = object
            .tracks
            .iter()
            .filter(|t| options.show_hidden || !t.flags.hidden)
            .filter(|t| !options.selected_only || t.flags.selected)
            .map(|t| DopesheetChannel::new(t, reconstructed))
            .collect();

        let mut dopesheet = Self {
            channels,
            coverage: FrameCoverage::compute(object),
        };
        dopesheet.sort(options.sort, options.inverse);
        dopesheet
    }

    /// Stable sort, ascending unless `inverse`. Ties keep track order.
    pub fn sort(&mut self, method: ChannelSort, inverse: bool) {
        self.channels.sort_by(|a, b| {
            let order = a.compare(b, method);
            if inverse {
                order.reverse()
            } else {
                order
            }
        });
    }

    pub fn channel(&self, track: TrackId) -> Option<&DopesheetChannel> {
        self.channels.iter().find(|c| c.track == track)
    }
}
