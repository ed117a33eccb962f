//! Frame buffer types for clip frames in CPU memory.
//!
//! The tracker only ever reads whole frames, so a frame is a single packed
//! plane. Byte frames are normalized to `[0, 1]` on access.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{MotrackError, Result};

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (32 bits per pixel)
    #[default]
    Rgba8,
    /// 32-bit RGBA float (128 bits per pixel)
    RgbaF32,
    /// 32-bit single channel float
    GrayF32,
}

impl PixelFormat {
    /// Number of channels stored per pixel.
    pub fn channels(self) -> usize {
        match self {
            Self::Rgba8 | Self::RgbaF32 => 4,
            Self::GrayF32 => 1,
        }
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::RgbaF32 => 16,
            Self::GrayF32 => 4,
        }
    }
}

#[derive(Debug, Clone)]
enum PixelData {
    Byte(Vec<u8>),
    Float(Vec<f32>),
}

/// A decoded clip frame.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    data: PixelData,
}

impl FrameBuffer {
    /// Create a zeroed frame buffer with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.channels();
        let data = match format {
            PixelFormat::Rgba8 => PixelData::Byte(vec![0u8; len]),
            PixelFormat::RgbaF32 | PixelFormat::GrayF32 => PixelData::Float(vec![0.0; len]),
        };
        Self {
            format,
            width,
            height,
            data,
        }
    }

    /// Wrap packed RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::check_len(width, height, PixelFormat::Rgba8, data.len())?;
        Ok(Self {
            format: PixelFormat::Rgba8,
            width,
            height,
            data: PixelData::Byte(data),
        })
    }

    /// Wrap packed float samples of the given float format.
    pub fn from_f32(width: u32, height: u32, format: PixelFormat, data: Vec<f32>) -> Result<Self> {
        if format == PixelFormat::Rgba8 {
            return Err(MotrackError::InvalidParameter(
                "Float samples cannot back an 8-bit frame".into(),
            ));
        }
        Self::check_len(width, height, format, data.len())?;
        Ok(Self {
            format,
            width,
            height,
            data: PixelData::Float(data),
        })
    }

    fn check_len(width: u32, height: u32, format: PixelFormat, len: usize) -> Result<()> {
        let expected = width as usize * height as usize * format.channels();
        if len != expected {
            return Err(MotrackError::InvalidParameter(format!(
                "Frame {}x{} {:?} needs {} samples, got {}",
                width, height, format, expected, len
            )));
        }
        Ok(())
    }

    /// Total memory usage of this frame in bytes.
    pub fn memory_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// RGBA of a pixel, normalized to `[0, 1]`. Coordinates are clamped to the frame.
    pub fn pixel(&self, x: i32, y: i32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        let idx = y * self.width as usize + x;
        match &self.data {
            PixelData::Byte(bytes) => {
                let px: &[[u8; 4]] = bytemuck::cast_slice(bytes);
                px[idx].map(|c| c as f32 / 255.0)
            }
            PixelData::Float(samples) => match self.format {
                PixelFormat::GrayF32 => {
                    let v = samples[idx];
                    [v, v, v, 1.0]
                }
                _ => {
                    let px: &[[f32; 4]] = bytemuck::cast_slice(samples);
                    px[idx]
                }
            },
        }
    }

    /// Write a pixel from normalized RGBA. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        let format = self.format;
        match &mut self.data {
            PixelData::Byte(bytes) => {
                let px: &mut [[u8; 4]] = bytemuck::cast_slice_mut(bytes);
                px[idx] = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
            PixelData::Float(samples) => match format {
                PixelFormat::GrayF32 => {
                    samples[idx] = 0.2126 * rgba[0] + 0.7152 * rgba[1] + 0.0722 * rgba[2];
                }
                _ => {
                    let px: &mut [[f32; 4]] = bytemuck::cast_slice_mut(samples);
                    px[idx] = rgba;
                }
            },
        }
    }

    /// Raw bytes of an 8-bit frame.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            PixelData::Byte(bytes) => Some(bytes),
            PixelData::Float(_) => None,
        }
    }

    /// Raw samples of a float frame.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            PixelData::Float(samples) => Some(samples),
            PixelData::Byte(_) => None,
        }
    }

    /// Create a grayscale checkerboard frame, handy as textured test footage.
    pub fn checkerboard(width: u32, height: u32, cell: u32) -> Self {
        let mut frame = Self::new(width, height, PixelFormat::Rgba8);
        let cell = cell.max(1);
        for y in 0..height {
            for x in 0..width {
                let v = if ((x / cell) + (y / cell)) % 2 == 0 { 0.9 } else { 0.1 };
                frame.set_pixel(x, y, [v, v, v, 1.0]);
            }
        }
        frame
    }
}

/// Arc-wrapped frame buffer for shared ownership.
pub type SharedFrameBuffer = Arc<FrameBuffer>;
