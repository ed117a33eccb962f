//! Grayscale float images used by the patch aligner.

use motrack_core::FrameBuffer;

use crate::track::TrackChannels;

/// Rec. 709 luminance weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// A grayscale image stored as f32 values, nominally [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl GrayImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0.0; (width * height) as usize],
            width,
            height,
        }
    }

    /// Pixel value with coordinates clamped to the image.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: f32) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = val;
        }
    }

    /// Bilinear sample; pixel centers sit at integer coordinates.
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;
        let (x0, y0) = (x0 as i32, y0 as i32);
        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x0 + 1, y0) * fx;
        let bottom = self.get(x0, y0 + 1) * (1.0 - fx) + self.get(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Luminance of a `width`×`height` region of `frame` starting at
    /// (`x0`, `y0`). Pixels outside the frame repeat the border.
    ///
    /// Disabled channels are left out and the remaining weights renormalized.
    pub fn from_frame_region(
        frame: &FrameBuffer,
        x0: i32,
        y0: i32,
        width: u32,
        height: u32,
        channels: &TrackChannels,
    ) -> Self {
        let mut weights = LUMA_WEIGHTS;
        let disabled = [channels.disable_red, channels.disable_green, channels.disable_blue];
        for (w, off) in weights.iter_mut().zip(disabled) {
            if off {
                *w = 0.0;
            }
        }
        let total: f32 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        }

        let mut img = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let px = frame.pixel(x0 + x as i32, y0 + y as i32);
                let luma = px[0] * weights[0] + px[1] * weights[1] + px[2] * weights[2];
                img.set(x, y, luma);
            }
        }
        img
    }

    pub fn from_frame(frame: &FrameBuffer, channels: &TrackChannels) -> Self {
        Self::from_frame_region(frame, 0, 0, frame.width, frame.height, channels)
    }

    /// Separable Gaussian blur. A non-positive sigma returns a copy.
    pub fn gaussian_blur(&self, sigma: f64) -> Self {
        if sigma <= 0.0 || self.data.is_empty() {
            return self.clone();
        }
        let kernel = gaussian_kernel(sigma);
        let radius = (kernel.len() / 2) as i32;

        let mut horizontal = Self::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let sum: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * self.get(x + k as i32 - radius, y))
                    .sum();
                horizontal.set(x as u32, y as u32, sum);
            }
        }

        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let sum: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * horizontal.get(x, y + k as i32 - radius))
                    .sum();
                out.set(x as u32, y as u32, sum);
            }
        }
        out
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / denom).exp() as f32)
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}
