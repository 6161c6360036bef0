//! Canonical images and the materializer that produces them.

use crate::convert::{check_dimensions, convert};
use crate::error::{CameraError, Result};
use crate::params::{Binning, BinningMode};
use crate::pixel_format::{lookup, SampleType};
use crate::traits::RawFrame;

/// Software-owned image in canonical layout.
///
/// Row-major, channels interleaved, little-endian samples. Color images are
/// in BGR order.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u8,
    /// Significant bits per sample.
    pub bit_depth: u8,
    /// Sample storage type.
    pub sample: SampleType,
    /// Pixel data.
    pub data: Vec<u8>,
}

impl CanonicalImage {
    /// Bytes per pixel.
    pub const fn pixel_stride(&self) -> usize {
        self.channels as usize * self.sample.size()
    }

    /// Bytes per row.
    pub const fn row_stride(&self) -> usize {
        self.width as usize * self.pixel_stride()
    }

    /// Raw bytes of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.row_stride() + x as usize * self.pixel_stride();
        self.data.get(offset..offset + self.pixel_stride())
    }

    /// Channel `channel` of the pixel at (`x`, `y`) as a float.
    pub fn sample_at(&self, x: u32, y: u32, channel: u8) -> Option<f64> {
        if channel >= self.channels {
            return None;
        }
        let pixel = self.pixel(x, y)?;
        let size = self.sample.size();
        let start = channel as usize * size;
        read_sample(pixel.get(start..start + size)?, self.sample)
    }

    /// Combine `binning.horizontal` x `binning.vertical` blocks into one pixel.
    ///
    /// Trailing rows and columns that do not fill a block are cropped. Summing
    /// 8-bit samples widens them to 16 bits; sums saturate.
    pub fn binned(&self, binning: Binning) -> Result<Self> {
        if !binning.is_active() {
            return Ok(self.clone());
        }

        let (block_w, block_h) = (binning.horizontal, binning.vertical);
        let (width, height) = (self.width / block_w, self.height / block_h);
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidDimensions {
                width: self.width,
                height: self.height,
                format: "binned image",
            });
        }

        let (sample, bit_depth) = match (binning.mode, self.sample) {
            (BinningMode::Sum, SampleType::U8 | SampleType::U16) => (SampleType::U16, 16),
            _ => (self.sample, self.bit_depth),
        };
        let count = f64::from(block_w * block_h);
        let mut data = Vec::with_capacity(
            width as usize * height as usize * self.channels as usize * sample.size(),
        );

        for y in 0..height {
            for x in 0..width {
                for channel in 0..self.channels {
                    let mut total = 0.0;
                    for dy in 0..block_h {
                        for dx in 0..block_w {
                            total += self
                                .sample_at(x * block_w + dx, y * block_h + dy, channel)
                                .unwrap_or(0.0);
                        }
                    }
                    let value = if binning.mode == BinningMode::Average {
                        total / count
                    } else {
                        total
                    };
                    write_sample(&mut data, value, sample);
                }
            }
        }

        Ok(Self {
            width,
            height,
            channels: self.channels,
            bit_depth,
            sample,
            data,
        })
    }
}

fn read_sample(bytes: &[u8], sample: SampleType) -> Option<f64> {
    match (sample, bytes) {
        (SampleType::U8, [value]) => Some(f64::from(*value)),
        (SampleType::U16, [lo, hi]) => Some(f64::from(u16::from_le_bytes([*lo, *hi]))),
        (SampleType::F32, [a, b, c, d]) => Some(f64::from(f32::from_le_bytes([*a, *b, *c, *d]))),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_sample(out: &mut Vec<u8>, value: f64, sample: SampleType) {
    match sample {
        SampleType::U8 => out.push(value.round().clamp(0.0, 255.0) as u8),
        SampleType::U16 => {
            out.extend_from_slice(&(value.round().clamp(0.0, 65535.0) as u16).to_le_bytes());
        }
        SampleType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
    }
}

/// Convert a raw frame into an owned canonical image.
///
/// The frame's declared format must have a catalog row, the buffer must hold
/// at least one full frame, and the dimensions must tile the conversion.
/// The output never shares memory with `frame`.
pub fn materialize(frame: &RawFrame, binning: Binning) -> Result<CanonicalImage> {
    let descriptor = lookup(frame.format)?;
    if frame.data.is_empty() {
        return Err(CameraError::EmptyBuffer);
    }
    check_dimensions(descriptor, frame.width, frame.height)?;

    let expected = descriptor.payload_size(frame.width, frame.height);
    let raw = frame
        .data
        .get(..expected)
        .ok_or(CameraError::BufferTooSmall {
            expected,
            actual: frame.data.len(),
        })?
        .to_vec();

    let image = CanonicalImage {
        width: frame.width,
        height: frame.height,
        channels: descriptor.output_channels(),
        bit_depth: descriptor.bit_depth,
        sample: descriptor.output_sample(),
        data: convert(descriptor, frame.width, frame.height, raw)?,
    };

    if binning.is_active() {
        image.binned(binning)
    } else {
        Ok(image)
    }
}
