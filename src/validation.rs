//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that materialized images
//! contain expected test patterns. Useful for integration testing with the
//! mock backend and with virtual cameras.

use crate::acquisition::FrameHandle;
use crate::convert::rgb_to_yuv;
use crate::error::{CameraError, Result};
use crate::image::CanonicalImage;
use crate::pixel_format::SampleType;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
pub const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Read a pixel as 8-bit RGB. Mono images report gray.
fn rgb_at(image: &CanonicalImage, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    let divisor = match image.sample {
        SampleType::U8 => 1.0,
        SampleType::U16 => f64::from(1u32 << image.bit_depth.saturating_sub(8)),
        SampleType::F32 => return None,
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let channel = |index: u8| -> Option<u8> {
        image
            .sample_at(x, y, index)
            .map(|value| (value / divisor).round().clamp(0.0, 255.0) as u8)
    };

    match image.channels {
        1 => channel(0).map(|gray| (gray, gray, gray)),
        3 => Some((channel(2)?, channel(1)?, channel(0)?)),
        _ => None,
    }
}

/// Validates that an image contains the SMPTE color bar pattern.
///
/// Samples 8 vertical stripes at their center positions. Color images must
/// match each bar within a tolerance; mono images must match its luminance.
///
/// # Errors
///
/// Returns `Stream` if a pixel cannot be read or any bar doesn't match.
pub fn validate_color_bars(image: &CanonicalImage) -> Result<()> {
    let bar_width = image.width / 8;
    let center_y = image.height / 2;

    for (bar_idx, &(r, g, b)) in SMPTE_COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let actual_rgb = rgb_at(image, sample_x, center_y).ok_or_else(|| {
            CameraError::Stream(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        let expected_rgb = if image.channels == 1 {
            let [gray, _, _] = rgb_to_yuv(r, g, b);
            (gray, gray, gray)
        } else {
            (r, g, b)
        };

        if !colors_match(actual_rgb, expected_rgb, COLOR_TOLERANCE) {
            return Err(CameraError::Stream(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that an image contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the image and checks that the
/// luminance increases monotonically from left to right, with a significant
/// overall change.
///
/// # Errors
///
/// Returns `Stream` if the luminance decreases or barely changes.
pub fn validate_gradient(image: &CanonicalImage) -> Result<()> {
    let center_y = image.height / 2;
    let sample_step = (image.width / 64).max(1);

    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..image.width).step_by(sample_step as usize) {
        let (r, g, b) = rgb_at(image, x, center_y).ok_or_else(|| {
            CameraError::Stream(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                return Err(CameraError::Stream(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        first_luminance.get_or_insert(luminance);
        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::Stream(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frames were surfaced in acquisition order.
///
/// Sequence numbers must strictly increase. Gaps are allowed since the
/// single-slot buffer drops frames a slow consumer never saw. Timestamps
/// must not go backwards.
///
/// # Errors
///
/// Returns `Stream` if the slice is empty or out of order.
pub fn validate_frame_order(frames: &[FrameHandle]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::Stream(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            if curr.sequence <= prev.sequence {
                return Err(CameraError::Stream(format!(
                    "Frame {} not newer than its predecessor: sequence {} after {}",
                    index + 1,
                    curr.sequence,
                    prev.sequence
                )));
            }
            if curr.timestamp < prev.timestamp {
                return Err(CameraError::Stream(format!(
                    "Frame {} timestamp {:?} precedes {:?}",
                    index + 1,
                    curr.timestamp,
                    prev.timestamp
                )));
            }
        }
    }

    Ok(())
}

/// Whether two RGB colors match within `tolerance` per channel.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::image::materialize;
    use crate::mock::{encode_scene, TestPattern};
    use crate::params::Binning;
    use crate::pixel_format::{FormatCode, PixelFormat};
    use crate::traits::{FrameMetadata, RawFrame};

    fn image(format: PixelFormat, pattern: TestPattern) -> CanonicalImage {
        let (width, height) = (640, 480);
        let frame = RawFrame {
            data: encode_scene(format, width, height, pattern),
            width,
            height,
            format: format.into(),
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 0,
            },
        };
        materialize(&frame, Binning::NONE).expect("materialize failed")
    }

    fn handle(sequence: u64, millis: u64) -> FrameHandle {
        FrameHandle {
            sequence,
            width: 640,
            height: 480,
            format: FormatCode(PixelFormat::Mono8.code()),
            byte_len: 640 * 480,
            timestamp: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_validate_color_bars_success() {
        let image = image(PixelFormat::Yuv422, TestPattern::ColorBars);
        let result = validate_color_bars(&image);
        assert!(
            result.is_ok(),
            "Color bars validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_color_bars_mono() {
        let image = image(PixelFormat::Mono8, TestPattern::ColorBars);
        let result = validate_color_bars(&image);
        assert!(result.is_ok(), "Mono color bars should match luminance: {result:?}");
    }

    #[test]
    fn test_validate_color_bars_wrong_pattern() {
        let image = image(PixelFormat::Bgr8, TestPattern::Gradient);
        let result = validate_color_bars(&image);
        assert!(
            result.is_err(),
            "Color bars validation should fail for gradient pattern"
        );
    }

    #[test]
    fn test_validate_gradient_success() {
        let image = image(PixelFormat::Yuv422, TestPattern::Gradient);
        let result = validate_gradient(&image);
        assert!(
            result.is_ok(),
            "Gradient validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_gradient_wrong_pattern() {
        let image = image(PixelFormat::Yuv422, TestPattern::Solid(128, 128, 128));
        let result = validate_gradient(&image);
        assert!(
            result.is_err(),
            "Gradient validation should fail for solid pattern"
        );
    }

    #[test]
    fn test_validate_frame_order_success() {
        let frames = [handle(1, 0), handle(2, 33), handle(5, 133)];
        let result = validate_frame_order(&frames);
        assert!(result.is_ok(), "Frame order validation should succeed: {result:?}");
    }

    #[test]
    fn test_validate_frame_order_empty() {
        let result = validate_frame_order(&[]);
        assert!(
            result.is_err(),
            "Frame order validation should fail for empty sequence"
        );
    }

    #[test]
    fn test_validate_frame_order_repeated_frame() {
        let frames = [handle(1, 0), handle(2, 33), handle(2, 33)];
        assert!(validate_frame_order(&frames).is_err());
    }

    #[test]
    fn test_colors_match_exact() {
        assert!(colors_match((100, 150, 200), (100, 150, 200), 10));
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match((100, 150, 200), (105, 155, 205), 10));
    }

    #[test]
    fn test_colors_match_outside_tolerance() {
        assert!(!colors_match((100, 150, 200), (120, 150, 200), 10));
    }
}
