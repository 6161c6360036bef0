//! Conversion operations from raw sensor layouts to canonical BGR/mono.
//!
//! Each [`Conversion`] tag maps to one pure function over an owned copy of
//! the frame bytes. Callers check the payload size and dimensions first.

use std::io::Cursor;

use bayer::{BayerDepth, Demosaic, RasterDepth, RasterMut, CFA};

use crate::error::{CameraError, Result};
use crate::pixel_format::{
    BayerPattern, Conversion, Packing, PixelFormatDescriptor, RgbPacking, YuvOrder,
};

/// Reject dimensions the descriptor's conversion cannot tile.
pub fn check_dimensions(descriptor: &PixelFormatDescriptor, width: u32, height: u32) -> Result<()> {
    let tiles = width > 0
        && height > 0
        && match descriptor.conversion {
            Conversion::Yuv422(_) => width % 2 == 0,
            Conversion::Yuv411 => width % 4 == 0,
            Conversion::Yuv420SemiPlanar => width % 2 == 0 && height % 2 == 0,
            Conversion::Debayer(_) => width >= 2 && height >= 2,
            _ => true,
        };

    if tiles {
        Ok(())
    } else {
        Err(CameraError::InvalidDimensions {
            width,
            height,
            format: descriptor.name,
        })
    }
}

/// Apply the descriptor's conversion to `raw`, which holds exactly one frame.
pub fn convert(
    descriptor: &PixelFormatDescriptor,
    width: u32,
    height: u32,
    mut raw: Vec<u8>,
) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let sample_size = descriptor.storage.sample.size();

    let data = match descriptor.conversion {
        Conversion::None => raw,
        Conversion::Unpack(packing) => unpack_mono(&raw, pixels, packing),
        Conversion::Debayer(pattern) => debayer(&raw, width, height, pattern)?,
        Conversion::SwapRedBlue => {
            swap_red_blue(&mut raw, 3, sample_size);
            raw
        }
        Conversion::PlanarToBgr => planar_to_bgr(&raw, pixels, sample_size),
        Conversion::DropAlpha { swap_red_blue } => drop_alpha(&raw, swap_red_blue),
        Conversion::UnpackRgb(packing) => unpack_rgb(&raw, pixels, packing),
        Conversion::Yuv422(order) => yuv422_to_bgr(&raw, order),
        Conversion::Yuv411 => yuv411_to_bgr(&raw),
        Conversion::Yuv444 => yuv444_to_bgr(&raw),
        Conversion::Yuv420SemiPlanar => yuv420sp_to_bgr(&raw, width as usize, height as usize),
    };

    Ok(data)
}

fn push_u16(out: &mut Vec<u8>, value: u32) {
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(value as u16).to_le_bytes());
}

fn byte_at(raw: &[u8], index: usize) -> u32 {
    raw.get(index).copied().map_or(0, u32::from)
}

/// Read `count` samples of `bits` width from an LSB-first bit stream.
fn unpack_lsb(raw: &[u8], count: usize, bits: u32) -> Vec<u8> {
    let mask = (1u32 << bits) - 1;
    let mut out = Vec::with_capacity(count * 2);
    let mut bytes = raw.iter().copied();
    let mut acc = 0u32;
    let mut held = 0u32;

    for _ in 0..count {
        while held < bits {
            acc |= u32::from(bytes.next().unwrap_or(0)) << held;
            held += 8;
        }
        push_u16(&mut out, acc & mask);
        acc >>= bits;
        held -= bits;
    }
    out
}

/// Legacy packing: two samples in three bytes, high bits outside, low bits in the middle byte.
fn unpack_msb_pairs(raw: &[u8], count: usize, bits: u32) -> Vec<u8> {
    let low_bits = bits - 8;
    let low_mask = (1u32 << low_bits) - 1;
    let mut out = Vec::with_capacity(count * 2);

    for index in 0..count {
        let base = (index / 2) * 3;
        let middle = byte_at(raw, base + 1);
        let value = if index % 2 == 0 {
            (byte_at(raw, base) << low_bits) | (middle & low_mask)
        } else {
            (byte_at(raw, base + 2) << low_bits) | ((middle >> 4) & low_mask)
        };
        push_u16(&mut out, value);
    }
    out
}

fn unpack_mono(raw: &[u8], pixels: usize, packing: Packing) -> Vec<u8> {
    match packing {
        Packing::Lsb10 => unpack_lsb(raw, pixels, 10),
        Packing::Lsb12 => unpack_lsb(raw, pixels, 12),
        Packing::Msb10 => unpack_msb_pairs(raw, pixels, 10),
        Packing::Msb12 => unpack_msb_pairs(raw, pixels, 12),
    }
}

fn unpack_rgb(raw: &[u8], pixels: usize, packing: RgbPacking) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels * 6);
    match packing {
        RgbPacking::Rgb10V1 => {
            for chunk in raw.chunks_exact(4).take(pixels) {
                if let [low, r, g, b] = *chunk {
                    let low = u32::from(low);
                    push_u16(&mut out, (u32::from(b) << 2) | ((low >> 4) & 0x3));
                    push_u16(&mut out, (u32::from(g) << 2) | ((low >> 2) & 0x3));
                    push_u16(&mut out, (u32::from(r) << 2) | (low & 0x3));
                }
            }
        }
        RgbPacking::Rgb10V2 => {
            for chunk in raw.chunks_exact(4).take(pixels) {
                if let [a, b, c, d] = *chunk {
                    let word = u32::from_le_bytes([a, b, c, d]);
                    push_u16(&mut out, word & 0x3ff);
                    push_u16(&mut out, (word >> 10) & 0x3ff);
                    push_u16(&mut out, (word >> 20) & 0x3ff);
                }
            }
        }
        RgbPacking::Lsb12 => {
            out = unpack_lsb(raw, pixels * 3, 12);
            swap_red_blue(&mut out, 3, 2);
        }
    }
    out
}

/// Swap the first and third channel of every interleaved pixel.
fn swap_red_blue(data: &mut [u8], channels: usize, sample_size: usize) {
    for pixel in data.chunks_exact_mut(channels * sample_size) {
        for byte in 0..sample_size {
            pixel.swap(byte, 2 * sample_size + byte);
        }
    }
}

fn planar_to_bgr(raw: &[u8], pixels: usize, sample_size: usize) -> Vec<u8> {
    let plane = pixels * sample_size;
    let (red, rest) = raw.split_at(plane.min(raw.len()));
    let (green, blue) = rest.split_at(plane.min(rest.len()));

    let mut out = Vec::with_capacity(plane * 3);
    for ((r, g), b) in red
        .chunks_exact(sample_size)
        .zip(green.chunks_exact(sample_size))
        .zip(blue.chunks_exact(sample_size))
    {
        out.extend_from_slice(b);
        out.extend_from_slice(g);
        out.extend_from_slice(r);
    }
    out
}

fn drop_alpha(raw: &[u8], swap: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() / 4 * 3);
    for chunk in raw.chunks_exact(4) {
        if let [first, second, third, _alpha] = *chunk {
            if swap {
                out.extend_from_slice(&[third, second, first]);
            } else {
                out.extend_from_slice(&[first, second, third]);
            }
        }
    }
    out
}

fn bayer_cfa(pattern: BayerPattern) -> CFA {
    match pattern {
        BayerPattern::Bg => CFA::BGGR,
        BayerPattern::Gb => CFA::GBRG,
        BayerPattern::Gr => CFA::GRBG,
        BayerPattern::Rg => CFA::RGGB,
    }
}

fn debayer(raw: &[u8], width: u32, height: u32, pattern: BayerPattern) -> Result<Vec<u8>> {
    let (width, height) = (width as usize, height as usize);
    let mut out = vec![0u8; width * height * 3];

    {
        let mut cursor = Cursor::new(raw);
        let mut raster = RasterMut::new(width, height, RasterDepth::Depth8, &mut out);
        bayer::run_demosaic(
            &mut cursor,
            BayerDepth::Depth8,
            bayer_cfa(pattern),
            Demosaic::Linear,
            &mut raster,
        )
        .map_err(|err| CameraError::Stream(format!("demosaic failed: {err:?}")))?;
    }

    // Demosaic output is RGB.
    swap_red_blue(&mut out, 3, 1);
    Ok(out)
}

/// ITU-R BT.601 full-range YUV to BGR.
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    [clamp_u8(b), clamp_u8(g), clamp_u8(r)]
}

/// Inverse of [`yuv_to_bgr`], used to encode synthetic frames.
#[allow(clippy::many_single_char_names)]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g));
    let u = 0.564f32.mul_add(b - y, 128.0);
    let v = 0.713f32.mul_add(r - y, 128.0);
    [clamp_u8(y), clamp_u8(u), clamp_u8(v)]
}

fn clamp_u8(value: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value.round().clamp(0.0, 255.0) as u8
    }
}

fn yuv422_to_bgr(raw: &[u8], order: YuvOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() / 4 * 6);
    for chunk in raw.chunks_exact(4) {
        if let [a, b, c, d] = *chunk {
            let (y0, u, y1, v) = match order {
                YuvOrder::Yuyv => (a, b, c, d),
                YuvOrder::Uyvy => (b, a, d, c),
            };
            out.extend_from_slice(&yuv_to_bgr(y0, u, v));
            out.extend_from_slice(&yuv_to_bgr(y1, u, v));
        }
    }
    out
}

fn yuv411_to_bgr(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() / 6 * 12);
    for chunk in raw.chunks_exact(6) {
        if let [u, y0, y1, v, y2, y3] = *chunk {
            for y in [y0, y1, y2, y3] {
                out.extend_from_slice(&yuv_to_bgr(y, u, v));
            }
        }
    }
    out
}

fn yuv444_to_bgr(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for chunk in raw.chunks_exact(3) {
        if let [u, y, v] = *chunk {
            out.extend_from_slice(&yuv_to_bgr(y, u, v));
        }
    }
    out
}

fn yuv420sp_to_bgr(raw: &[u8], width: usize, height: usize) -> Vec<u8> {
    let (luma, chroma) = raw.split_at((width * height).min(raw.len()));
    let mut out = Vec::with_capacity(width * height * 3);

    for (row, line) in luma.chunks_exact(width).enumerate() {
        let chroma_row = (row / 2) * width;
        for (col, &y) in line.iter().enumerate() {
            let index = chroma_row + (col / 2) * 2;
            let u = chroma.get(index).copied().unwrap_or(128);
            let v = chroma.get(index + 1).copied().unwrap_or(128);
            out.extend_from_slice(&yuv_to_bgr(y, u, v));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::PixelFormat;

    fn u16s(data: &[u8]) -> Vec<u16> {
        data.chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_unpack_mono12p() {
        // 0xABC, 0x123 -> bytes BC 3A 12
        let out = unpack_lsb(&[0xBC, 0x3A, 0x12], 2, 12);
        assert_eq!(u16s(&out), vec![0xABC, 0x123]);
    }

    #[test]
    fn test_unpack_mono10p() {
        // Four 10-bit samples: 0x3FF, 0x000, 0x155, 0x2AA
        let samples = [0x3FFu64, 0x000, 0x155, 0x2AA];
        let mut bits = 0u64;
        for (i, s) in samples.iter().enumerate() {
            bits |= s << (10 * i);
        }
        let raw: Vec<u8> = bits.to_le_bytes()[..5].to_vec();
        let out = unpack_lsb(&raw, 4, 10);
        assert_eq!(u16s(&out), vec![0x3FF, 0x000, 0x155, 0x2AA]);
    }

    #[test]
    fn test_unpack_mono12_legacy() {
        // p0 = 0xABC, p1 = 0x123 -> AB, (3 << 4 | C), 12
        let out = unpack_msb_pairs(&[0xAB, 0x3C, 0x12], 2, 12);
        assert_eq!(u16s(&out), vec![0xABC, 0x123]);
    }

    #[test]
    fn test_unpack_rgb10v2_is_bgr() {
        let word: u32 = (0x3FF << 20) | (0x200 << 10) | 0x001;
        let out = unpack_rgb(&word.to_le_bytes(), 1, RgbPacking::Rgb10V2);
        assert_eq!(u16s(&out), vec![0x001, 0x200, 0x3FF]);
    }

    #[test]
    fn test_unpack_rgb10v1_is_bgr() {
        // R = 0x3FF, G = 0x001, B = 0x102
        let low = 0b11 | (0b01 << 2) | (0b10 << 4);
        let out = unpack_rgb(&[low, 0xFF, 0x00, 0x40], 1, RgbPacking::Rgb10V1);
        assert_eq!(u16s(&out), vec![0x102, 0x001, 0x3FF]);
    }

    #[test]
    fn test_rgb12v1_packed_is_bgr() {
        // R = 0xABC, G = 0x123, B = 0x456 as one LSB-first stream
        let descriptor = PixelFormat::Rgb12V1Packed.descriptor();
        assert_eq!(descriptor.conversion, Conversion::UnpackRgb(RgbPacking::Lsb12));
        let out = convert(descriptor, 1, 1, vec![0xBC, 0x3A, 0x12, 0x56, 0x04]).expect("convert failed");
        assert_eq!(u16s(&out), vec![0x456, 0x123, 0xABC]);
    }

    #[test]
    fn test_mono_rows_use_mono_packing() {
        for format in [PixelFormat::Mono10Packed, PixelFormat::Mono12p, PixelFormat::BayerRg10p] {
            assert!(
                matches!(format.descriptor().conversion, Conversion::Unpack(_)),
                "{format} should unpack as single-channel samples"
            );
        }
    }

    #[test]
    fn test_rgb8_reorders_to_bgr() {
        let descriptor = PixelFormat::Rgb8.descriptor();
        let out = convert(descriptor, 2, 1, vec![1, 2, 3, 4, 5, 6]).expect("convert failed");
        assert_eq!(out, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_planar_interleaves_to_bgr() {
        let descriptor = PixelFormat::Rgb8Planar.descriptor();
        let out = convert(descriptor, 2, 1, vec![10, 11, 20, 21, 30, 31]).expect("convert failed");
        assert_eq!(out, vec![30, 20, 10, 31, 21, 11]);
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let descriptor = PixelFormat::Rgba8Packed.descriptor();
        let out = convert(descriptor, 1, 1, vec![1, 2, 3, 255]).expect("convert failed");
        assert_eq!(out, vec![3, 2, 1]);

        let descriptor = PixelFormat::Bgra8Packed.descriptor();
        let out = convert(descriptor, 1, 1, vec![1, 2, 3, 255]).expect("convert failed");
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_yuv_gray_is_gray() {
        assert_eq!(yuv_to_bgr(128, 128, 128), [128, 128, 128]);
        let [y, u, v] = rgb_to_yuv(200, 200, 200);
        assert_eq!((y, u, v), (200, 128, 128));
    }

    #[test]
    fn test_yuv_round_trip_close() {
        for (r, g, b) in [(255u8, 0u8, 0u8), (0, 255, 0), (0, 0, 255), (180, 40, 90)] {
            let [y, u, v] = rgb_to_yuv(r, g, b);
            let [bb, gg, rr] = yuv_to_bgr(y, u, v);
            assert!(r.abs_diff(rr) <= 4, "red {r} vs {rr}");
            assert!(g.abs_diff(gg) <= 4, "green {g} vs {gg}");
            assert!(b.abs_diff(bb) <= 4, "blue {b} vs {bb}");
        }
    }

    #[test]
    fn test_uyvy_and_yuyv_agree() {
        let yuyv = convert(PixelFormat::Yuv422.descriptor(), 2, 1, vec![76, 85, 76, 255])
            .expect("convert failed");
        let uyvy = convert(PixelFormat::Yuv422Uyvy.descriptor(), 2, 1, vec![85, 76, 255, 76])
            .expect("convert failed");
        assert_eq!(yuyv, uyvy);
        assert_eq!(yuyv.len(), 6);
    }

    #[test]
    fn test_yuv420sp_upsamples_chroma() {
        // 2x2 luma, one CbCr pair
        let raw = vec![50, 100, 150, 200, 128, 128];
        let out = convert(PixelFormat::Ycbcr420SemiPlanar.descriptor(), 2, 2, raw)
            .expect("convert failed");
        assert_eq!(out, vec![50, 50, 50, 100, 100, 100, 150, 150, 150, 200, 200, 200]);
    }

    #[test]
    fn test_odd_width_rejected_for_yuv422() {
        let result = check_dimensions(PixelFormat::Yuv422.descriptor(), 3, 2);
        assert!(matches!(result, Err(CameraError::InvalidDimensions { .. })));
        assert!(check_dimensions(PixelFormat::Yuv411Packed.descriptor(), 6, 1).is_err());
        assert!(check_dimensions(PixelFormat::Mono8.descriptor(), 3, 3).is_ok());
    }

    #[test]
    fn test_debayer_uniform_mosaic() {
        let out = convert(PixelFormat::BayerRg8.descriptor(), 4, 4, vec![90; 16])
            .expect("debayer failed");
        assert_eq!(out.len(), 4 * 4 * 3);
        assert!(out.iter().all(|&value| value == 90));
    }
}
