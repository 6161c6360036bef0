//! Pixel format catalog.
//!
//! Every pixel format code a camera can report maps to exactly one
//! [`PixelFormatDescriptor`]. The descriptor records how the raw buffer is
//! laid out and which [`Conversion`] turns it into a canonical image. A code
//! without a row is an error, never a fallback.

use std::fmt;
use std::str::FromStr;

use crate::error::{CameraError, Result};

/// Pixel format code as reported by a device.
///
/// Catalog codes are `0..=66`. Backends that see an encoding outside the
/// catalog report its native code unchanged so that materialization fails
/// with [`CameraError::UnsupportedFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatCode(pub u32);

impl From<PixelFormat> for FormatCode {
    fn from(format: PixelFormat) -> Self {
        Self(format.code())
    }
}

/// Sensor pixel encodings known to the catalog.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PixelFormat {
    Bgr10Packed = 0,
    Bgr12Packed = 1,
    Bgr8 = 2,
    Bgr8Packed = 3,
    Bgra8Packed = 4,
    BayerBg10 = 5,
    BayerBg10p = 6,
    BayerBg12 = 7,
    BayerBg12Packed = 8,
    BayerBg12p = 9,
    BayerBg16 = 10,
    BayerBg8 = 11,
    BayerGb10 = 12,
    BayerGb10p = 13,
    BayerGb12 = 14,
    BayerGb12Packed = 15,
    BayerGb12p = 16,
    BayerGb16 = 17,
    BayerGb8 = 18,
    BayerGr10 = 19,
    BayerGr10p = 20,
    BayerGr12 = 21,
    BayerGr12Packed = 22,
    BayerGr12p = 23,
    BayerGr16 = 24,
    BayerGr8 = 25,
    BayerRg10 = 26,
    BayerRg10p = 27,
    BayerRg12 = 28,
    BayerRg12Packed = 29,
    BayerRg12p = 30,
    BayerRg16 = 31,
    BayerRg8 = 32,
    Confidence16 = 33,
    Confidence8 = 34,
    Coord3dAbc32f = 35,
    Coord3dC16 = 36,
    Mono10 = 37,
    Mono10Packed = 38,
    Mono10p = 39,
    Mono12 = 40,
    Mono12Packed = 41,
    Mono12p = 42,
    Mono16 = 43,
    Mono8 = 44,
    Mono8Signed = 45,
    Rgb10Packed = 46,
    Rgb10Planar = 47,
    Rgb10V1Packed = 48,
    Rgb10V2Packed = 49,
    Rgb12Packed = 50,
    Rgb12Planar = 51,
    Rgb12V1Packed = 52,
    Rgb16Packed = 53,
    Rgb16Planar = 54,
    Rgb8 = 55,
    Rgb8Packed = 56,
    Rgb8Planar = 57,
    Rgba8Packed = 58,
    Ycbcr420SemiPlanar = 59,
    Ycbcr422 = 60,
    Yuv411Packed = 61,
    Yuv422Packed = 62,
    Yuv422 = 63,
    Yuv422Uyvy = 64,
    Yuv422YuyvPacked = 65,
    Yuv444Packed = 66,
}

impl PixelFormat {
    /// Numeric catalog code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Resolve a catalog code.
    pub fn from_code(code: u32) -> Result<Self> {
        lookup(FormatCode(code)).map(|descriptor| descriptor.format)
    }

    /// Catalog row for this format.
    #[allow(clippy::indexing_slicing)]
    pub fn descriptor(self) -> &'static PixelFormatDescriptor {
        // Rows are stored in code order.
        &CATALOG[self as usize]
    }

    /// Catalog name, e.g. `Mono8` or `YUV422_8_UYVY`.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Iterate every format in code order.
    pub fn all() -> impl Iterator<Item = Self> {
        CATALOG.iter().map(|descriptor| descriptor.format)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(name: &str) -> Result<Self> {
        CATALOG
            .iter()
            .find(|descriptor| descriptor.name.eq_ignore_ascii_case(name))
            .map(|descriptor| descriptor.format)
            .ok_or_else(|| CameraError::rejected("pixel format", format!("unknown name {name:?}")))
    }
}

/// Color filter phase of a Bayer mosaic, named by its first two pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPattern {
    /// Blue-green / green-red.
    Bg,
    /// Green-blue / red-green.
    Gb,
    /// Green-red / blue-green.
    Gr,
    /// Red-green / green-blue.
    Rg,
}

/// Byte order of a packed 4:2:2 stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YuvOrder {
    /// `Y0 U Y1 V`
    Yuyv,
    /// `U Y0 V Y1`
    Uyvy,
}

/// How the channels of a format are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Single luminance (or depth/confidence) channel.
    Mono,
    /// Single-channel color mosaic.
    Bayer(BayerPattern),
    /// Red, green, blue.
    Rgb,
    /// Blue, green, red.
    Bgr,
    /// Red, green, blue, alpha.
    Rgba,
    /// Blue, green, red, alpha.
    Bgra,
    /// Packed 4:2:2 luma/chroma.
    Yuv422(YuvOrder),
    /// Packed 4:1:1 luma/chroma (`U Y0 Y1 V Y2 Y3`).
    Yuv411,
    /// Packed 4:4:4 luma/chroma (`U Y V`).
    Yuv444,
    /// Full-resolution luma plane followed by an interleaved CbCr plane.
    Yuv420SemiPlanar,
    /// Three 32-bit float coordinates per pixel.
    Float3D,
}

/// Storage type of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit, little endian.
    U16,
    /// 32-bit float, little endian.
    F32,
}

impl SampleType {
    /// Bytes per sample.
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Bit packing of sub-byte sample streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// 10-bit samples as an LSB-first bit stream (4 samples in 5 bytes).
    Lsb10,
    /// 12-bit samples as an LSB-first bit stream (2 samples in 3 bytes).
    Lsb12,
    /// Legacy 10-bit packing: 2 samples in 3 bytes, low bits in the middle byte.
    Msb10,
    /// Legacy 12-bit packing: 2 samples in 3 bytes, low nibbles in the middle byte.
    Msb12,
}

/// Bit packing of whole RGB pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbPacking {
    /// 10-bit RGB in 4 bytes: shared low-bit byte followed by R, G, B high bytes.
    Rgb10V1,
    /// 10-bit RGB in a little-endian 32-bit word: B in bits 0-9, G 10-19, R 20-29.
    Rgb10V2,
    /// 12-bit R, G, B samples as one LSB-first bit stream.
    Lsb12,
}

/// Operation that turns a raw buffer into the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Raw bytes are already canonical.
    None,
    /// Bit-unpack single-channel samples to 16 bits.
    Unpack(Packing),
    /// Interpolate an 8-bit mosaic to 3-channel BGR.
    Debayer(BayerPattern),
    /// Swap the first and third channel of interleaved RGB.
    SwapRedBlue,
    /// Interleave R, G and B planes to BGR.
    PlanarToBgr,
    /// Drop the alpha channel, optionally swapping red and blue.
    DropAlpha {
        /// Source is RGBA rather than BGRA.
        swap_red_blue: bool,
    },
    /// Bit-unpack RGB pixels to 3-channel 16-bit BGR.
    UnpackRgb(RgbPacking),
    /// 4:2:2 to BGR.
    Yuv422(YuvOrder),
    /// 4:1:1 to BGR.
    Yuv411,
    /// 4:4:4 to BGR.
    Yuv444,
    /// Semi-planar 4:2:0 to BGR with chroma upsampling.
    Yuv420SemiPlanar,
}

/// Sample storage used to wrap the raw buffer before color conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Storage {
    /// Channels per pixel.
    pub channels: u8,
    /// Sample type.
    pub sample: SampleType,
}

/// One row of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatDescriptor {
    /// Format this row describes.
    pub format: PixelFormat,
    /// Catalog name.
    pub name: &'static str,
    /// Significant bits per sample.
    pub bit_depth: u8,
    /// Channel arrangement of the raw data.
    pub layout: ChannelLayout,
    /// Canonical storage of the raw data.
    pub storage: Storage,
    /// Bits each pixel occupies in the raw buffer.
    pub bits_per_pixel: u32,
    /// Operation producing the canonical image.
    pub conversion: Conversion,
}

impl PixelFormatDescriptor {
    /// Numeric catalog code.
    pub const fn code(&self) -> u32 {
        self.format.code()
    }

    /// Whether the raw buffer needs a conversion step.
    pub const fn requires_conversion(&self) -> bool {
        !matches!(self.conversion, Conversion::None)
    }

    /// Bytes a `width` x `height` frame occupies in the raw buffer.
    pub const fn payload_size(&self, width: u32, height: u32) -> usize {
        let bits = width as usize * height as usize * self.bits_per_pixel as usize;
        bits.div_ceil(8)
    }

    /// Channels of the canonical image.
    pub const fn output_channels(&self) -> u8 {
        match self.conversion {
            Conversion::Debayer(_)
            | Conversion::DropAlpha { .. }
            | Conversion::Yuv422(_)
            | Conversion::Yuv411
            | Conversion::Yuv444
            | Conversion::Yuv420SemiPlanar => 3,
            _ => self.storage.channels,
        }
    }

    /// Sample type of the canonical image.
    pub const fn output_sample(&self) -> SampleType {
        self.storage.sample
    }
}

/// Look up the catalog row for a device-reported code.
pub fn lookup(code: FormatCode) -> Result<&'static PixelFormatDescriptor> {
    usize::try_from(code.0)
        .ok()
        .and_then(|index| CATALOG.get(index))
        .ok_or(CameraError::UnsupportedFormat(code.0))
}

/// Every catalog row in code order.
pub fn catalog() -> &'static [PixelFormatDescriptor] {
    &CATALOG
}

const MONO8: Storage = Storage {
    channels: 1,
    sample: SampleType::U8,
};
const MONO16: Storage = Storage {
    channels: 1,
    sample: SampleType::U16,
};
const YUV422: Storage = Storage {
    channels: 2,
    sample: SampleType::U8,
};
const COLOR8: Storage = Storage {
    channels: 3,
    sample: SampleType::U8,
};
const COLOR16: Storage = Storage {
    channels: 3,
    sample: SampleType::U16,
};
const COLOR_ALPHA8: Storage = Storage {
    channels: 4,
    sample: SampleType::U8,
};
const COORD3D: Storage = Storage {
    channels: 3,
    sample: SampleType::F32,
};

const fn row(
    format: PixelFormat,
    name: &'static str,
    bit_depth: u8,
    layout: ChannelLayout,
    storage: Storage,
    bits_per_pixel: u32,
    conversion: Conversion,
) -> PixelFormatDescriptor {
    PixelFormatDescriptor {
        format,
        name,
        bit_depth,
        layout,
        storage,
        bits_per_pixel,
        conversion,
    }
}

use BayerPattern::{Bg, Gb, Gr, Rg};
use ChannelLayout::{Bayer, Bgr, Bgra, Float3D, Mono, Rgb, Rgba};
use Conversion as C;
use PixelFormat as P;

static CATALOG: [PixelFormatDescriptor; 67] = [
    row(P::Bgr10Packed, "BGR10Packed", 10, Bgr, COLOR16, 48, C::None),
    row(P::Bgr12Packed, "BGR12Packed", 12, Bgr, COLOR16, 48, C::None),
    row(P::Bgr8, "BGR8", 8, Bgr, COLOR8, 24, C::None),
    row(P::Bgr8Packed, "BGR8Packed", 8, Bgr, COLOR8, 24, C::None),
    row(P::Bgra8Packed, "BGRA8Packed", 8, Bgra, COLOR_ALPHA8, 32, C::DropAlpha { swap_red_blue: false }),
    row(P::BayerBg10, "BayerBG10", 10, Bayer(Bg), MONO16, 16, C::None),
    row(P::BayerBg10p, "BayerBG10p", 10, Bayer(Bg), MONO16, 10, C::Unpack(Packing::Lsb10)),
    row(P::BayerBg12, "BayerBG12", 12, Bayer(Bg), MONO16, 16, C::None),
    row(P::BayerBg12Packed, "BayerBG12Packed", 12, Bayer(Bg), MONO16, 12, C::Unpack(Packing::Msb12)),
    row(P::BayerBg12p, "BayerBG12p", 12, Bayer(Bg), MONO16, 12, C::Unpack(Packing::Lsb12)),
    row(P::BayerBg16, "BayerBG16", 16, Bayer(Bg), MONO16, 16, C::None),
    row(P::BayerBg8, "BayerBG8", 8, Bayer(Bg), MONO8, 8, C::Debayer(Bg)),
    row(P::BayerGb10, "BayerGB10", 10, Bayer(Gb), MONO16, 16, C::None),
    row(P::BayerGb10p, "BayerGB10p", 10, Bayer(Gb), MONO16, 10, C::Unpack(Packing::Lsb10)),
    row(P::BayerGb12, "BayerGB12", 12, Bayer(Gb), MONO16, 16, C::None),
    row(P::BayerGb12Packed, "BayerGB12Packed", 12, Bayer(Gb), MONO16, 12, C::Unpack(Packing::Msb12)),
    row(P::BayerGb12p, "BayerGB12p", 12, Bayer(Gb), MONO16, 12, C::Unpack(Packing::Lsb12)),
    row(P::BayerGb16, "BayerGB16", 16, Bayer(Gb), MONO16, 16, C::None),
    row(P::BayerGb8, "BayerGB8", 8, Bayer(Gb), MONO8, 8, C::Debayer(Gb)),
    row(P::BayerGr10, "BayerGR10", 10, Bayer(Gr), MONO16, 16, C::None),
    row(P::BayerGr10p, "BayerGR10p", 10, Bayer(Gr), MONO16, 10, C::Unpack(Packing::Lsb10)),
    row(P::BayerGr12, "BayerGR12", 12, Bayer(Gr), MONO16, 16, C::None),
    row(P::BayerGr12Packed, "BayerGR12Packed", 12, Bayer(Gr), MONO16, 12, C::Unpack(Packing::Msb12)),
    row(P::BayerGr12p, "BayerGR12p", 12, Bayer(Gr), MONO16, 12, C::Unpack(Packing::Lsb12)),
    row(P::BayerGr16, "BayerGR16", 16, Bayer(Gr), MONO16, 16, C::None),
    row(P::BayerGr8, "BayerGR8", 8, Bayer(Gr), MONO8, 8, C::Debayer(Gr)),
    row(P::BayerRg10, "BayerRG10", 10, Bayer(Rg), MONO16, 16, C::None),
    row(P::BayerRg10p, "BayerRG10p", 10, Bayer(Rg), MONO16, 10, C::Unpack(Packing::Lsb10)),
    row(P::BayerRg12, "BayerRG12", 12, Bayer(Rg), MONO16, 16, C::None),
    row(P::BayerRg12Packed, "BayerRG12Packed", 12, Bayer(Rg), MONO16, 12, C::Unpack(Packing::Msb12)),
    row(P::BayerRg12p, "BayerRG12p", 12, Bayer(Rg), MONO16, 12, C::Unpack(Packing::Lsb12)),
    row(P::BayerRg16, "BayerRG16", 16, Bayer(Rg), MONO16, 16, C::None),
    row(P::BayerRg8, "BayerRG8", 8, Bayer(Rg), MONO8, 8, C::Debayer(Rg)),
    row(P::Confidence16, "Confidence16", 16, Mono, MONO16, 16, C::None),
    row(P::Confidence8, "Confidence8", 8, Mono, MONO8, 8, C::None),
    row(P::Coord3dAbc32f, "Coord3D_ABC32f", 32, Float3D, COORD3D, 96, C::None),
    row(P::Coord3dC16, "Coord3D_C16", 16, Mono, MONO16, 16, C::None),
    row(P::Mono10, "Mono10", 10, Mono, MONO16, 16, C::None),
    row(P::Mono10Packed, "Mono10Packed", 10, Mono, MONO16, 12, C::Unpack(Packing::Msb10)),
    row(P::Mono10p, "Mono10p", 10, Mono, MONO16, 10, C::Unpack(Packing::Lsb10)),
    row(P::Mono12, "Mono12", 12, Mono, MONO16, 16, C::None),
    row(P::Mono12Packed, "Mono12Packed", 12, Mono, MONO16, 12, C::Unpack(Packing::Msb12)),
    row(P::Mono12p, "Mono12p", 12, Mono, MONO16, 12, C::Unpack(Packing::Lsb12)),
    row(P::Mono16, "Mono16", 16, Mono, MONO16, 16, C::None),
    row(P::Mono8, "Mono8", 8, Mono, MONO8, 8, C::None),
    row(P::Mono8Signed, "Mono8Signed", 8, Mono, MONO8, 8, C::None),
    row(P::Rgb10Packed, "RGB10Packed", 10, Rgb, COLOR16, 48, C::SwapRedBlue),
    row(P::Rgb10Planar, "RGB10Planar", 10, Rgb, COLOR16, 48, C::PlanarToBgr),
    row(P::Rgb10V1Packed, "RGB10V1Packed", 10, Rgb, COLOR16, 32, C::UnpackRgb(RgbPacking::Rgb10V1)),
    row(P::Rgb10V2Packed, "RGB10V2Packed", 10, Rgb, COLOR16, 32, C::UnpackRgb(RgbPacking::Rgb10V2)),
    row(P::Rgb12Packed, "RGB12Packed", 12, Rgb, COLOR16, 48, C::SwapRedBlue),
    row(P::Rgb12Planar, "RGB12Planar", 12, Rgb, COLOR16, 48, C::PlanarToBgr),
    row(P::Rgb12V1Packed, "RGB12V1Packed", 12, Rgb, COLOR16, 36, C::UnpackRgb(RgbPacking::Lsb12)),
    row(P::Rgb16Packed, "RGB16Packed", 16, Rgb, COLOR16, 48, C::SwapRedBlue),
    row(P::Rgb16Planar, "RGB16Planar", 16, Rgb, COLOR16, 48, C::PlanarToBgr),
    row(P::Rgb8, "RGB8", 8, Rgb, COLOR8, 24, C::SwapRedBlue),
    row(P::Rgb8Packed, "RGB8Packed", 8, Rgb, COLOR8, 24, C::SwapRedBlue),
    row(P::Rgb8Planar, "RGB8Planar", 8, Rgb, COLOR8, 24, C::PlanarToBgr),
    row(P::Rgba8Packed, "RGBA8Packed", 8, Rgba, COLOR_ALPHA8, 32, C::DropAlpha { swap_red_blue: true }),
    row(P::Ycbcr420SemiPlanar, "YCbCr420_8_YY_CbCr_Semiplanar", 8, ChannelLayout::Yuv420SemiPlanar, MONO8, 12, C::Yuv420SemiPlanar),
    row(P::Ycbcr422, "YCbCr422_8", 8, ChannelLayout::Yuv422(YuvOrder::Uyvy), YUV422, 16, C::Yuv422(YuvOrder::Uyvy)),
    row(P::Yuv411Packed, "YUV411Packed", 8, ChannelLayout::Yuv411, MONO8, 12, C::Yuv411),
    row(P::Yuv422Packed, "YUV422Packed", 8, ChannelLayout::Yuv422(YuvOrder::Yuyv), YUV422, 16, C::Yuv422(YuvOrder::Yuyv)),
    row(P::Yuv422, "YUV422_8", 8, ChannelLayout::Yuv422(YuvOrder::Yuyv), YUV422, 16, C::Yuv422(YuvOrder::Yuyv)),
    row(P::Yuv422Uyvy, "YUV422_8_UYVY", 8, ChannelLayout::Yuv422(YuvOrder::Uyvy), YUV422, 16, C::Yuv422(YuvOrder::Uyvy)),
    row(P::Yuv422YuyvPacked, "YUV422_YUYV_Packed", 8, ChannelLayout::Yuv422(YuvOrder::Yuyv), YUV422, 16, C::Yuv422(YuvOrder::Yuyv)),
    row(P::Yuv444Packed, "YUV444Packed", 8, ChannelLayout::Yuv444, COLOR8, 24, C::Yuv444),
];
