//! In-process camera backend for testing without hardware.
//!
//! [`MockDriver`] serves a fixed list of [`MockCameraSpec`]s. Opened cameras
//! keep their parameters in memory and stream a synthetic scene encoded in
//! whichever catalog format is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::convert::rgb_to_yuv;
use crate::error::{CameraError, Result};
use crate::params::{ParameterRange, WhiteBalance, WhiteBalanceSupport};
use crate::pixel_format::{
    BayerPattern, ChannelLayout, Conversion, FormatCode, Packing, PixelFormat, RgbPacking, SampleType,
    YuvOrder,
};
use crate::registry::KnownModel;
use crate::traits::{
    CameraDevice, CameraDriver, CaptureStream, DeviceInfo, FrameMetadata, RawFrame, StreamConfig,
};
use crate::validation::SMPTE_COLOR_BARS;

/// Scene rendered by a mock camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Eight vertical SMPTE color bars.
    ColorBars,
    /// Horizontal gray ramp from dark to light.
    Gradient,
    /// Solid RGB color.
    Solid(u8, u8, u8),
}

/// Configuration of one simulated camera.
#[derive(Debug, Clone)]
pub struct MockCameraSpec {
    serial: String,
    model_name: String,
    sensor: (u32, u32),
    accessible: bool,
    exposure_range: ParameterRange,
    gain_range: ParameterRange,
    frame_rate_range: ParameterRange,
    white_balance: WhiteBalanceSupport,
    has_brightness: bool,
    formats: Vec<PixelFormat>,
    binning_limits: (u32, u32),
    pattern: TestPattern,
    frame_rate: f64,
    reported_code: Option<u32>,
}

impl MockCameraSpec {
    /// A daA1280-54uc with the given serial.
    pub fn reference(serial: &str) -> Self {
        let model = KnownModel::Daa1280_54uc;
        Self {
            serial: serial.to_owned(),
            model_name: model.model_name().to_owned(),
            sensor: model.sensor_size(),
            accessible: true,
            exposure_range: ParameterRange::new(21.0, 1_000_000.0),
            gain_range: ParameterRange::new(0.0, 24.0),
            frame_rate_range: ParameterRange::new(1.0, 54.0),
            white_balance: WhiteBalanceSupport::Ratios(ParameterRange::new(1.0, 15.98)),
            has_brightness: true,
            formats: PixelFormat::all().collect(),
            binning_limits: (4, 4),
            pattern: TestPattern::ColorBars,
            frame_rate: 30.0,
            reported_code: None,
        }
    }

    /// Override the model identification string.
    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model_name = name.to_owned();
        self
    }

    /// Override the sensor size.
    #[must_use]
    pub const fn with_sensor(mut self, width: u32, height: u32) -> Self {
        self.sensor = (width, height);
        self
    }

    /// Mark the device as (in)accessible.
    #[must_use]
    pub const fn with_accessible(mut self, accessible: bool) -> Self {
        self.accessible = accessible;
        self
    }

    /// Restrict the formats the device offers.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Override the white-balance capability.
    #[must_use]
    pub const fn with_white_balance(mut self, support: WhiteBalanceSupport) -> Self {
        self.white_balance = support;
        self
    }

    /// Override the exposure range.
    #[must_use]
    pub const fn with_exposure_range(mut self, range: ParameterRange) -> Self {
        self.exposure_range = range;
        self
    }

    /// Remove or add the brightness control.
    #[must_use]
    pub const fn with_brightness(mut self, has_brightness: bool) -> Self {
        self.has_brightness = has_brightness;
        self
    }

    /// Set the rendered scene.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the initial frame rate.
    #[must_use]
    pub const fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Declare every frame with `code` instead of the configured format.
    #[must_use]
    pub const fn with_reported_code(mut self, code: u32) -> Self {
        self.reported_code = Some(code);
        self
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            serial: self.serial.clone(),
            model_name: self.model_name.clone(),
            driver: "mock".to_owned(),
            accessible: self.accessible,
        }
    }
}

/// Open-device bookkeeping shared between a driver and its cameras.
#[derive(Default)]
struct OpenDevices {
    counts: Mutex<HashMap<String, usize>>,
    peak: AtomicUsize,
}

impl OpenDevices {
    fn acquire(self: &Arc<Self>, serial: &str) -> Lease {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(serial.to_owned()).or_default();
        *count += 1;
        self.peak.fetch_max(*count, Ordering::AcqRel);
        Lease {
            devices: Arc::clone(self),
            serial: serial.to_owned(),
        }
    }

    fn count(&self, serial: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(serial).copied().unwrap_or(0)
    }
}

/// Marks one serial as open until dropped.
struct Lease {
    devices: Arc<OpenDevices>,
    serial: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut counts = self.devices.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&self.serial) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Driver serving simulated cameras.
///
/// Opening never fails on a busy device; instead the driver records how
/// many handles to one serial were open at once, see
/// [`MockDriver::peak_open_count`].
pub struct MockDriver {
    cameras: Vec<MockCameraSpec>,
    initialized: AtomicBool,
    terminations: AtomicUsize,
    open: Arc<OpenDevices>,
}

impl MockDriver {
    /// Serve `cameras`.
    pub fn new(cameras: Vec<MockCameraSpec>) -> Self {
        Self {
            cameras,
            initialized: AtomicBool::new(false),
            terminations: AtomicUsize::new(0),
            open: Arc::default(),
        }
    }

    /// Serve a single reference camera `CAM-001`.
    pub fn reference() -> Self {
        Self::new(vec![MockCameraSpec::reference("CAM-001")])
    }

    /// Whether `initialize` ran and `terminate` has not.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// How many times `terminate` was called.
    pub fn terminate_count(&self) -> usize {
        self.terminations.load(Ordering::Acquire)
    }

    /// Opened cameras for `serial` that have not been dropped yet.
    pub fn open_count(&self, serial: &str) -> usize {
        self.open.count(serial)
    }

    /// Most cameras ever open at once for a single serial.
    pub fn peak_open_count(&self) -> usize {
        self.open.peak.load(Ordering::Acquire)
    }
}

impl CameraDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn terminate(&self) {
        self.initialized.store(false, Ordering::Release);
        self.terminations.fetch_add(1, Ordering::AcqRel);
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.cameras.iter().map(MockCameraSpec::info).collect())
    }

    fn open(&self, serial: &str) -> Result<Box<dyn CameraDevice>> {
        let spec = self
            .cameras
            .iter()
            .find(|spec| spec.serial == serial)
            .ok_or_else(|| CameraError::IdentityUnresolved(serial.to_owned()))?;
        if !spec.accessible {
            return Err(CameraError::Device(format!("{serial} is not accessible")));
        }
        debug!(serial, "Opened mock camera");
        let lease = self.open.acquire(serial);
        Ok(Box::new(MockCamera::new(spec.clone(), lease)))
    }
}

/// An opened simulated camera.
pub struct MockCamera {
    spec: MockCameraSpec,
    info: DeviceInfo,
    exposure: f64,
    auto_exposure: bool,
    gain: f64,
    frame_rate: f64,
    white_balance: Option<WhiteBalance>,
    auto_white_balance: bool,
    brightness: f64,
    pixel_format: PixelFormat,
    _lease: Lease,
}

impl MockCamera {
    fn new(spec: MockCameraSpec, lease: Lease) -> Self {
        let white_balance = match spec.white_balance {
            WhiteBalanceSupport::Unsupported => None,
            WhiteBalanceSupport::Temperature(_) => Some(WhiteBalance::Temperature(6500.0)),
            WhiteBalanceSupport::Ratios(_) => Some(WhiteBalance::Ratios([1.0; 3])),
        };
        let pixel_format = if spec.formats.contains(&PixelFormat::Mono8) {
            PixelFormat::Mono8
        } else {
            spec.formats.first().copied().unwrap_or(PixelFormat::Mono8)
        };

        Self {
            info: spec.info(),
            exposure: 5000.0,
            auto_exposure: true,
            gain: 0.0,
            frame_rate: spec.frame_rate,
            white_balance,
            auto_white_balance: white_balance.is_some(),
            brightness: 0.0,
            pixel_format,
            spec,
            _lease: lease,
        }
    }
}

impl CameraDevice for MockCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn sensor_size(&self) -> (u32, u32) {
        self.spec.sensor
    }

    fn exposure(&self) -> Result<f64> {
        Ok(self.exposure)
    }

    fn set_exposure(&mut self, micros: f64) -> Result<()> {
        self.auto_exposure = false;
        self.exposure = micros;
        Ok(())
    }

    fn exposure_range(&self) -> ParameterRange {
        self.spec.exposure_range
    }

    fn auto_exposure(&self) -> Result<bool> {
        Ok(self.auto_exposure)
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()> {
        self.auto_exposure = enabled;
        Ok(())
    }

    fn gain(&self) -> Result<f64> {
        Ok(self.gain)
    }

    fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.gain = gain;
        Ok(())
    }

    fn gain_range(&self) -> ParameterRange {
        self.spec.gain_range
    }

    fn frame_rate(&self) -> Result<f64> {
        Ok(self.frame_rate)
    }

    fn set_frame_rate(&mut self, fps: f64) -> Result<()> {
        self.frame_rate = fps;
        Ok(())
    }

    fn frame_rate_range(&self) -> ParameterRange {
        self.spec.frame_rate_range
    }

    fn white_balance_support(&self) -> WhiteBalanceSupport {
        self.spec.white_balance
    }

    fn white_balance(&self) -> Result<WhiteBalance> {
        self.white_balance
            .ok_or_else(|| CameraError::rejected("white balance", "device has no white balance control"))
    }

    fn set_white_balance(&mut self, balance: WhiteBalance) -> Result<()> {
        self.auto_white_balance = false;
        self.white_balance = Some(balance);
        Ok(())
    }

    fn auto_white_balance(&self) -> Result<bool> {
        Ok(self.auto_white_balance)
    }

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()> {
        self.auto_white_balance = enabled;
        Ok(())
    }

    fn brightness(&self) -> Result<f64> {
        if self.spec.has_brightness {
            Ok(self.brightness)
        } else {
            Err(CameraError::rejected("brightness", "device has no brightness control"))
        }
    }

    fn set_brightness(&mut self, brightness: f64) -> Result<()> {
        if !self.spec.has_brightness {
            return Err(CameraError::rejected("brightness", "device has no brightness control"));
        }
        self.brightness = brightness;
        Ok(())
    }

    fn supported_formats(&self) -> Vec<PixelFormat> {
        self.spec.formats.clone()
    }

    fn pixel_format(&self) -> Result<PixelFormat> {
        Ok(self.pixel_format)
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        if !self.spec.formats.contains(&format) {
            return Err(CameraError::rejected("pixel format", format!("{format} not offered")));
        }
        self.pixel_format = format;
        Ok(())
    }

    fn binning_limits(&self) -> (u32, u32) {
        self.spec.binning_limits
    }

    fn open_stream(&mut self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>> {
        if !self.spec.formats.contains(&config.pixel_format) {
            return Err(CameraError::rejected(
                "pixel format",
                format!("{} not offered", config.pixel_format),
            ));
        }

        let (width, height) = self.spec.sensor;
        let binning = config.binning;
        if binning.is_active() && (width % binning.horizontal != 0 || height % binning.vertical != 0) {
            return Err(CameraError::rejected(
                "binning",
                format!(
                    "{}x{} does not divide sensor {width}x{height}",
                    binning.horizontal, binning.vertical
                ),
            ));
        }

        let data = encode_scene(config.pixel_format, width, height, self.spec.pattern);
        let format = self
            .spec
            .reported_code
            .map_or_else(|| FormatCode::from(config.pixel_format), FormatCode);
        let interval = Duration::from_secs_f64(1.0 / self.frame_rate.max(1.0));

        debug!(
            serial = %self.spec.serial,
            pixel_format = %config.pixel_format,
            ?interval,
            "Mock stream opened"
        );
        let bytes_used = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Ok(Box::new(MockStream {
            template: RawFrame {
                metadata: FrameMetadata {
                    sequence: 0,
                    timestamp: Duration::ZERO,
                    bytes_used,
                },
                data,
                width,
                height,
                format,
            },
            interval,
            started: Instant::now(),
            next_due: Instant::now(),
            sequence: 0,
        }))
    }
}

/// Stream producing copies of one pre-rendered frame at the configured rate.
pub struct MockStream {
    template: RawFrame,
    interval: Duration,
    started: Instant,
    next_due: Instant,
    sequence: u32,
}

impl CaptureStream for MockStream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }
        self.next_due = Instant::now() + self.interval;

        let mut frame = self.template.clone();
        frame.metadata.sequence = self.sequence;
        frame.metadata.timestamp = self.started.elapsed();
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }
}

fn scene_rgb(pattern: TestPattern, x: u32, width: u32) -> [u8; 3] {
    match pattern {
        TestPattern::ColorBars => {
            let bar_width = (width / 8).max(1);
            let bar = (x / bar_width).min(7) as usize;
            let (r, g, b) = SMPTE_COLOR_BARS.get(bar).copied().unwrap_or((0, 0, 0));
            [r, g, b]
        }
        TestPattern::Gradient => {
            #[allow(clippy::cast_possible_truncation)]
            let value = ((u64::from(x) * 255) / u64::from(width.max(1))) as u8;
            [value; 3]
        }
        TestPattern::Solid(r, g, b) => [r, g, b],
    }
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    rgb_to_yuv(r, g, b)[0]
}

fn average(values: &[u8]) -> u8 {
    let total: u32 = values.iter().map(|&value| u32::from(value)).sum();
    #[allow(clippy::cast_possible_truncation)]
    let count = values.len().max(1) as u32;
    #[allow(clippy::cast_possible_truncation)]
    let mean = ((total + count / 2) / count) as u8;
    mean
}

/// Channel index (0 = R, 1 = G, 2 = B) of a mosaic site.
const fn bayer_channel(pattern: BayerPattern, x: u32, y: u32) -> usize {
    let (even_row, odd_row) = match pattern {
        BayerPattern::Bg => ([2, 1], [1, 0]),
        BayerPattern::Gb => ([1, 2], [0, 1]),
        BayerPattern::Gr => ([1, 0], [2, 1]),
        BayerPattern::Rg => ([0, 1], [1, 2]),
    };
    let row = if y % 2 == 0 { even_row } else { odd_row };
    row[(x % 2) as usize]
}

/// Render `pattern` as one raw frame of `format`.
pub fn encode_scene(format: PixelFormat, width: u32, height: u32, pattern: TestPattern) -> Vec<u8> {
    let descriptor = format.descriptor();
    let shift = u32::from(descriptor.bit_depth.saturating_sub(8));
    let row: Vec<[u8; 3]> = (0..width).map(|x| scene_rgb(pattern, x, width)).collect();
    let at = |x: u32| row.get(x as usize).copied().unwrap_or([0; 3]);
    let pixels = width as usize * height as usize;

    let mut data = match descriptor.layout {
        ChannelLayout::Mono => {
            let mut samples = Vec::with_capacity(pixels);
            for _ in 0..height {
                for x in 0..width {
                    samples.push(u32::from(luma(at(x))) << shift);
                }
            }
            serialize(&samples, descriptor.storage.sample, descriptor.conversion)
        }
        ChannelLayout::Bayer(mosaic) => {
            let mut samples = Vec::with_capacity(pixels);
            for y in 0..height {
                for x in 0..width {
                    let value = at(x).get(bayer_channel(mosaic, x, y)).copied().unwrap_or(0);
                    samples.push(u32::from(value) << shift);
                }
            }
            serialize(&samples, descriptor.storage.sample, descriptor.conversion)
        }
        ChannelLayout::Rgb | ChannelLayout::Bgr | ChannelLayout::Rgba | ChannelLayout::Bgra => {
            let mut samples = Vec::with_capacity(pixels * 4);
            for _ in 0..height {
                for x in 0..width {
                    samples.extend(
                        native_order(descriptor.layout, at(x))
                            .into_iter()
                            .map(|value| u32::from(value) << shift),
                    );
                }
            }
            if descriptor.conversion == Conversion::PlanarToBgr {
                samples = planar(&samples);
            }
            serialize(&samples, descriptor.storage.sample, descriptor.conversion)
        }
        ChannelLayout::Yuv422(order) => {
            let mut out = Vec::with_capacity(pixels * 2);
            for _ in 0..height {
                for x in (0..width).step_by(2) {
                    let [y0, u0, v0] = yuv(at(x));
                    let [y1, u1, v1] = yuv(at(x + 1));
                    let (u, v) = (average(&[u0, u1]), average(&[v0, v1]));
                    match order {
                        YuvOrder::Yuyv => out.extend_from_slice(&[y0, u, y1, v]),
                        YuvOrder::Uyvy => out.extend_from_slice(&[u, y0, v, y1]),
                    }
                }
            }
            out
        }
        ChannelLayout::Yuv411 => {
            let mut out = Vec::with_capacity(pixels * 3 / 2);
            for _ in 0..height {
                for x in (0..width).step_by(4) {
                    let [y0, u0, v0] = yuv(at(x));
                    let [y1, u1, v1] = yuv(at(x + 1));
                    let [y2, u2, v2] = yuv(at(x + 2));
                    let [y3, u3, v3] = yuv(at(x + 3));
                    let u = average(&[u0, u1, u2, u3]);
                    let v = average(&[v0, v1, v2, v3]);
                    out.extend_from_slice(&[u, y0, y1, v, y2, y3]);
                }
            }
            out
        }
        ChannelLayout::Yuv444 => {
            let mut out = Vec::with_capacity(pixels * 3);
            for _ in 0..height {
                for x in 0..width {
                    let [y, u, v] = yuv(at(x));
                    out.extend_from_slice(&[u, y, v]);
                }
            }
            out
        }
        ChannelLayout::Yuv420SemiPlanar => {
            let mut out = Vec::with_capacity(pixels * 3 / 2);
            for _ in 0..height {
                for x in 0..width {
                    out.push(luma(at(x)));
                }
            }
            for _ in 0..height / 2 {
                for x in (0..width).step_by(2) {
                    let [_, u0, v0] = yuv(at(x));
                    let [_, u1, v1] = yuv(at(x + 1));
                    out.extend_from_slice(&[average(&[u0, u1]), average(&[v0, v1])]);
                }
            }
            out
        }
        ChannelLayout::Float3D => {
            let mut out = Vec::with_capacity(pixels * 12);
            for y in 0..height {
                for x in 0..width {
                    #[allow(clippy::cast_precision_loss)]
                    let point = [x as f32, y as f32, f32::from(luma(at(x)))];
                    for value in point {
                        out.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
            out
        }
    };

    data.resize(descriptor.payload_size(width, height), 0);
    data
}

fn yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    rgb_to_yuv(r, g, b)
}

/// Channels of one pixel in the order `layout` stores them.
fn native_order(layout: ChannelLayout, [r, g, b]: [u8; 3]) -> Vec<u8> {
    match layout {
        ChannelLayout::Bgr => vec![b, g, r],
        ChannelLayout::Rgba => vec![r, g, b, u8::MAX],
        ChannelLayout::Bgra => vec![b, g, r, u8::MAX],
        _ => vec![r, g, b],
    }
}

/// Split interleaved RGB samples into R, G and B planes.
fn planar(interleaved: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(interleaved.len());
    for channel in 0..3 {
        out.extend(interleaved.iter().skip(channel).step_by(3));
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn serialize(samples: &[u32], sample: SampleType, conversion: Conversion) -> Vec<u8> {
    match conversion {
        Conversion::Unpack(packing) => pack(samples, packing),
        Conversion::UnpackRgb(packing) => pack_rgb(samples, packing),
        _ => match sample {
            SampleType::U8 => samples.iter().map(|&value| value as u8).collect(),
            SampleType::U16 | SampleType::F32 => samples
                .iter()
                .flat_map(|&value| (value as u16).to_le_bytes())
                .collect(),
        },
    }
}

fn pack(samples: &[u32], packing: Packing) -> Vec<u8> {
    match packing {
        Packing::Lsb10 => pack_lsb(samples, 10),
        Packing::Lsb12 => pack_lsb(samples, 12),
        Packing::Msb10 => pack_msb_pairs(samples, 10),
        Packing::Msb12 => pack_msb_pairs(samples, 12),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pack_rgb(samples: &[u32], packing: RgbPacking) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() / 3 * 4);
    match packing {
        RgbPacking::Rgb10V1 => {
            for rgb in samples.chunks_exact(3) {
                if let [r, g, b] = *rgb {
                    let low = (r & 0x3) | ((g & 0x3) << 2) | ((b & 0x3) << 4);
                    out.extend_from_slice(&[low as u8, (r >> 2) as u8, (g >> 2) as u8, (b >> 2) as u8]);
                }
            }
        }
        RgbPacking::Rgb10V2 => {
            for rgb in samples.chunks_exact(3) {
                if let [r, g, b] = *rgb {
                    out.extend_from_slice(&(b | (g << 10) | (r << 20)).to_le_bytes());
                }
            }
        }
        RgbPacking::Lsb12 => out = pack_lsb(samples, 12),
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn pack_lsb(samples: &[u32], bits: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    let mut acc = 0u32;
    let mut held = 0u32;
    for &sample in samples {
        acc |= sample << held;
        held += bits;
        while held >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            held -= 8;
        }
    }
    if held > 0 {
        out.push(acc as u8);
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn pack_msb_pairs(samples: &[u32], bits: u32) -> Vec<u8> {
    let low_bits = bits - 8;
    let low_mask = (1u32 << low_bits) - 1;
    let mut out = Vec::with_capacity(samples.len() * 2);
    for pair in samples.chunks(2) {
        let first = pair.first().copied().unwrap_or(0);
        let second = pair.get(1).copied().unwrap_or(0);
        out.push((first >> low_bits) as u8);
        out.push(((first & low_mask) | ((second & low_mask) << 4)) as u8);
        out.push((second >> low_bits) as u8);
    }
    out
}
