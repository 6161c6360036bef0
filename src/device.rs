//! V4L2 backend using the v4l crate.
//!
//! Every capture-capable `/dev/video*` node is a device. The bus-info string
//! serves as the serial and the card name as the model name. Parameters map
//! onto the standard user and camera-class controls; frames stream through
//! mmap buffers.

use std::time::Duration;

use tracing::{debug, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::context::Node;
use v4l::control::{Control, Description, MenuItem, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC, Fraction};

use crate::error::{CameraError, Result};
use crate::params::{ParameterRange, WhiteBalance, WhiteBalanceSupport};
use crate::pixel_format::{FormatCode, PixelFormat};
use crate::traits::{
    CameraDevice, CameraDriver, CaptureStream, DeviceInfo, FrameMetadata, RawFrame, StreamConfig,
};

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_GAIN: u32 = 0x0098_0913;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// `V4L2_EXPOSURE_MANUAL` entry of the exposure-auto menu.
const EXPOSURE_MANUAL: i64 = 1;
/// Auto modes in order of preference: full auto, then aperture priority.
const EXPOSURE_AUTO_MODES: [i64; 2] = [0, 3];
/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs units.
const EXPOSURE_UNIT_MICROS: f64 = 100.0;

/// Binning is done by the materializer, so any factor up to this works.
const BINNING_LIMIT: u32 = 4;

/// FOURCCs with a catalog row.
const FOURCC_MAP: [(&[u8; 4], PixelFormat); 25] = [
    (b"GREY", PixelFormat::Mono8),
    (b"Y10 ", PixelFormat::Mono10),
    (b"Y12 ", PixelFormat::Mono12),
    (b"Y16 ", PixelFormat::Mono16),
    (b"BA81", PixelFormat::BayerBg8),
    (b"GBRG", PixelFormat::BayerGb8),
    (b"GRBG", PixelFormat::BayerGr8),
    (b"RGGB", PixelFormat::BayerRg8),
    (b"BG10", PixelFormat::BayerBg10),
    (b"GB10", PixelFormat::BayerGb10),
    (b"BA10", PixelFormat::BayerGr10),
    (b"RG10", PixelFormat::BayerRg10),
    (b"BG12", PixelFormat::BayerBg12),
    (b"GB12", PixelFormat::BayerGb12),
    (b"BA12", PixelFormat::BayerGr12),
    (b"RG12", PixelFormat::BayerRg12),
    (b"BYR2", PixelFormat::BayerBg16),
    (b"GB16", PixelFormat::BayerGb16),
    (b"GR16", PixelFormat::BayerGr16),
    (b"RG16", PixelFormat::BayerRg16),
    (b"RGB3", PixelFormat::Rgb8),
    (b"BGR3", PixelFormat::Bgr8),
    (b"YUYV", PixelFormat::Yuv422),
    (b"UYVY", PixelFormat::Yuv422Uyvy),
    (b"NV12", PixelFormat::Ycbcr420SemiPlanar),
];

/// FOURCCs for formats several catalog rows share with [`FOURCC_MAP`].
const FOURCC_ALIASES: [(&[u8; 4], PixelFormat); 4] = [
    (b"AB24", PixelFormat::Rgba8Packed),
    (b"AR24", PixelFormat::Bgra8Packed),
    (b"YUYV", PixelFormat::Yuv422Packed),
    (b"UYVY", PixelFormat::Ycbcr422),
];

/// Catalog entry for a V4L2 FOURCC.
pub fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    FOURCC_MAP
        .iter()
        .chain(FOURCC_ALIASES.iter())
        .find(|(code, _)| FourCC::new(code) == fourcc)
        .map(|&(_, format)| format)
}

/// V4L2 FOURCC delivering a catalog entry.
pub fn fourcc_for(format: PixelFormat) -> Option<FourCC> {
    FOURCC_MAP
        .iter()
        .chain(FOURCC_ALIASES.iter())
        .find(|&&(_, entry)| entry == format)
        .map(|(code, _)| FourCC::new(code))
}

/// Format code a frame in `fourcc` is declared with. FOURCCs without a
/// catalog row pass through as their raw value.
fn format_code(fourcc: FourCC) -> FormatCode {
    pixel_format_for(fourcc).map_or_else(|| FormatCode(u32::from(fourcc)), FormatCode::from)
}

fn device_error(err: &std::io::Error) -> CameraError {
    CameraError::Device(err.to_string())
}

/// Driver over the kernel's V4L2 device nodes.
#[derive(Debug, Default)]
pub struct V4l2Driver;

impl V4l2Driver {
    /// Create the driver.
    pub const fn new() -> Self {
        Self
    }

    /// Open `node` and describe it, skipping nodes that cannot capture.
    fn probe(node: &Node) -> Option<(Device, DeviceInfo)> {
        let device = match Device::with_path(node.path()) {
            Ok(device) => device,
            Err(err) => {
                debug!(path = %node.path().display(), error = %err, "Cannot open video node");
                return None;
            }
        };
        let caps = device.query_caps().ok()?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            trace!(path = %node.path().display(), "Skipping non-capture node");
            return None;
        }

        let info = DeviceInfo {
            serial: caps.bus,
            model_name: caps.card,
            driver: caps.driver,
            accessible: caps.capabilities.contains(Flags::STREAMING),
        };
        Some((device, info))
    }
}

impl CameraDriver for V4l2Driver {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn terminate(&self) {}

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices: Vec<DeviceInfo> = Vec::new();
        for node in v4l::context::enum_devices() {
            if let Some((_, info)) = Self::probe(&node) {
                // Metadata nodes of the same device share its bus info.
                if devices.iter().all(|known| known.serial != info.serial) {
                    devices.push(info);
                }
            }
        }
        Ok(devices)
    }

    fn open(&self, serial: &str) -> Result<Box<dyn CameraDevice>> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(Node::index);

        let (device, info) = nodes
            .iter()
            .filter_map(Self::probe)
            .find(|(_, info)| info.serial == serial)
            .ok_or_else(|| CameraError::IdentityUnresolved(serial.to_owned()))?;
        if !info.accessible {
            return Err(CameraError::Device(format!("{serial} does not support streaming")));
        }

        let camera = V4l2Camera::new(device, info)?;
        debug!(serial, card = %camera.info.model_name, "Opened V4L2 device");
        Ok(Box::new(camera))
    }
}

/// An opened V4L2 capture device.
pub struct V4l2Camera {
    device: Device,
    info: DeviceInfo,
    controls: Vec<Description>,
    sensor: (u32, u32),
}

impl V4l2Camera {
    fn new(device: Device, info: DeviceInfo) -> Result<Self> {
        let controls = device.query_controls().unwrap_or_else(|err| {
            warn!(serial = %info.serial, error = %err, "Cannot query controls");
            Vec::new()
        });
        let format = device.format().map_err(|err| device_error(&err))?;
        let sensor = largest_frame_size(&device, format.fourcc).unwrap_or((format.width, format.height));

        Ok(Self {
            device,
            info,
            controls,
            sensor,
        })
    }

    fn control_description(&self, id: u32) -> Option<&Description> {
        self.controls.iter().find(|control| control.id == id)
    }

    #[allow(clippy::cast_precision_loss)]
    fn control_range(&self, id: u32) -> ParameterRange {
        self.control_description(id).map_or(ParameterRange::UNSUPPORTED, |control| {
            ParameterRange::new(control.minimum as f64, control.maximum as f64)
        })
    }

    fn read_control(&self, id: u32, parameter: &'static str) -> Result<i64> {
        if self.control_description(id).is_none() {
            return Err(CameraError::rejected(parameter, "device has no such control"));
        }
        let control = self.device.control(id).map_err(|err| device_error(&err))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            other => Err(CameraError::Device(format!(
                "unexpected {parameter} control value {other:?}"
            ))),
        }
    }

    fn write_control(&self, id: u32, parameter: &'static str, value: Value) -> Result<()> {
        if self.control_description(id).is_none() {
            return Err(CameraError::rejected(parameter, "device has no such control"));
        }
        self.device
            .set_control(Control { id, value })
            .map_err(|err| CameraError::rejected(parameter, err.to_string()))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_integer(&self, id: u32, parameter: &'static str, value: f64) -> Result<()> {
        self.write_control(id, parameter, Value::Integer(value.round() as i64))
    }

    /// Exposure-auto menu entries the device offers.
    fn exposure_modes(&self) -> Vec<i64> {
        self.control_description(CID_EXPOSURE_AUTO)
            .and_then(|control| control.items.as_ref())
            .map(|items| {
                items
                    .iter()
                    .map(|(index, item)| match item {
                        MenuItem::Value(value) => *value,
                        MenuItem::Name(_) => i64::from(*index),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn current_format(&self) -> Result<Format> {
        self.device.format().map_err(|err| device_error(&err))
    }
}

fn largest_frame_size(device: &Device, fourcc: FourCC) -> Option<(u32, u32)> {
    device
        .enum_framesizes(fourcc)
        .ok()?
        .into_iter()
        .map(|size| match size.size {
            FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
            FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
        })
        .max_by_key(|&(width, height)| u64::from(width) * u64::from(height))
}

fn fps(interval: Fraction) -> Option<f64> {
    (interval.numerator > 0 && interval.denominator > 0)
        .then(|| f64::from(interval.denominator) / f64::from(interval.numerator))
}

impl CameraDevice for V4l2Camera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn sensor_size(&self) -> (u32, u32) {
        self.sensor
    }

    #[allow(clippy::cast_precision_loss)]
    fn exposure(&self) -> Result<f64> {
        let units = self.read_control(CID_EXPOSURE_ABSOLUTE, "exposure")?;
        Ok(units as f64 * EXPOSURE_UNIT_MICROS)
    }

    fn set_exposure(&mut self, micros: f64) -> Result<()> {
        if self.control_description(CID_EXPOSURE_AUTO).is_some() {
            self.write_control(CID_EXPOSURE_AUTO, "auto exposure", Value::Integer(EXPOSURE_MANUAL))?;
        }
        self.write_integer(CID_EXPOSURE_ABSOLUTE, "exposure", micros / EXPOSURE_UNIT_MICROS)
    }

    fn exposure_range(&self) -> ParameterRange {
        let units = self.control_range(CID_EXPOSURE_ABSOLUTE);
        if units.is_supported() {
            ParameterRange::new(units.min * EXPOSURE_UNIT_MICROS, units.max * EXPOSURE_UNIT_MICROS)
        } else {
            units
        }
    }

    fn auto_exposure(&self) -> Result<bool> {
        Ok(self.read_control(CID_EXPOSURE_AUTO, "auto exposure")? != EXPOSURE_MANUAL)
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()> {
        let mode = if enabled {
            let offered = self.exposure_modes();
            EXPOSURE_AUTO_MODES
                .into_iter()
                .find(|mode| offered.contains(mode))
                .ok_or_else(|| CameraError::rejected("auto exposure", "no automatic mode offered"))?
        } else {
            EXPOSURE_MANUAL
        };
        self.write_control(CID_EXPOSURE_AUTO, "auto exposure", Value::Integer(mode))
    }

    #[allow(clippy::cast_precision_loss)]
    fn gain(&self) -> Result<f64> {
        Ok(self.read_control(CID_GAIN, "gain")? as f64)
    }

    fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.write_integer(CID_GAIN, "gain", gain)
    }

    fn gain_range(&self) -> ParameterRange {
        self.control_range(CID_GAIN)
    }

    fn frame_rate(&self) -> Result<f64> {
        let params = self.device.params().map_err(|err| device_error(&err))?;
        fps(params.interval).ok_or_else(|| CameraError::Device("device reports no frame interval".to_owned()))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_frame_rate(&mut self, rate: f64) -> Result<()> {
        let interval = Fraction::new(1000, (rate * 1000.0).round() as u32);
        let applied = self
            .device
            .set_params(&Parameters::new(interval))
            .map_err(|err| CameraError::rejected("frame rate", err.to_string()))?;
        debug!(serial = %self.info.serial, requested = rate, applied = ?fps(applied.interval), "Frame interval set");
        Ok(())
    }

    fn frame_rate_range(&self) -> ParameterRange {
        let Ok(format) = self.current_format() else {
            return ParameterRange::UNSUPPORTED;
        };
        let Ok(intervals) = self
            .device
            .enum_frameintervals(format.fourcc, format.width, format.height)
        else {
            return ParameterRange::UNSUPPORTED;
        };

        let mut rates = Vec::new();
        for interval in intervals {
            match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => rates.extend(fps(fraction)),
                FrameIntervalEnum::Stepwise(stepwise) => {
                    rates.extend(fps(stepwise.min));
                    rates.extend(fps(stepwise.max));
                }
            }
        }
        let min = rates.iter().copied().reduce(f64::min);
        let max = rates.iter().copied().reduce(f64::max);
        match (min, max) {
            (Some(min), Some(max)) => ParameterRange::new(min, max),
            _ => ParameterRange::UNSUPPORTED,
        }
    }

    fn white_balance_support(&self) -> WhiteBalanceSupport {
        let range = self.control_range(CID_WHITE_BALANCE_TEMPERATURE);
        if range.is_supported() {
            WhiteBalanceSupport::Temperature(range)
        } else {
            WhiteBalanceSupport::Unsupported
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn white_balance(&self) -> Result<WhiteBalance> {
        let kelvin = self.read_control(CID_WHITE_BALANCE_TEMPERATURE, "white balance")?;
        Ok(WhiteBalance::Temperature(kelvin as f64))
    }

    fn set_white_balance(&mut self, balance: WhiteBalance) -> Result<()> {
        let WhiteBalance::Temperature(kelvin) = balance else {
            return Err(CameraError::rejected("white balance", "device takes a color temperature"));
        };
        if self.control_description(CID_AUTO_WHITE_BALANCE).is_some() {
            self.write_control(CID_AUTO_WHITE_BALANCE, "auto white balance", Value::Boolean(false))?;
        }
        self.write_integer(CID_WHITE_BALANCE_TEMPERATURE, "white balance", kelvin)
    }

    fn auto_white_balance(&self) -> Result<bool> {
        Ok(self.read_control(CID_AUTO_WHITE_BALANCE, "auto white balance")? != 0)
    }

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()> {
        self.write_control(CID_AUTO_WHITE_BALANCE, "auto white balance", Value::Boolean(enabled))
    }

    #[allow(clippy::cast_precision_loss)]
    fn brightness(&self) -> Result<f64> {
        let range = self.control_range(CID_BRIGHTNESS);
        let raw = self.read_control(CID_BRIGHTNESS, "brightness")? as f64;
        let span = range.max - range.min;
        if span <= 0.0 {
            return Ok(0.0);
        }
        Ok(((raw - range.min) / span).mul_add(2.0, -1.0))
    }

    fn set_brightness(&mut self, brightness: f64) -> Result<()> {
        let range = self.control_range(CID_BRIGHTNESS);
        let raw = ((brightness + 1.0) / 2.0).mul_add(range.max - range.min, range.min);
        self.write_integer(CID_BRIGHTNESS, "brightness", raw)
    }

    fn supported_formats(&self) -> Vec<PixelFormat> {
        match self.device.enum_formats() {
            Ok(descriptions) => descriptions
                .into_iter()
                .filter_map(|description| pixel_format_for(description.fourcc))
                .collect(),
            Err(err) => {
                warn!(serial = %self.info.serial, error = %err, "Cannot enumerate formats");
                Vec::new()
            }
        }
    }

    fn pixel_format(&self) -> Result<PixelFormat> {
        let format = self.current_format()?;
        pixel_format_for(format.fourcc).ok_or(CameraError::UnsupportedFormat(u32::from(format.fourcc)))
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        let fourcc = fourcc_for(format)
            .ok_or_else(|| CameraError::rejected("pixel format", format!("{format} has no V4L2 FOURCC")))?;
        let mut current = self.current_format()?;
        current.fourcc = fourcc;
        let applied = self
            .device
            .set_format(&current)
            .map_err(|err| CameraError::rejected("pixel format", err.to_string()))?;
        if applied.fourcc != fourcc {
            return Err(CameraError::rejected(
                "pixel format",
                format!("driver substituted {}", applied.fourcc),
            ));
        }
        Ok(())
    }

    fn binning_limits(&self) -> (u32, u32) {
        (BINNING_LIMIT, BINNING_LIMIT)
    }

    fn open_stream(&mut self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>> {
        let fourcc = fourcc_for(config.pixel_format).ok_or_else(|| {
            CameraError::rejected("pixel format", format!("{} has no V4L2 FOURCC", config.pixel_format))
        })?;
        let (width, height) = self.sensor;
        let mut format = self.current_format()?;
        format.width = width;
        format.height = height;
        format.fourcc = fourcc;
        let format = self
            .device
            .set_format(&format)
            .map_err(|err| CameraError::rejected("pixel format", err.to_string()))?;

        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, config.buffer_count)
            .map_err(|err| CameraError::Stream(err.to_string()))?;

        debug!(
            serial = %self.info.serial,
            fourcc = %format.fourcc,
            width = format.width,
            height = format.height,
            buffers = config.buffer_count,
            "V4L2 stream opened"
        );
        Ok(Box::new(V4l2Stream {
            stream,
            width: format.width,
            height: format.height,
            format: format_code(format.fourcc),
        }))
    }
}

/// Mmap capture stream. Dropping it turns streaming off.
pub struct V4l2Stream {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: FormatCode,
}

impl CaptureStream for V4l2Stream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        self.stream.set_timeout(timeout);
        let (buf, meta) = match self.stream.next() {
            Ok(frame) => frame,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(err) => return Err(CameraError::Stream(err.to_string())),
        };

        // V4L2 timestamps are never negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = usize::try_from(meta.bytesused).unwrap_or(usize::MAX);
        let data = buf.get(..used).filter(|data| !data.is_empty()).unwrap_or(buf);

        Ok(Some(RawFrame {
            data: data.to_vec(),
            width: self.width,
            height: self.height,
            format: self.format,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip() {
        for (code, format) in FOURCC_MAP {
            assert_eq!(fourcc_for(format), Some(FourCC::new(code)), "{format}");
            assert_eq!(pixel_format_for(FourCC::new(code)), Some(format));
        }
    }

    #[test]
    fn test_alias_formats_have_fourcc() {
        assert_eq!(fourcc_for(PixelFormat::Yuv422Packed), Some(FourCC::new(b"YUYV")));
        assert_eq!(fourcc_for(PixelFormat::Bgra8Packed), Some(FourCC::new(b"AR24")));
        assert_eq!(fourcc_for(PixelFormat::Mono10p), None);
    }

    #[test]
    fn test_unmapped_fourcc_passes_through() {
        let fourcc = FourCC::new(b"MJPG");
        assert_eq!(format_code(fourcc), FormatCode(u32::from(fourcc)));
        assert!(crate::pixel_format::lookup(format_code(fourcc)).is_err());
    }

    #[test]
    fn test_mapped_fourcc_uses_catalog_code() {
        assert_eq!(
            format_code(FourCC::new(b"GREY")),
            FormatCode(PixelFormat::Mono8.code())
        );
    }

    #[test]
    fn test_fps_from_interval() {
        assert_eq!(fps(Fraction::new(1, 30)), Some(30.0));
        assert_eq!(fps(Fraction::new(1001, 30000)).map(f64::round), Some(30.0));
        assert_eq!(fps(Fraction::new(0, 30)), None);
    }
}
