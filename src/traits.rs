//! Driver seam between the session layer and a camera backend.
//!
//! A backend provides a [`CameraDriver`] that enumerates and opens devices,
//! a [`CameraDevice`] per opened camera, and a [`CaptureStream`] while the
//! device is streaming. The session layer owns all state-machine and
//! buffering logic; backends only talk to hardware.

use std::time::Duration;

use crate::error::Result;
use crate::params::{Binning, ParameterRange, WhiteBalance, WhiteBalanceSupport};
use crate::pixel_format::{FormatCode, PixelFormat};

/// Identity of a discoverable device as reported by its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial number, or a stable name when the device has none.
    pub serial: String,
    /// Model identification string.
    pub model_name: String,
    /// Driver that reported the device.
    pub driver: String,
    /// Whether the device can currently be opened.
    pub accessible: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A frame as delivered by the device, copied out of driver memory.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Raw frame bytes.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Declared pixel format.
    pub format: FormatCode,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Parameters a stream is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Pixel format the device should deliver.
    pub pixel_format: PixelFormat,
    /// Binning the frames will be materialized with.
    pub binning: Binning,
    /// Number of driver buffers to allocate.
    pub buffer_count: u32,
}

/// Process-wide entry point of a camera backend.
pub trait CameraDriver: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Acquire driver-level resources. Called once before any other method.
    fn initialize(&self) -> Result<()>;

    /// Release driver-level resources. Called once at shutdown.
    fn terminate(&self);

    /// List every device the driver can see.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open the device with the given serial.
    fn open(&self, serial: &str) -> Result<Box<dyn CameraDevice>>;
}

/// An opened camera.
///
/// Range accessors return [`ParameterRange::UNSUPPORTED`] when the device
/// has no such control. Setters may assume the value was range-checked.
pub trait CameraDevice: Send {
    /// Identity of this device.
    fn info(&self) -> &DeviceInfo;

    /// Full sensor size in pixels.
    fn sensor_size(&self) -> (u32, u32);

    /// Exposure time in microseconds.
    fn exposure(&self) -> Result<f64>;
    /// Set the exposure time in microseconds and turn auto exposure off.
    fn set_exposure(&mut self, micros: f64) -> Result<()>;
    /// Accepted exposure times in microseconds.
    fn exposure_range(&self) -> ParameterRange;

    /// Whether auto exposure is on.
    fn auto_exposure(&self) -> Result<bool>;
    /// Turn auto exposure on or off.
    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()>;

    /// Analog gain.
    fn gain(&self) -> Result<f64>;
    /// Set the gain and turn auto gain off.
    fn set_gain(&mut self, gain: f64) -> Result<()>;
    /// Accepted gain values.
    fn gain_range(&self) -> ParameterRange;

    /// Acquisition frame rate in frames per second.
    fn frame_rate(&self) -> Result<f64>;
    /// Set the acquisition frame rate.
    fn set_frame_rate(&mut self, fps: f64) -> Result<()>;
    /// Accepted frame rates.
    fn frame_rate_range(&self) -> ParameterRange;

    /// Manual white-balance control this device offers.
    fn white_balance_support(&self) -> WhiteBalanceSupport;
    /// Current manual white balance.
    fn white_balance(&self) -> Result<WhiteBalance>;
    /// Set a manual white balance and turn auto white balance off.
    fn set_white_balance(&mut self, balance: WhiteBalance) -> Result<()>;

    /// Whether auto white balance is on.
    fn auto_white_balance(&self) -> Result<bool>;
    /// Turn auto white balance on or off.
    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()>;

    /// Brightness in `[-1.0, 1.0]`.
    fn brightness(&self) -> Result<f64>;
    /// Set brightness in `[-1.0, 1.0]`.
    fn set_brightness(&mut self, brightness: f64) -> Result<()>;

    /// Pixel formats the device can deliver.
    fn supported_formats(&self) -> Vec<PixelFormat>;
    /// Pixel format the device is configured for.
    fn pixel_format(&self) -> Result<PixelFormat>;
    /// Configure the delivered pixel format.
    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()>;

    /// Largest horizontal and vertical binning factors.
    fn binning_limits(&self) -> (u32, u32);

    /// Validate `config` and start streaming.
    fn open_stream(&mut self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>>;
}

/// A running stream. Dropping it stops streaming.
pub trait CaptureStream: Send {
    /// Wait up to `timeout` for the next completed frame.
    ///
    /// Returns `Ok(None)` when nothing completed within the window.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>>;
}
