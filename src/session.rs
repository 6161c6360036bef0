//! Camera session: one opened device, its configuration and streaming state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::acquisition::{AcquisitionStats, FrameHandle, FrameSlot, Grabber, Wakeup};
use crate::config::SystemConfig;
use crate::error::{CameraError, Result};
use crate::image::{materialize, CanonicalImage};
use crate::params::{Binning, BinningMode, ParameterRange, WhiteBalance, WhiteBalanceSupport, BRIGHTNESS_RANGE};
use crate::pixel_format::PixelFormat;
use crate::registry::CameraDescriptor;
use crate::traits::{CameraDevice, StreamConfig};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created and accepting configuration.
    Configuring,
    /// Producing frames.
    Streaming,
    /// Device released; every operation fails.
    Destroyed,
}

struct SessionInner {
    device: Option<Box<dyn CameraDevice>>,
    state: SessionState,
    binning: Binning,
    grabber: Option<Grabber>,
}

impl SessionInner {
    fn device(&self) -> Result<&dyn CameraDevice> {
        match (&self.state, &self.device) {
            (SessionState::Destroyed, _) | (_, None) => Err(CameraError::InvalidHandle),
            (_, Some(device)) => Ok(&**device),
        }
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn CameraDevice>> {
        match (&self.state, &mut self.device) {
            (SessionState::Destroyed, _) | (_, None) => Err(CameraError::InvalidHandle),
            (_, Some(device)) => Ok(device),
        }
    }

    fn require_configuring(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Configuring => Ok(()),
            SessionState::Destroyed => Err(CameraError::InvalidHandle),
            from @ SessionState::Streaming => Err(CameraError::InvalidStateTransition { from, operation }),
        }
    }
}

/// A session owning one physical camera.
///
/// All methods take `&self`; the session serializes configuration on an
/// internal lock and keeps frames in a separate mailbox, so a thread
/// blocked in [`CameraSession::await_new_frame`] never holds the
/// configuration lock.
pub struct CameraSession {
    descriptor: CameraDescriptor,
    inner: Mutex<SessionInner>,
    slot: Arc<FrameSlot>,
    config: SystemConfig,
}

impl CameraSession {
    /// Wrap an opened device in a session in the `Configuring` state.
    pub fn new(descriptor: CameraDescriptor, device: Box<dyn CameraDevice>, config: SystemConfig) -> Self {
        info!(serial = %descriptor.serial, model = %descriptor.model, "Session created");
        Self {
            descriptor,
            inner: Mutex::new(SessionInner {
                device: Some(device),
                state: SessionState::Configuring,
                binning: Binning::NONE,
                grabber: None,
            }),
            slot: Arc::new(FrameSlot::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query<R, F>(&self, read: F) -> Result<R>
    where
        F: FnOnce(&dyn CameraDevice) -> Result<R>,
    {
        let inner = self.lock();
        read(inner.device()?)
    }

    fn update<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut dyn CameraDevice) -> Result<()>,
    {
        let mut inner = self.lock();
        write(&mut **inner.device_mut()?)
    }

    /// Identity of the device this session owns.
    pub const fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    /// Serial of the device this session owns.
    pub fn serial(&self) -> &str {
        &self.descriptor.serial
    }

    /// Current lifecycle state.
    ///
    /// A run whose grab thread gave up on stream errors stays `Streaming`
    /// until [`CameraSession::stop`]; waiters are woken and
    /// [`AcquisitionStats::faulted`] is set.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Begin streaming with the current configuration.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.require_configuring("start")?;

        let binning = inner.binning;
        let device = inner.device_mut()?;
        let stream_config = StreamConfig {
            pixel_format: device.pixel_format()?,
            binning,
            buffer_count: self.config.stream_buffer_count,
        };
        let stream = device.open_stream(&stream_config)?;

        let epoch = self.slot.begin(binning);
        let grabber = Grabber::spawn(
            self.serial(),
            stream,
            Arc::clone(&self.slot),
            epoch,
            self.config.grabber(),
        )
        .inspect_err(|_| self.slot.end())?;

        inner.grabber = Some(grabber);
        inner.state = SessionState::Streaming;
        info!(
            serial = %self.descriptor.serial,
            pixel_format = %stream_config.pixel_format,
            epoch,
            "Acquisition started"
        );
        Ok(())
    }

    /// Stop streaming and wake every waiter.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Streaming => {}
            SessionState::Destroyed => return Err(CameraError::InvalidHandle),
            from @ SessionState::Configuring => {
                return Err(CameraError::InvalidStateTransition {
                    from,
                    operation: "stop",
                })
            }
        }

        self.slot.end();
        if let Some(mut grabber) = inner.grabber.take() {
            grabber.stop();
        }
        inner.state = SessionState::Configuring;
        info!(serial = %self.descriptor.serial, stats = ?self.slot.stats(), "Acquisition stopped");
        Ok(())
    }

    /// Release the device and every retained frame. The session is unusable afterwards.
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == SessionState::Destroyed {
            return Err(CameraError::InvalidHandle);
        }

        inner.state = SessionState::Destroyed;
        self.slot.close();
        if let Some(mut grabber) = inner.grabber.take() {
            grabber.stop();
        }
        inner.device = None;
        info!(serial = %self.descriptor.serial, "Session destroyed");
        Ok(())
    }

    /// Exposure time in microseconds.
    pub fn exposure(&self) -> Result<f64> {
        self.query(|device| device.exposure())
    }

    /// Set the exposure time in microseconds. Turns auto exposure off.
    pub fn set_exposure(&self, micros: f64) -> Result<()> {
        self.update(|device| {
            let micros = supported(device.exposure_range(), "exposure")?.check("exposure", micros)?;
            device.set_exposure(micros)?;
            debug!(serial = %self.descriptor.serial, micros, "Exposure set");
            Ok(())
        })
    }

    /// Accepted exposure times.
    pub fn exposure_range(&self) -> Result<ParameterRange> {
        self.query(|device| Ok(device.exposure_range()))
    }

    /// Whether auto exposure is on.
    pub fn auto_exposure(&self) -> Result<bool> {
        self.query(|device| device.auto_exposure())
    }

    /// Turn auto exposure on or off.
    pub fn set_auto_exposure(&self, enabled: bool) -> Result<()> {
        self.update(|device| {
            device.set_auto_exposure(enabled)?;
            debug!(serial = %self.descriptor.serial, enabled, "Auto exposure set");
            Ok(())
        })
    }

    /// Analog gain.
    pub fn gain(&self) -> Result<f64> {
        self.query(|device| device.gain())
    }

    /// Set the gain. Turns auto gain off.
    pub fn set_gain(&self, gain: f64) -> Result<()> {
        self.update(|device| {
            let gain = supported(device.gain_range(), "gain")?.check("gain", gain)?;
            device.set_gain(gain)?;
            debug!(serial = %self.descriptor.serial, gain, "Gain set");
            Ok(())
        })
    }

    /// Accepted gain values.
    pub fn gain_range(&self) -> Result<ParameterRange> {
        self.query(|device| Ok(device.gain_range()))
    }

    /// Acquisition frame rate.
    pub fn frame_rate(&self) -> Result<f64> {
        self.query(|device| device.frame_rate())
    }

    /// Set the acquisition frame rate.
    pub fn set_frame_rate(&self, fps: f64) -> Result<()> {
        self.update(|device| {
            let fps = supported(device.frame_rate_range(), "frame rate")?.check("frame rate", fps)?;
            device.set_frame_rate(fps)?;
            debug!(serial = %self.descriptor.serial, fps, "Frame rate set");
            Ok(())
        })
    }

    /// Accepted frame rates.
    pub fn frame_rate_range(&self) -> Result<ParameterRange> {
        self.query(|device| Ok(device.frame_rate_range()))
    }

    /// White-balance control the device offers.
    pub fn white_balance_support(&self) -> Result<WhiteBalanceSupport> {
        self.query(|device| Ok(device.white_balance_support()))
    }

    /// Accepted white-balance values, or [`ParameterRange::UNSUPPORTED`].
    pub fn white_balance_range(&self) -> Result<ParameterRange> {
        self.query(|device| {
            Ok(match device.white_balance_support() {
                WhiteBalanceSupport::Unsupported => ParameterRange::UNSUPPORTED,
                WhiteBalanceSupport::Temperature(range) | WhiteBalanceSupport::Ratios(range) => range,
            })
        })
    }

    /// Current manual white balance.
    pub fn white_balance(&self) -> Result<WhiteBalance> {
        self.query(|device| device.white_balance())
    }

    /// Set a manual white balance. Turns auto white balance off.
    pub fn set_white_balance(&self, balance: WhiteBalance) -> Result<()> {
        self.update(|device| {
            balance.check(device.white_balance_support())?;
            device.set_white_balance(balance)?;
            debug!(serial = %self.descriptor.serial, ?balance, "White balance set");
            Ok(())
        })
    }

    /// Whether auto white balance is on.
    pub fn auto_white_balance(&self) -> Result<bool> {
        self.query(|device| device.auto_white_balance())
    }

    /// Turn auto white balance on or off.
    pub fn set_auto_white_balance(&self, enabled: bool) -> Result<()> {
        self.update(|device| {
            if matches!(device.white_balance_support(), WhiteBalanceSupport::Unsupported) {
                return Err(CameraError::rejected("auto white balance", "device has no white balance control"));
            }
            device.set_auto_white_balance(enabled)?;
            debug!(serial = %self.descriptor.serial, enabled, "Auto white balance set");
            Ok(())
        })
    }

    /// Brightness in `[-1.0, 1.0]`.
    pub fn brightness(&self) -> Result<f64> {
        self.query(|device| device.brightness())
    }

    /// Set brightness in `[-1.0, 1.0]`.
    pub fn set_brightness(&self, brightness: f64) -> Result<()> {
        self.update(|device| {
            let brightness = BRIGHTNESS_RANGE.check("brightness", brightness)?;
            device.set_brightness(brightness)?;
            debug!(serial = %self.descriptor.serial, brightness, "Brightness set");
            Ok(())
        })
    }

    /// Pixel formats the device can deliver.
    pub fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        self.query(|device| Ok(device.supported_formats()))
    }

    /// Configured pixel format.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.query(|device| device.pixel_format())
    }

    /// Configure the pixel format. Fails while streaming.
    pub fn set_pixel_format(&self, format: PixelFormat) -> Result<()> {
        let mut inner = self.lock();
        inner.require_configuring("set pixel format")?;
        let device = inner.device_mut()?;
        if !device.supported_formats().contains(&format) {
            return Err(CameraError::rejected(
                "pixel format",
                format!("{format} not offered by device"),
            ));
        }
        device.set_pixel_format(format)?;
        debug!(serial = %self.descriptor.serial, %format, "Pixel format set");
        Ok(())
    }

    /// Configured binning.
    pub fn binning(&self) -> Result<Binning> {
        let inner = self.lock();
        inner.device()?;
        Ok(inner.binning)
    }

    /// Configure binning. Fails while streaming.
    pub fn set_binning(&self, binning: Binning) -> Result<()> {
        let mut inner = self.lock();
        inner.require_configuring("set binning")?;
        let (max_horizontal, max_vertical) = inner.device()?.binning_limits();

        let binning = if binning.mode == BinningMode::None {
            Binning::NONE
        } else {
            Binning::new(binning.mode, binning.horizontal, binning.vertical)?
        };
        if binning.horizontal > max_horizontal || binning.vertical > max_vertical {
            return Err(CameraError::rejected(
                "binning",
                format!(
                    "{}x{} exceeds device limit {max_horizontal}x{max_vertical}",
                    binning.horizontal, binning.vertical
                ),
            ));
        }

        inner.binning = binning;
        debug!(serial = %self.descriptor.serial, ?binning, "Binning set");
        Ok(())
    }

    fn require_live(&self) -> Result<()> {
        if self.lock().state == SessionState::Destroyed {
            Err(CameraError::InvalidHandle)
        } else {
            Ok(())
        }
    }

    /// Block until a frame newer than the last surfaced one arrives.
    ///
    /// Fails with [`CameraError::AcquisitionCancelled`] when the session is
    /// not streaming or is stopped or destroyed during the wait, and with
    /// [`CameraError::AcquisitionTimeout`] when `timeout` elapses.
    pub fn await_new_frame(&self, timeout: Option<Duration>) -> Result<FrameHandle> {
        self.require_live()?;
        match self.slot.await_frame(timeout) {
            Wakeup::Frame(handle) => Ok(handle),
            Wakeup::Cancelled => Err(CameraError::AcquisitionCancelled),
            Wakeup::TimedOut => Err(CameraError::AcquisitionTimeout),
        }
    }

    /// Latest completed frame, without blocking.
    pub fn take_frame(&self) -> Result<Option<FrameHandle>> {
        self.require_live()?;
        Ok(self.slot.take())
    }

    /// Copy the raw bytes behind `frame`.
    pub fn frame_data(&self, frame: &FrameHandle) -> Result<Vec<u8>> {
        self.require_live()?;
        Ok(self.slot.frame(frame)?.data.clone())
    }

    /// Convert `frame` into an owned canonical image.
    pub fn materialize(&self, frame: &FrameHandle) -> Result<CanonicalImage> {
        self.require_live()?;
        let (raw, binning) = self.slot.captured(frame)?;
        materialize(&raw, binning)
    }

    /// Mailbox counters.
    pub fn stats(&self) -> AcquisitionStats {
        self.slot.stats()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut grabber) = inner.grabber.take() {
            grabber.stop();
        }
    }
}

fn supported(range: ParameterRange, parameter: &'static str) -> Result<ParameterRange> {
    if range.is_supported() {
        Ok(range)
    } else {
        Err(CameraError::rejected(parameter, "not supported by device"))
    }
}
