//! Process-wide camera system and its handle-based operations.
//!
//! [`CameraSystem`] owns the driver and an arena of sessions. Every
//! operation takes a [`SessionHandle`]. Getters and frame acquisition report
//! failures through sentinels (`-1.0`, `false`, `None`) so callers can poll
//! safely while another thread tears a session down; lifecycle operations
//! and setters return `Result` so configuration mistakes stay visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionStats, FrameHandle};
use crate::config::SystemConfig;
use crate::error::{CameraError, Result};
use crate::handle::{SessionArena, SessionHandle};
use crate::image::CanonicalImage;
use crate::params::{Binning, ParameterRange, WhiteBalance, WhiteBalanceSupport};
use crate::pixel_format::PixelFormat;
use crate::registry::{CameraDescriptor, CameraModel, CameraRegistry};
use crate::session::{CameraSession, SessionState};
use crate::traits::CameraDriver;

/// Sentinel returned by numeric getters on an unusable handle.
pub const INVALID_VALUE: f64 = -1.0;

/// Entry point owning a driver and every session opened through it.
pub struct CameraSystem {
    driver: Arc<dyn CameraDriver>,
    config: SystemConfig,
    sessions: RwLock<SessionArena<CameraSession>>,
    shut_down: AtomicBool,
}

impl CameraSystem {
    /// Validate `config` and initialize `driver`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRejectedParameter` for an invalid configuration, or
    /// whatever the driver reports when it fails to initialize.
    pub fn initialize(driver: Arc<dyn CameraDriver>, config: SystemConfig) -> Result<Self> {
        config.validate()?;
        driver.initialize()?;
        info!(driver = driver.name(), ?config, "Camera system initialized");
        Ok(Self {
            driver,
            config,
            sessions: RwLock::new(SessionArena::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Configuration every session is created with.
    pub const fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Whether [`CameraSystem::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, SessionArena<CameraSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, SessionArena<CameraSession>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Typed access to the session behind `handle`.
    pub fn session(&self, handle: SessionHandle) -> Option<Arc<CameraSession>> {
        self.read_sessions().get(handle)
    }

    fn resolve(&self, handle: SessionHandle) -> Result<Arc<CameraSession>> {
        self.session(handle).ok_or(CameraError::InvalidHandle)
    }

    fn get_or<R, F>(&self, handle: SessionHandle, sentinel: R, read: F) -> R
    where
        F: FnOnce(&CameraSession) -> Result<R>,
    {
        match self.resolve(handle).and_then(|session| read(&session)) {
            Ok(value) => value,
            Err(err) => {
                debug!(%handle, error = %err, "Getter returned sentinel");
                sentinel
            }
        }
    }

    fn apply<F>(&self, handle: SessionHandle, operation: &'static str, write: F) -> Result<()>
    where
        F: FnOnce(&CameraSession) -> Result<()>,
    {
        self.resolve(handle)
            .and_then(|session| write(&session))
            .inspect_err(|err| warn!(%handle, operation, error = %err, "Operation rejected"))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.read_sessions().len()
    }

    /// Registry over this system's driver.
    pub fn registry(&self) -> CameraRegistry<'_> {
        CameraRegistry::new(self.driver.as_ref())
    }

    /// Every device the driver reports. Empty after shutdown.
    pub fn enumerate(&self) -> Vec<CameraDescriptor> {
        if self.is_shut_down() {
            return Vec::new();
        }
        self.registry().enumerate()
    }

    /// Classify `serial`; anything unrecognized is `Unknown`.
    pub fn resolve_model(&self, serial: &str) -> CameraModel {
        if self.is_shut_down() {
            return CameraModel::Unknown;
        }
        self.registry().resolve_model(serial)
    }

    /// Open a session for `serial`.
    ///
    /// Returns [`SessionHandle::NULL`] when the serial is unknown or
    /// unreachable, when another live session already owns the device, or
    /// after shutdown.
    pub fn create(&self, serial: &str) -> SessionHandle {
        match self.try_create(serial) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(serial, error = %err, "Session not created");
                SessionHandle::NULL
            }
        }
    }

    fn owned(&self, serial: &str) -> bool {
        self.read_sessions()
            .values()
            .any(|session| session.serial() == serial)
    }

    fn try_create(&self, serial: &str) -> Result<SessionHandle> {
        if self.is_shut_down() {
            return Err(CameraError::InvalidHandle);
        }
        if self.owned(serial) {
            return Err(CameraError::Device(format!("{serial} is owned by another session")));
        }

        let descriptor = self
            .registry()
            .find(serial)
            .ok_or_else(|| CameraError::IdentityUnresolved(serial.to_owned()))?;
        if descriptor.model == CameraModel::Disconnected {
            return Err(CameraError::IdentityUnresolved(serial.to_owned()));
        }
        let device = self.driver.open(serial)?;

        let mut sessions = self.write_sessions();
        // Re-check under the write lock; a concurrent create may have won.
        if self.is_shut_down() {
            return Err(CameraError::InvalidHandle);
        }
        if sessions.values().any(|session| session.serial() == serial) {
            return Err(CameraError::Device(format!("{serial} is owned by another session")));
        }
        let handle = sessions.insert(Arc::new(CameraSession::new(descriptor, device, self.config)));
        drop(sessions);

        debug!(serial, %handle, "Session handle issued");
        Ok(handle)
    }

    /// Begin streaming.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, a session already streaming, or a
    /// configuration the device rejects.
    pub fn start(&self, handle: SessionHandle) -> Result<()> {
        self.apply(handle, "start", CameraSession::start)
    }

    /// Stop streaming and wake every waiter.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or a session that is not streaming.
    pub fn stop(&self, handle: SessionHandle) -> Result<()> {
        self.apply(handle, "stop", CameraSession::stop)
    }

    /// Release the session and its device. The handle never resolves again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` for an unknown or already destroyed handle.
    pub fn destroy(&self, handle: SessionHandle) -> Result<()> {
        // The arena entry keeps the serial owned until the device is released.
        let result = self.resolve(handle).and_then(|session| session.destroy());
        match &result {
            Ok(()) => {
                self.write_sessions().remove(handle);
            }
            Err(err) => warn!(%handle, error = %err, "Destroy rejected"),
        }
        result
    }

    /// Lifecycle state of the session.
    pub fn state(&self, handle: SessionHandle) -> Option<SessionState> {
        self.session(handle).map(|session| session.state())
    }

    /// Exposure time in microseconds, or [`INVALID_VALUE`].
    pub fn exposure(&self, handle: SessionHandle) -> f64 {
        self.get_or(handle, INVALID_VALUE, CameraSession::exposure)
    }

    /// Set the exposure time in microseconds.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or a value outside the device range.
    pub fn set_exposure(&self, handle: SessionHandle, micros: f64) -> Result<()> {
        self.apply(handle, "set exposure", |session| session.set_exposure(micros))
    }

    /// Shortest exposure time, or [`INVALID_VALUE`].
    pub fn min_exposure(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::exposure_range).min
    }

    /// Longest exposure time, or [`INVALID_VALUE`].
    pub fn max_exposure(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::exposure_range).max
    }

    fn range<F>(&self, handle: SessionHandle, read: F) -> ParameterRange
    where
        F: FnOnce(&CameraSession) -> Result<ParameterRange>,
    {
        self.get_or(handle, ParameterRange::UNSUPPORTED, read)
    }

    /// Whether auto exposure is on. `false` for an unusable handle.
    pub fn auto_exposure(&self, handle: SessionHandle) -> bool {
        self.get_or(handle, false, CameraSession::auto_exposure)
    }

    /// Turn auto exposure on or off.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or when the device refuses.
    pub fn set_auto_exposure(&self, handle: SessionHandle, enabled: bool) -> Result<()> {
        self.apply(handle, "set auto exposure", |session| session.set_auto_exposure(enabled))
    }

    /// Gain, or [`INVALID_VALUE`].
    pub fn gain(&self, handle: SessionHandle) -> f64 {
        self.get_or(handle, INVALID_VALUE, CameraSession::gain)
    }

    /// Set the gain.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or a value outside the device range.
    pub fn set_gain(&self, handle: SessionHandle, gain: f64) -> Result<()> {
        self.apply(handle, "set gain", |session| session.set_gain(gain))
    }

    /// Lowest gain, or [`INVALID_VALUE`].
    pub fn min_gain(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::gain_range).min
    }

    /// Highest gain, or [`INVALID_VALUE`].
    pub fn max_gain(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::gain_range).max
    }

    /// Frame rate in frames per second, or [`INVALID_VALUE`].
    pub fn frame_rate(&self, handle: SessionHandle) -> f64 {
        self.get_or(handle, INVALID_VALUE, CameraSession::frame_rate)
    }

    /// Set the frame rate.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or a value outside the device range.
    pub fn set_frame_rate(&self, handle: SessionHandle, fps: f64) -> Result<()> {
        self.apply(handle, "set frame rate", |session| session.set_frame_rate(fps))
    }

    /// Lowest frame rate, or [`INVALID_VALUE`].
    pub fn min_frame_rate(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::frame_rate_range).min
    }

    /// Highest frame rate, or [`INVALID_VALUE`].
    pub fn max_frame_rate(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::frame_rate_range).max
    }

    /// White-balance control the device offers.
    pub fn white_balance_support(&self, handle: SessionHandle) -> WhiteBalanceSupport {
        self.get_or(handle, WhiteBalanceSupport::Unsupported, CameraSession::white_balance_support)
    }

    /// Current manual white balance.
    pub fn white_balance(&self, handle: SessionHandle) -> Option<WhiteBalance> {
        self.get_or(handle, None, |session| session.white_balance().map(Some))
    }

    /// Set a manual white balance.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, a value whose shape the device does not
    /// take, or a value outside its range.
    pub fn set_white_balance(&self, handle: SessionHandle, balance: WhiteBalance) -> Result<()> {
        self.apply(handle, "set white balance", |session| session.set_white_balance(balance))
    }

    /// Lower white-balance bound. Both bounds are [`INVALID_VALUE`] when the
    /// device has no white-balance control.
    pub fn min_white_balance(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::white_balance_range).min
    }

    /// Upper white-balance bound, or [`INVALID_VALUE`].
    pub fn max_white_balance(&self, handle: SessionHandle) -> f64 {
        self.range(handle, CameraSession::white_balance_range).max
    }

    /// Whether auto white balance is on. `false` for an unusable handle.
    pub fn auto_white_balance(&self, handle: SessionHandle) -> bool {
        self.get_or(handle, false, CameraSession::auto_white_balance)
    }

    /// Turn auto white balance on or off.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle or a device without white balance.
    pub fn set_auto_white_balance(&self, handle: SessionHandle, enabled: bool) -> Result<()> {
        self.apply(handle, "set auto white balance", |session| {
            session.set_auto_white_balance(enabled)
        })
    }

    /// Brightness in `[-1.0, 1.0]`. `None` since `-1.0` is a valid value.
    pub fn brightness(&self, handle: SessionHandle) -> Option<f64> {
        self.get_or(handle, None, |session| session.brightness().map(Some))
    }

    /// Set brightness in `[-1.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, a value outside the range, or a device
    /// without brightness control.
    pub fn set_brightness(&self, handle: SessionHandle, brightness: f64) -> Result<()> {
        self.apply(handle, "set brightness", |session| session.set_brightness(brightness))
    }

    /// Pixel formats the device can deliver. Empty for an unusable handle.
    pub fn supported_formats(&self, handle: SessionHandle) -> Vec<PixelFormat> {
        self.get_or(handle, Vec::new(), CameraSession::supported_formats)
    }

    /// Configured pixel format.
    pub fn pixel_format(&self, handle: SessionHandle) -> Option<PixelFormat> {
        self.get_or(handle, None, |session| session.pixel_format().map(Some))
    }

    /// Configure the pixel format.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, while streaming, or for a format the
    /// device does not offer.
    pub fn set_pixel_format(&self, handle: SessionHandle, format: PixelFormat) -> Result<()> {
        self.apply(handle, "set pixel format", |session| session.set_pixel_format(format))
    }

    /// Configured binning.
    pub fn binning(&self, handle: SessionHandle) -> Option<Binning> {
        self.get_or(handle, None, |session| session.binning().map(Some))
    }

    /// Configure binning.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, while streaming, or for factors beyond
    /// the device limits.
    pub fn set_binning(&self, handle: SessionHandle, binning: Binning) -> Result<()> {
        self.apply(handle, "set binning", |session| session.set_binning(binning))
    }

    /// Block until a new frame arrives.
    ///
    /// `timeout` of `None` uses [`SystemConfig::default_await_timeout`].
    /// Returns `None` on timeout, when the session stops or is destroyed
    /// during the wait, or for an unusable handle.
    pub fn await_new_frame(&self, handle: SessionHandle, timeout: Option<Duration>) -> Option<FrameHandle> {
        let timeout = timeout.or(self.config.default_await_timeout);
        self.get_or(handle, None, |session| session.await_new_frame(timeout).map(Some))
    }

    /// Latest completed frame, without blocking.
    pub fn take_frame(&self, handle: SessionHandle) -> Option<FrameHandle> {
        self.get_or(handle, None, CameraSession::take_frame)
    }

    /// Copy the raw bytes behind `frame`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, or with `StaleFrame` once a newer
    /// frame has replaced `frame`.
    pub fn frame_data(&self, handle: SessionHandle, frame: &FrameHandle) -> Result<Vec<u8>> {
        self.resolve(handle)?.frame_data(frame)
    }

    /// Convert `frame` into an owned canonical image.
    ///
    /// # Errors
    ///
    /// Fails for an unknown handle, a stale frame, or any materializer error.
    pub fn materialize(&self, handle: SessionHandle, frame: &FrameHandle) -> Result<CanonicalImage> {
        self.resolve(handle)?.materialize(frame)
    }

    /// Mailbox counters of the session.
    pub fn stats(&self, handle: SessionHandle) -> Option<AcquisitionStats> {
        self.session(handle).map(|session| session.stats())
    }

    /// Destroy every session and terminate the driver. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let sessions = self.write_sessions().drain();
        let count = sessions.len();
        for session in sessions {
            if let Err(err) = session.destroy() {
                debug!(serial = session.serial(), error = %err, "Session already destroyed");
            }
        }
        self.driver.terminate();
        info!(driver = self.driver.name(), sessions = count, "Camera system shut down");
    }
}

impl Drop for CameraSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
