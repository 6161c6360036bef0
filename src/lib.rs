//! Areascan-Capture: session, acquisition and pixel-format handling for
//! industrial area-scan cameras.
//!
//! A [`CameraSystem`] owns a [`CameraDriver`] and hands out generation-tagged
//! [`SessionHandle`]s. Each session configures one device, streams frames
//! into a single-slot mailbox, and materializes them into owned
//! [`CanonicalImage`]s through the pixel-format catalog.
//!
//! Two backends ship: [`device::V4l2Driver`] for V4L2 devices and
//! [`mock::MockDriver`] for simulated cameras.

pub mod acquisition;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod handle;
pub mod image;
pub mod logging;
pub mod mock;
pub mod params;
pub mod pixel_format;
pub mod registry;
pub mod session;
pub mod system;
pub mod traits;
pub mod validation;

pub use acquisition::{AcquisitionStats, FrameHandle};
pub use config::SystemConfig;
pub use device::V4l2Driver;
pub use error::{CameraError, Result};
pub use handle::SessionHandle;
pub use image::{materialize, CanonicalImage};
pub use params::{Binning, BinningMode, ParameterRange, WhiteBalance, WhiteBalanceSupport};
pub use pixel_format::{FormatCode, PixelFormat, PixelFormatDescriptor};
pub use registry::{CameraDescriptor, CameraModel, KnownModel};
pub use session::{CameraSession, SessionState};
pub use system::CameraSystem;
pub use traits::{CameraDevice, CameraDriver, CaptureStream, DeviceInfo, RawFrame};
