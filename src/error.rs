//! Error type shared by every camera operation.

use thiserror::Error;

use crate::session::SessionState;

/// Error type for camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// No reachable device carries the given serial.
    #[error("No reachable camera with serial {0:?}")]
    IdentityUnresolved(String),

    /// The handle was never issued, or the session behind it is destroyed.
    #[error("Invalid or destroyed session handle")]
    InvalidHandle,

    /// The operation is not allowed in the current session state.
    #[error("Cannot {operation} while session is {from:?}")]
    InvalidStateTransition {
        /// State the session was in.
        from: SessionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The device refused a parameter value or combination.
    #[error("Device rejected {parameter}: {reason}")]
    DeviceRejectedParameter {
        /// Parameter name.
        parameter: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The pixel format code has no catalog entry.
    #[error("Unsupported pixel format code {0:#x}")]
    UnsupportedFormat(u32),

    /// The frame carried no pixel data.
    #[error("Frame buffer is empty")]
    EmptyBuffer,

    /// The frame is shorter than its declared format and size require.
    #[error("Frame buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes required by the declared format.
        expected: usize,
        /// Bytes actually delivered.
        actual: usize,
    },

    /// The frame dimensions cannot be tiled by the format's conversion.
    #[error("Invalid dimensions {width}x{height} for {format}")]
    InvalidDimensions {
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
        /// Catalog name of the format.
        format: &'static str,
    },

    /// The frame handle refers to a buffer that has since been recycled.
    #[error("Frame buffer was recycled by a later acquisition")]
    StaleFrame,

    /// No frame arrived before the wait deadline.
    #[error("Timed out waiting for a frame")]
    AcquisitionTimeout,

    /// The wait was interrupted by stop or destroy.
    #[error("Frame wait cancelled")]
    AcquisitionCancelled,

    /// Driver-level failure.
    #[error("Device error: {0}")]
    Device(String),

    /// Error during a streaming operation.
    #[error("Stream error: {0}")]
    Stream(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Shorthand for a [`CameraError::DeviceRejectedParameter`].
    pub fn rejected<S: Into<String>>(parameter: &'static str, reason: S) -> Self {
        Self::DeviceRejectedParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
