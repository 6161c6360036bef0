//! Process-wide configuration.

use std::time::Duration;

use crate::acquisition::GrabberConfig;
use crate::error::{CameraError, Result};

/// Tuning shared by every session of a [`CameraSystem`](crate::CameraSystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// How long the grab thread blocks on the device per poll.
    pub grab_poll_interval: Duration,
    /// Consecutive stream errors after which a grab thread gives up.
    pub max_consecutive_grab_errors: u32,
    /// Driver buffers allocated per stream.
    pub stream_buffer_count: u32,
    /// Timeout used by `await_new_frame` when the caller passes none.
    /// `None` waits until a frame arrives or the session stops.
    pub default_await_timeout: Option<Duration>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            grab_poll_interval: Duration::from_millis(100),
            max_consecutive_grab_errors: 10,
            stream_buffer_count: 4,
            default_await_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl SystemConfig {
    /// Set the grab poll interval.
    #[must_use]
    pub const fn with_grab_poll_interval(mut self, interval: Duration) -> Self {
        self.grab_poll_interval = interval;
        self
    }

    /// Set the grab error limit.
    #[must_use]
    pub const fn with_max_consecutive_grab_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_grab_errors = limit;
        self
    }

    /// Set the stream buffer count.
    #[must_use]
    pub const fn with_stream_buffer_count(mut self, count: u32) -> Self {
        self.stream_buffer_count = count;
        self
    }

    /// Set the default await timeout.
    #[must_use]
    pub const fn with_default_await_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_await_timeout = timeout;
        self
    }

    /// Reject settings that would stall or starve acquisition.
    pub fn validate(&self) -> Result<()> {
        if self.grab_poll_interval.is_zero() {
            return Err(CameraError::rejected("grab_poll_interval", "must be non-zero"));
        }
        if self.stream_buffer_count == 0 {
            return Err(CameraError::rejected("stream_buffer_count", "must be non-zero"));
        }
        if self.max_consecutive_grab_errors == 0 {
            return Err(CameraError::rejected(
                "max_consecutive_grab_errors",
                "must be non-zero",
            ));
        }
        Ok(())
    }

    pub(crate) const fn grabber(&self) -> GrabberConfig {
        GrabberConfig {
            poll_interval: self.grab_poll_interval,
            max_consecutive_errors: self.max_consecutive_grab_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream_buffer_count, 4);
        assert_eq!(config.default_await_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = SystemConfig::default().with_grab_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SystemConfig::default().with_stream_buffer_count(0);
        assert!(config.validate().is_err());

        let config = SystemConfig::default().with_max_consecutive_grab_errors(0);
        assert!(config.validate().is_err());
    }
}
