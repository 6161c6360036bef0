//! Camera parameter types.

use std::fmt;

use crate::error::{CameraError, Result};

/// Inclusive range a device accepts for a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    /// Smallest accepted value.
    pub min: f64,
    /// Largest accepted value.
    pub max: f64,
}

impl ParameterRange {
    /// Range reported when the device cannot provide one.
    pub const UNSUPPORTED: Self = Self {
        min: -1.0,
        max: -1.0,
    };

    /// Create a range.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether the device reported a usable range.
    pub fn is_supported(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max && *self != Self::UNSUPPORTED
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Reject `value` unless it lies inside the range.
    pub fn check(&self, parameter: &'static str, value: f64) -> Result<f64> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(CameraError::rejected(
                parameter,
                format!("{value} outside [{}, {}]", self.min, self.max),
            ))
        }
    }
}

impl fmt::Display for ParameterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Range accepted by the brightness control.
pub const BRIGHTNESS_RANGE: ParameterRange = ParameterRange::new(-1.0, 1.0);

/// White-balance control a device offers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalanceSupport {
    /// No manual white balance.
    Unsupported,
    /// Color temperature in Kelvin.
    Temperature(ParameterRange),
    /// Per-channel gain ratios for red, green and blue.
    Ratios(ParameterRange),
}

/// Manual white-balance setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalance {
    /// Color temperature in Kelvin.
    Temperature(f64),
    /// Red, green and blue gain ratios.
    Ratios([f64; 3]),
}

impl WhiteBalance {
    /// Validate this setting against what the device offers.
    pub fn check(&self, support: WhiteBalanceSupport) -> Result<()> {
        match (self, support) {
            (Self::Temperature(kelvin), WhiteBalanceSupport::Temperature(range)) => {
                range.check("white balance temperature", *kelvin).map(|_| ())
            }
            (Self::Ratios(ratios), WhiteBalanceSupport::Ratios(range)) => ratios
                .iter()
                .try_for_each(|ratio| range.check("white balance ratio", *ratio).map(|_| ())),
            (_, WhiteBalanceSupport::Unsupported) => Err(CameraError::rejected(
                "white balance",
                "device has no manual white balance",
            )),
            (Self::Temperature(_), WhiteBalanceSupport::Ratios(_)) => Err(CameraError::rejected(
                "white balance",
                "device takes gain ratios, not a temperature",
            )),
            (Self::Ratios(_), WhiteBalanceSupport::Temperature(_)) => Err(CameraError::rejected(
                "white balance",
                "device takes a temperature, not gain ratios",
            )),
        }
    }
}

/// How binned pixels are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinningMode {
    /// No binning.
    #[default]
    None,
    /// Mean of each block.
    Average,
    /// Sum of each block, widened to 16 bits and saturated.
    Sum,
}

impl BinningMode {
    /// Map the legacy numeric mode: `0` averages, `1` sums.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Average),
            1 => Ok(Self::Sum),
            other => Err(CameraError::rejected(
                "binning mode",
                format!("unknown mode {other}"),
            )),
        }
    }
}

/// Binning configuration applied to every materialized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binning {
    /// Combination mode.
    pub mode: BinningMode,
    /// Horizontal factor.
    pub horizontal: u32,
    /// Vertical factor.
    pub vertical: u32,
}

impl Binning {
    /// Binning disabled.
    pub const NONE: Self = Self {
        mode: BinningMode::None,
        horizontal: 1,
        vertical: 1,
    };

    /// Create a binning configuration, rejecting zero factors.
    pub fn new(mode: BinningMode, horizontal: u32, vertical: u32) -> Result<Self> {
        if horizontal == 0 || vertical == 0 {
            return Err(CameraError::rejected(
                "binning",
                format!("factors must be positive, got {horizontal}x{vertical}"),
            ));
        }
        Ok(Self {
            mode,
            horizontal,
            vertical,
        })
    }

    /// Whether applying this configuration changes the image.
    pub const fn is_active(&self) -> bool {
        !matches!(self.mode, BinningMode::None) && (self.horizontal > 1 || self.vertical > 1)
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_check() {
        let range = ParameterRange::new(0.0, 24.0);
        assert!(range.check("gain", 12.0).is_ok());
        assert!(range.check("gain", 0.0).is_ok());
        assert!(range.check("gain", 24.0).is_ok());
        assert!(range.check("gain", 24.5).is_err());
        assert!(range.check("gain", f64::NAN).is_err());
    }

    #[test]
    fn test_unsupported_range() {
        assert!(!ParameterRange::UNSUPPORTED.is_supported());
        assert!(ParameterRange::new(1.0, 54.0).is_supported());
    }

    #[test]
    fn test_white_balance_shape_must_match() {
        let ratios = WhiteBalanceSupport::Ratios(ParameterRange::new(1.0, 15.98));
        assert!(WhiteBalance::Ratios([1.5, 1.0, 2.0]).check(ratios).is_ok());
        assert!(WhiteBalance::Ratios([1.5, 0.5, 2.0]).check(ratios).is_err());
        assert!(WhiteBalance::Temperature(5600.0).check(ratios).is_err());
        assert!(WhiteBalance::Temperature(5600.0)
            .check(WhiteBalanceSupport::Unsupported)
            .is_err());
    }

    #[test]
    fn test_binning() {
        assert!(Binning::new(BinningMode::Average, 0, 2).is_err());
        let binning = Binning::new(BinningMode::Sum, 2, 2).expect("valid binning");
        assert!(binning.is_active());
        assert!(!Binning::NONE.is_active());
        assert_eq!(BinningMode::from_code(0).ok(), Some(BinningMode::Average));
        assert_eq!(BinningMode::from_code(1).ok(), Some(BinningMode::Sum));
        assert!(BinningMode::from_code(7).is_err());
    }
}
