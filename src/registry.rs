//! Device discovery and model resolution.

use std::fmt;

use tracing::{debug, warn};

use crate::traits::{CameraDriver, DeviceInfo};

/// Camera models with dedicated support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownModel {
    /// Basler dart daA1280-54uc, 1280x960 color sensor.
    Daa1280_54uc,
}

impl KnownModel {
    const ALL: [Self; 1] = [Self::Daa1280_54uc];

    /// Model identification string as reported by the device.
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Daa1280_54uc => "daA1280-54uc",
        }
    }

    /// Human-readable product name.
    pub const fn friendly_name(self) -> &'static str {
        match self {
            Self::Daa1280_54uc => "Basler daA1280-54uc",
        }
    }

    /// Full sensor resolution.
    pub const fn sensor_size(self) -> (u32, u32) {
        match self {
            Self::Daa1280_54uc => (1280, 960),
        }
    }

    /// Match a device identification string.
    pub fn from_model_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|model| {
            name.eq_ignore_ascii_case(model.model_name())
                || name.eq_ignore_ascii_case(model.friendly_name())
        })
    }
}

/// Classification of a device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    /// The device was seen but cannot be opened right now.
    Disconnected,
    /// A model with dedicated support.
    Known(KnownModel),
    /// Unrecognized model, or no device with this serial.
    Unknown,
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Known(model) => f.write_str(model.friendly_name()),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Immutable identity of a discoverable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Serial number or name.
    pub serial: String,
    /// Resolved model.
    pub model: CameraModel,
}

impl CameraDescriptor {
    fn from_info(info: &DeviceInfo) -> Self {
        let model = if info.accessible {
            KnownModel::from_model_name(&info.model_name).map_or(CameraModel::Unknown, CameraModel::Known)
        } else {
            CameraModel::Disconnected
        };
        Self {
            serial: info.serial.clone(),
            model,
        }
    }
}

/// Enumerates devices through a driver and classifies them.
pub struct CameraRegistry<'a> {
    driver: &'a dyn CameraDriver,
}

impl<'a> CameraRegistry<'a> {
    /// Create a registry over `driver`.
    pub fn new(driver: &'a dyn CameraDriver) -> Self {
        Self { driver }
    }

    /// List every device the driver reports. Never fails; a driver error
    /// yields an empty list.
    pub fn enumerate(&self) -> Vec<CameraDescriptor> {
        match self.driver.enumerate() {
            Ok(devices) => {
                debug!(driver = self.driver.name(), count = devices.len(), "Enumerated devices");
                devices.iter().map(CameraDescriptor::from_info).collect()
            }
            Err(err) => {
                warn!(driver = self.driver.name(), error = %err, "Device enumeration failed");
                Vec::new()
            }
        }
    }

    /// Find the descriptor for `serial`.
    pub fn find(&self, serial: &str) -> Option<CameraDescriptor> {
        self.enumerate().into_iter().find(|descriptor| descriptor.serial == serial)
    }

    /// Classify `serial`. Serials no device reports resolve to `Unknown`.
    pub fn resolve_model(&self, serial: &str) -> CameraModel {
        self.find(serial).map_or(CameraModel::Unknown, |descriptor| descriptor.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCameraSpec, MockDriver};

    #[test]
    fn test_enumerate_reference_camera() {
        let driver = MockDriver::new(vec![MockCameraSpec::reference("CAM-001")]);
        let registry = CameraRegistry::new(&driver);

        let descriptors = registry.enumerate();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].serial, "CAM-001");
        assert_eq!(descriptors[0].model, CameraModel::Known(KnownModel::Daa1280_54uc));
    }

    #[test]
    fn test_enumerate_empty() {
        let driver = MockDriver::new(Vec::new());
        assert!(CameraRegistry::new(&driver).enumerate().is_empty());
    }

    #[test]
    fn test_resolve_unknown_serial() {
        let driver = MockDriver::new(vec![MockCameraSpec::reference("CAM-001")]);
        let registry = CameraRegistry::new(&driver);
        assert_eq!(registry.resolve_model("not-a-real-serial"), CameraModel::Unknown);
    }

    #[test]
    fn test_resolve_unrecognized_model() {
        let spec = MockCameraSpec::reference("CAM-002").with_model_name("acA640-750um");
        let driver = MockDriver::new(vec![spec]);
        assert_eq!(
            CameraRegistry::new(&driver).resolve_model("CAM-002"),
            CameraModel::Unknown
        );
    }

    #[test]
    fn test_inaccessible_device_is_disconnected() {
        let spec = MockCameraSpec::reference("CAM-003").with_accessible(false);
        let driver = MockDriver::new(vec![spec]);
        assert_eq!(
            CameraRegistry::new(&driver).resolve_model("CAM-003"),
            CameraModel::Disconnected
        );
    }

    #[test]
    fn test_model_name_matching() {
        assert_eq!(
            KnownModel::from_model_name("Basler daA1280-54uc"),
            Some(KnownModel::Daa1280_54uc)
        );
        assert_eq!(KnownModel::from_model_name(" daa1280-54UC "), Some(KnownModel::Daa1280_54uc));
        assert_eq!(KnownModel::from_model_name("vivid"), None);
    }
}
