use std::sync::Arc;

use crate::models::device::{Device, DeviceKind};
use crate::models::error::CaptureError;
use crate::traits::capture_provider::CaptureProvider;

/// Invoked whenever the set of active endpoints changes.
pub type DeviceChangeCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Enumeration and capture factory for the host's audio endpoints.
pub trait DeviceDirectory: Send + Sync {
    /// All active endpoints, inputs and outputs.
    fn list_devices(&self) -> Result<Vec<Device>, CaptureError>;

    fn default_device(&self, kind: DeviceKind) -> Result<Option<Device>, CaptureError>;

    fn find_device(&self, id: &str) -> Result<Option<Device>, CaptureError> {
        Ok(self.list_devices()?.into_iter().find(|device| device.id == id))
    }

    /// Open a capture stream for `device` without starting it.
    fn open_capture(&self, device: &Device) -> Result<Box<dyn CaptureProvider>, CaptureError>;

    /// Register for device-change notifications.
    fn watch(&self, on_change: DeviceChangeCallback) -> Result<(), CaptureError>;
}
