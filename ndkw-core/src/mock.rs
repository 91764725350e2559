//! In-process capture backend.
//!
//! Serves a fixed, editable list of endpoints. Captured audio is whatever the
//! caller pushes through a [`MockCaptureHandle`], delivered synchronously on
//! the caller's thread the way an OS audio thread would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::device::{Device, DeviceKind};
use crate::models::error::CaptureError;
use crate::models::format::WaveFormat;
use crate::traits::capture_provider::{CaptureCallback, CaptureProvider};
use crate::traits::device_directory::{DeviceChangeCallback, DeviceDirectory};

#[derive(Default)]
pub struct MockDirectory {
    devices: Mutex<Vec<(Device, WaveFormat)>>,
    watchers: Mutex<Vec<DeviceChangeCallback>>,
    handles: Mutex<HashMap<String, MockCaptureHandle>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = (Device, WaveFormat)>) -> Self {
        Self {
            devices: Mutex::new(devices.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Add or replace an endpoint and notify watchers.
    pub fn add_device(&self, device: Device, format: WaveFormat) {
        {
            let mut devices = self.devices.lock();
            devices.retain(|(d, _)| d.id != device.id);
            devices.push((device, format));
        }
        self.notify();
    }

    /// Remove an endpoint. Watchers are notified only if it existed.
    pub fn remove_device(&self, id: &str) -> bool {
        let removed = {
            let mut devices = self.devices.lock();
            let before = devices.len();
            devices.retain(|(d, _)| d.id != id);
            devices.len() != before
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Handle of the most recent capture opened for `id`.
    pub fn handle(&self, id: &str) -> Option<MockCaptureHandle> {
        self.handles.lock().get(id).cloned()
    }

    fn notify(&self) {
        let watchers = self.watchers.lock().clone();
        for watcher in watchers {
            watcher();
        }
    }
}

impl DeviceDirectory for MockDirectory {
    fn list_devices(&self) -> Result<Vec<Device>, CaptureError> {
        Ok(self.devices.lock().iter().map(|(d, _)| d.clone()).collect())
    }

    fn default_device(&self, kind: DeviceKind) -> Result<Option<Device>, CaptureError> {
        Ok(self
            .devices
            .lock()
            .iter()
            .find(|(d, _)| d.kind == kind)
            .map(|(d, _)| d.clone()))
    }

    fn open_capture(&self, device: &Device) -> Result<Box<dyn CaptureProvider>, CaptureError> {
        let format = self
            .devices
            .lock()
            .iter()
            .find(|(d, _)| d.id == device.id)
            .map(|(_, f)| *f)
            .ok_or_else(|| CaptureError::UnknownDevice(device.id.clone()))?;

        let handle = MockCaptureHandle::default();
        self.handles.lock().insert(device.id.clone(), handle.clone());
        Ok(Box::new(MockCapture {
            device: device.clone(),
            format,
            handle,
        }))
    }

    fn watch(&self, on_change: DeviceChangeCallback) -> Result<(), CaptureError> {
        self.watchers.lock().push(on_change);
        Ok(())
    }
}

#[derive(Default)]
struct MockShared {
    callback: RwLock<Option<CaptureCallback>>,
    stops: AtomicUsize,
}

/// Feeds synthetic buffers into a running [`MockCapture`].
#[derive(Clone, Default)]
pub struct MockCaptureHandle {
    shared: Arc<MockShared>,
}

impl MockCaptureHandle {
    /// Deliver `data` to the capture callback. Returns `false` once stopped.
    pub fn inject(&self, data: &[u8]) -> bool {
        let callback = self.shared.callback.read();
        match callback.as_ref() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.callback.read().is_some()
    }

    pub fn stop_count(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }
}

pub struct MockCapture {
    device: Device,
    format: WaveFormat,
    handle: MockCaptureHandle,
}

impl CaptureProvider for MockCapture {
    fn device(&self) -> &Device {
        &self.device
    }

    fn format(&self) -> WaveFormat {
        self.format
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<(), CaptureError> {
        let mut slot = self.handle.shared.callback.write();
        if slot.is_some() {
            return Err(CaptureError::ConfigurationFailed("capture already started".into()));
        }
        *slot = Some(callback);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        // Waits for in-flight injections to return.
        self.handle.shared.callback.write().take();
        self.handle.shared.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
