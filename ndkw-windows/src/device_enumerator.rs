//! Windows audio endpoint directory via the MMDevice API.
//!
//! COM objects are created per call on the calling thread, so the directory
//! itself holds no apartment-bound state and can be shared freely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::Win32::Media::Audio::*;

use ndkw_core::models::error::CaptureError;
use ndkw_core::{CaptureProvider, Device, DeviceChangeCallback, DeviceDirectory, DeviceKind};

use crate::com::{self, ComScope};
use crate::wasapi_capture::WasapiCapture;

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

fn data_flow(kind: DeviceKind) -> EDataFlow {
    match kind {
        DeviceKind::Input => eCapture,
        DeviceKind::Output => eRender,
    }
}

struct Watcher {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// [`DeviceDirectory`] over the active WASAPI capture and render endpoints.
pub struct WasapiDirectory {
    callbacks: Arc<Mutex<Vec<DeviceChangeCallback>>>,
    watcher: Mutex<Option<Watcher>>,
}

impl WasapiDirectory {
    /// Checks that the MMDevice API is reachable.
    pub fn new() -> Result<Self, CaptureError> {
        let _com = ComScope::enter()?;
        com::enumerator()?;
        Ok(Self {
            callbacks: Arc::new(Mutex::new(Vec::new())),
            watcher: Mutex::new(None),
        })
    }

    fn list_kind(enumerator: &IMMDeviceEnumerator, kind: DeviceKind) -> Result<Vec<Device>, CaptureError> {
        let mut devices = Vec::new();
        for id in com::endpoint_ids(enumerator, data_flow(kind))? {
            let Ok(device) = com::device_by_id(enumerator, &id) else {
                continue;
            };
            let name = com::friendly_name(&device).unwrap_or_else(|| id.clone());
            devices.push(Device::new(id, name, kind));
        }
        Ok(devices)
    }

    fn spawn_watcher(&self) -> Result<Watcher, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::clone(&self.callbacks);
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("wasapi-device-watch".into())
            .spawn(move || {
                let _com = match ComScope::enter() {
                    Ok(scope) => scope,
                    Err(e) => {
                        log::error!("Device watch disabled: {}", e);
                        return;
                    }
                };
                let mut known = endpoint_fingerprint();
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(WATCH_INTERVAL);
                    let current = endpoint_fingerprint();
                    if current != known {
                        log::info!("Audio endpoints changed");
                        known = current;
                        let listeners = callbacks.lock().clone();
                        for listener in listeners {
                            listener();
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Backend(format!("failed to spawn device watch thread: {}", e)))?;

        Ok(Watcher { stop, thread })
    }
}

/// Sorted ids of every active endpoint. Empty on enumeration failure.
fn endpoint_fingerprint() -> Vec<String> {
    let Ok(enumerator) = com::enumerator() else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for flow in [eCapture, eRender] {
        match com::endpoint_ids(&enumerator, flow) {
            Ok(found) => ids.extend(found),
            Err(e) => log::warn!("Endpoint poll failed: {}", e),
        }
    }
    ids.sort();
    ids
}

impl DeviceDirectory for WasapiDirectory {
    fn list_devices(&self) -> Result<Vec<Device>, CaptureError> {
        let _com = ComScope::enter()?;
        let enumerator = com::enumerator()?;
        let mut devices = Self::list_kind(&enumerator, DeviceKind::Input)?;
        devices.extend(Self::list_kind(&enumerator, DeviceKind::Output)?);
        Ok(devices)
    }

    fn default_device(&self, kind: DeviceKind) -> Result<Option<Device>, CaptureError> {
        let _com = ComScope::enter()?;
        let enumerator = com::enumerator()?;
        let Ok(device) = (unsafe { enumerator.GetDefaultAudioEndpoint(data_flow(kind), eConsole) }) else {
            return Ok(None);
        };
        let id = com::device_id(&device)?;
        let name = com::friendly_name(&device).unwrap_or_else(|| id.clone());
        Ok(Some(Device::new(id, name, kind)))
    }

    fn open_capture(&self, device: &Device) -> Result<Box<dyn CaptureProvider>, CaptureError> {
        Ok(Box::new(WasapiCapture::open(device.clone())?))
    }

    fn watch(&self, on_change: DeviceChangeCallback) -> Result<(), CaptureError> {
        self.callbacks.lock().push(on_change);
        let mut watcher = self.watcher.lock();
        if watcher.is_none() {
            *watcher = Some(self.spawn_watcher()?);
        }
        Ok(())
    }
}

impl Drop for WasapiDirectory {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop.store(true, Ordering::SeqCst);
            if watcher.thread.join().is_err() {
                log::warn!("Device watch thread panicked");
            }
        }
    }
}
