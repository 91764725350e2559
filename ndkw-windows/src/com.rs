//! COM apartment scope and MMDevice helpers shared by enumeration and capture.

use windows::core::{BSTR, PCWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use ndkw_core::models::error::CaptureError;

use crate::mix_format::{MixFormat, SUBFORMAT_OFFSET, WAVE_FORMAT_EXTENSIBLE};

/// Joins the multithreaded apartment for the current thread.
///
/// A thread already in a single-threaded apartment keeps it; COM calls still
/// work there, and no matching `CoUninitialize` is owed.
pub(crate) struct ComScope {
    owned: bool,
}

impl ComScope {
    pub(crate) fn enter() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            Ok(Self { owned: true })
        } else if hr == RPC_E_CHANGED_MODE {
            Ok(Self { owned: false })
        } else {
            Err(CaptureError::Backend(format!("CoInitializeEx failed: {}", hr)))
        }
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

pub(crate) fn enumerator() -> Result<IMMDeviceEnumerator, CaptureError> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(|e| CaptureError::Backend(format!("failed to create device enumerator: {}", e)))
}

pub(crate) fn device_by_id(enumerator: &IMMDeviceEnumerator, id: &str) -> Result<IMMDevice, CaptureError> {
    let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe { enumerator.GetDevice(PCWSTR(wide.as_ptr())) }.map_err(|_| CaptureError::DeviceNotAvailable)
}

/// Endpoint id string, freeing the COM allocation.
pub(crate) fn device_id(device: &IMMDevice) -> Result<String, CaptureError> {
    unsafe {
        let raw = device
            .GetId()
            .map_err(|e| CaptureError::Backend(format!("GetId failed: {}", e)))?;
        let id = raw.to_string();
        CoTaskMemFree(Some(raw.0 as *const _));
        id.map_err(|e| CaptureError::Backend(format!("endpoint id is not UTF-16: {}", e)))
    }
}

pub(crate) fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        BSTR::try_from(&value).ok().map(|name| name.to_string())
    }
}

/// Read the shared-mode mix format of `client` and release the COM allocation.
pub(crate) fn mix_format(client: &IAudioClient) -> Result<MixFormat, CaptureError> {
    unsafe {
        let raw = client
            .GetMixFormat()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
        let header = *raw;
        let sub_format = (header.wFormatTag == WAVE_FORMAT_EXTENSIBLE && header.cbSize >= 22).then(|| {
            // SAFETY: cbSize >= 22 means the allocation is a full WAVEFORMATEXTENSIBLE.
            std::ptr::read_unaligned((raw as *const u8).add(SUBFORMAT_OFFSET) as *const u32) as u16
        });
        let format = MixFormat {
            format_tag: header.wFormatTag,
            channels: header.nChannels,
            sample_rate: header.nSamplesPerSec,
            bits_per_sample: header.wBitsPerSample,
            sub_format,
        };
        CoTaskMemFree(Some(raw as *const _));
        Ok(format)
    }
}

/// Active endpoint ids for one data flow.
pub(crate) fn endpoint_ids(enumerator: &IMMDeviceEnumerator, flow: EDataFlow) -> Result<Vec<String>, CaptureError> {
    unsafe {
        let collection = enumerator
            .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
            .map_err(|e| CaptureError::Backend(format!("EnumAudioEndpoints failed: {}", e)))?;
        let count = collection
            .GetCount()
            .map_err(|e| CaptureError::Backend(format!("GetCount failed: {}", e)))?;

        let mut ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            if let Ok(device) = collection.Item(i) {
                if let Ok(id) = device_id(&device) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}
