//! WASAPI capture provider for input and output endpoints.
//!
//! Inputs are captured directly in shared mode. Outputs are captured with
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`; an endpoint with nothing playing delivers
//! no loopback packets, so a silent render stream is kept running on the
//! same endpoint for the lifetime of the capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use ndkw_core::models::error::CaptureError;
use ndkw_core::{CaptureCallback, CaptureProvider, Device, DeviceKind, WaveFormat};

use crate::com::{self, ComScope};

/// 100 ms in 100 ns units.
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct WasapiCapture {
    device: Device,
    format: WaveFormat,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WasapiCapture {
    /// Resolve `device` and read its mix format. Capture starts in
    /// [`CaptureProvider::start`].
    pub fn open(device: Device) -> Result<Self, CaptureError> {
        let _com = ComScope::enter()?;
        let enumerator = com::enumerator()?;
        let endpoint = com::device_by_id(&enumerator, &device.id)?;
        let client: IAudioClient = unsafe { endpoint.Activate(CLSCTX_ALL, None) }
            .map_err(|e| CaptureError::ConfigurationFailed(format!("Activate failed: {}", e)))?;
        let format = com::mix_format(&client)?.to_wave_format()?;

        log::info!(
            "Opened {} endpoint {:?}: {} Hz, {} ch, {} bit {:?}",
            device.kind,
            device.name,
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            format.encoding
        );
        Ok(Self {
            device,
            format,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }
}

impl CaptureProvider for WasapiCapture {
    fn device(&self) -> &Device {
        &self.device
    }

    fn format(&self) -> WaveFormat {
        self.format
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Err(CaptureError::ConfigurationFailed("capture already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device_id = self.device.id.clone();
        let loopback = self.device.kind == DeviceKind::Output;
        let block_align = self.format.block_align() as usize;
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("wasapi-capture-{}", self.device.kind))
            .spawn(move || capture_thread(&device_id, loopback, block_align, &running, &callback, ready_tx))
            .map_err(|e| CaptureError::Backend(format!("failed to spawn capture thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Backend("capture thread exited during setup".into())));
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            if handle.join().is_err() {
                log::warn!("Capture thread panicked during setup");
            }
            return Err(e);
        }

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| CaptureError::Backend("capture thread panicked".into()))?;
            log::info!("Stopped capture of {:?}", self.device.name);
        }
        Ok(())
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
    }
}

fn capture_thread(
    device_id: &str,
    loopback: bool,
    block_align: usize,
    running: &AtomicBool,
    callback: &CaptureCallback,
    ready: mpsc::Sender<Result<(), CaptureError>>,
) {
    let stream = ComScope::enter().and_then(|scope| {
        let stream = unsafe { Stream::open(device_id, loopback, block_align)? };
        Ok((scope, stream))
    });
    let (_com, stream) = match stream {
        Ok(opened) => {
            // The receiver only goes away if `start` already returned.
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = unsafe { stream.pump(running, callback) } {
        log::error!("Capture of {} failed: {}", device_id, e);
    }
    unsafe { stream.shut_down() };
}

/// Silent playback keeping a render endpoint active during loopback.
struct SilentRender {
    client: IAudioClient,
    render: IAudioRenderClient,
    buffer_frames: u32,
}

impl SilentRender {
    unsafe fn open(endpoint: &IMMDevice) -> Result<Self, CaptureError> {
        let client: IAudioClient = endpoint
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("render Activate failed: {}", e)))?;
        let format = client
            .GetMixFormat()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("render GetMixFormat failed: {}", e)))?;
        let initialized = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            BUFFER_DURATION,
            0,
            format,
            None,
        );
        CoTaskMemFree(Some(format as *const _));
        initialized
            .map_err(|e| CaptureError::ConfigurationFailed(format!("render Initialize failed: {}", e)))?;

        let render: IAudioRenderClient = client
            .GetService()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("render GetService failed: {}", e)))?;
        let buffer_frames = client
            .GetBufferSize()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetBufferSize failed: {}", e)))?;

        let silent = Self {
            client,
            render,
            buffer_frames,
        };
        silent.top_up()?;
        silent
            .client
            .Start()
            .map_err(|e| CaptureError::Backend(format!("render Start failed: {}", e)))?;
        Ok(silent)
    }

    /// Fill whatever the endpoint has consumed with silence.
    unsafe fn top_up(&self) -> Result<(), CaptureError> {
        let padding = self
            .client
            .GetCurrentPadding()
            .map_err(|e| CaptureError::Backend(format!("GetCurrentPadding failed: {}", e)))?;
        let free = self.buffer_frames.saturating_sub(padding);
        if free == 0 {
            return Ok(());
        }
        self.render
            .GetBuffer(free)
            .map_err(|e| CaptureError::Backend(format!("render GetBuffer failed: {}", e)))?;
        self.render
            .ReleaseBuffer(free, AUDCLNT_BUFFERFLAGS_SILENT.0 as u32)
            .map_err(|e| CaptureError::Backend(format!("render ReleaseBuffer failed: {}", e)))
    }
}

/// COM objects of one running capture. Lives on the capture thread only.
struct Stream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    block_align: usize,
    silent: Option<SilentRender>,
}

impl Stream {
    unsafe fn open(device_id: &str, loopback: bool, block_align: usize) -> Result<Self, CaptureError> {
        let enumerator = com::enumerator()?;
        let endpoint = com::device_by_id(&enumerator, device_id)?;

        // Render side first so loopback has packets from the start.
        let silent = if loopback {
            Some(SilentRender::open(&endpoint)?)
        } else {
            None
        };

        let client: IAudioClient = endpoint
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("Activate failed: {}", e)))?;
        let format = client
            .GetMixFormat()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;

        let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
        if loopback {
            flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
        }
        let initialized = client.Initialize(AUDCLNT_SHAREMODE_SHARED, flags, BUFFER_DURATION, 0, format, None);
        CoTaskMemFree(Some(format as *const _));
        initialized.map_err(|e| CaptureError::ConfigurationFailed(format!("IAudioClient::Initialize failed: {}", e)))?;

        let capture: IAudioCaptureClient = client
            .GetService()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetService failed: {}", e)))?;

        let mut task_index = 0u32;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        if AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index).is_err() {
            log::debug!("MMCSS registration unavailable");
        }

        client
            .Start()
            .map_err(|e| CaptureError::Backend(format!("IAudioClient::Start failed: {}", e)))?;

        Ok(Self {
            client,
            capture,
            block_align,
            silent,
        })
    }

    /// Drain packets until `running` clears.
    unsafe fn pump(&self, running: &AtomicBool, callback: &CaptureCallback) -> Result<(), CaptureError> {
        let mut silence = Vec::new();
        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            if let Some(silent) = &self.silent {
                silent.top_up()?;
            }

            let mut packet = self
                .capture
                .GetNextPacketSize()
                .map_err(|e| CaptureError::Backend(format!("GetNextPacketSize failed: {}", e)))?;

            while packet > 0 {
                let mut data: *mut u8 = std::ptr::null_mut();
                let mut frames = 0u32;
                let mut flags = 0u32;
                self.capture
                    .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                    .map_err(|e| CaptureError::Backend(format!("GetBuffer failed: {}", e)))?;

                let len = frames as usize * self.block_align;
                if len > 0 {
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
                        silence.resize(len, 0);
                        callback(&silence[..len]);
                    } else {
                        callback(std::slice::from_raw_parts(data, len));
                    }
                }

                self.capture
                    .ReleaseBuffer(frames)
                    .map_err(|e| CaptureError::Backend(format!("ReleaseBuffer failed: {}", e)))?;
                packet = self
                    .capture
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::Backend(format!("GetNextPacketSize failed: {}", e)))?;
            }
        }
        Ok(())
    }

    unsafe fn shut_down(&self) {
        if let Err(e) = self.client.Stop() {
            log::debug!("IAudioClient::Stop failed: {}", e);
        }
        if let Some(silent) = &self.silent {
            if let Err(e) = silent.client.Stop() {
                log::debug!("render Stop failed: {}", e);
            }
        }
    }
}
