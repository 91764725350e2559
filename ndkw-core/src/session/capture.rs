use std::borrow::Cow;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::{CacheBackingKind, RecorderConfiguration};
use crate::models::device::Device;
use crate::models::error::CaptureError;
use crate::models::format::WaveFormat;
use crate::models::session::DeviceSessionFile;
use crate::processing::ring_cache::{CacheBacking, RingCache};
use crate::processing::wav_format::{self, MAX_WAV_DATA_SIZE};
use crate::storage::wave_writer::WaveFileWriter;
use crate::traits::capture_provider::{CaptureCallback, CaptureProvider};

/// Where incoming audio goes while a snapshot is being taken.
#[derive(Default)]
struct Gate {
    paused: bool,
    overflow: Option<Vec<u8>>,
}

/// State shared between the capture callback and the orchestrator.
///
/// Lock order is always `gate` then `ring`.
struct Shared {
    device: Device,
    source_format: WaveFormat,
    format: WaveFormat,
    active: AtomicBool,
    gate: Mutex<Gate>,
    ring: Mutex<BufWriter<RingCache<CacheBacking>>>,
    failed_callbacks: AtomicU64,
}

impl Shared {
    fn accept(&self, data: &[u8]) -> io::Result<()> {
        if !self.active.load(Ordering::Acquire) || data.is_empty() {
            return Ok(());
        }
        let data = if self.source_format.channels > self.format.channels {
            Cow::Owned(wav_format::limit_channels(data, &self.source_format, self.format.channels))
        } else {
            Cow::Borrowed(data)
        };

        let mut gate = self.gate.lock();
        if gate.paused {
            gate.overflow.get_or_insert_with(Vec::new).extend_from_slice(&data);
            return Ok(());
        }
        self.ring.lock().write_all(&data)
    }
}

/// One device's capture stream feeding a rolling [`RingCache`].
///
/// The cache holds the most recent `cache_duration` of audio. Captured
/// buffers pass through a large write-behind buffer that is flushed before
/// every snapshot.
pub struct CaptureSession {
    shared: Arc<Shared>,
    provider: Box<dyn CaptureProvider>,
    running: bool,
}

impl CaptureSession {
    /// Size the cache for `provider` and wrap it. Capture is not started.
    pub fn new(
        provider: Box<dyn CaptureProvider>,
        cache_duration: Duration,
        config: &RecorderConfiguration,
    ) -> Result<Self, CaptureError> {
        let device = provider.device().clone();
        let source_format = provider.format();
        source_format
            .validate()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("{}: {}", device.name, e)))?;
        let format = source_format.with_max_channels(config.max_channels);

        let capacity = format.bytes_for(cache_duration);
        if capacity == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "cache duration is shorter than one audio frame".into(),
            ));
        }
        if capacity > MAX_WAV_DATA_SIZE {
            return Err(CaptureError::ConfigurationFailed(format!(
                "cache of {} bytes for {} does not fit a WAV file",
                capacity, device.name
            )));
        }

        let backing = match config.cache_backing {
            CacheBackingKind::Memory => CacheBacking::memory(capacity),
            CacheBackingKind::TempFile => {
                CacheBacking::temp_file().map_err(|e| CaptureError::storage("failed to create cache file", e))?
            }
        };
        let ring = RingCache::new(backing, capacity).map_err(|e| CaptureError::storage("failed to open cache", e))?;

        log::debug!(
            "Cache for {} sized at {} bytes ({} Hz, {} ch, {} bit)",
            device.name,
            capacity,
            format.sample_rate,
            format.channels,
            format.bits_per_sample
        );

        Ok(Self {
            shared: Arc::new(Shared {
                device,
                source_format,
                format,
                active: AtomicBool::new(false),
                gate: Mutex::new(Gate::default()),
                ring: Mutex::new(BufWriter::with_capacity(config.write_behind_capacity, ring)),
                failed_callbacks: AtomicU64::new(0),
            }),
            provider,
            running: false,
        })
    }

    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    /// Format of the cached bytes (after channel limiting).
    pub fn format(&self) -> WaveFormat {
        self.shared.format
    }

    pub fn capacity(&self) -> u64 {
        self.shared.ring.lock().get_ref().capacity()
    }

    /// Number of callbacks whose data could not be stored.
    pub fn failed_callbacks(&self) -> u64 {
        self.shared.failed_callbacks.load(Ordering::Relaxed)
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.running {
            return Ok(());
        }
        self.shared.active.store(true, Ordering::Release);
        if let Err(e) = self.provider.start(self.callback()) {
            self.shared.active.store(false, Ordering::Release);
            return Err(e);
        }
        self.running = true;
        log::info!("Capturing {} ({})", self.shared.device.name, self.shared.device.kind);
        Ok(())
    }

    /// Stop the stream and wait for the capture thread to acknowledge.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.running {
            return Ok(());
        }
        self.shared.active.store(false, Ordering::Release);
        self.running = false;
        self.provider.stop()
    }

    /// Divert incoming audio away from the cache until the guard is dropped.
    pub fn pause(&self) -> PausedCapture<'_> {
        self.shared.gate.lock().paused = true;
        PausedCapture { session: self }
    }

    fn callback(&self) -> CaptureCallback {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |data: &[u8]| {
            match panic::catch_unwind(AssertUnwindSafe(|| shared.accept(data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    shared.failed_callbacks.fetch_add(1, Ordering::Relaxed);
                    log::error!("Failed to cache audio from {}: {}", shared.device.name, e);
                }
                Err(_) => {
                    shared.failed_callbacks.fetch_add(1, Ordering::Relaxed);
                    log::error!("Capture callback for {} panicked", shared.device.name);
                }
            }
        })
    }

    fn resume(&self) -> io::Result<()> {
        let mut gate = self.shared.gate.lock();
        let overflow = gate.overflow.take();
        gate.paused = false;
        if let Some(overflow) = overflow {
            self.shared.ring.lock().write_all(&overflow)?;
        }
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop capture of {}: {}", self.shared.device.name, e);
        }
    }
}

/// A paused [`CaptureSession`]. Dropping it replays buffered audio and resumes.
pub struct PausedCapture<'a> {
    session: &'a CaptureSession,
}

impl PausedCapture<'_> {
    pub fn device(&self) -> &Device {
        self.session.device()
    }

    /// Copy the cache into a WAV temp file. The cache keeps running.
    pub fn write_wave(&self) -> Result<DeviceSessionFile, CaptureError> {
        let shared = &self.session.shared;
        let mut writer = WaveFileWriter::create(shared.format)?;

        {
            let mut ring = shared.ring.lock();
            ring.flush().map_err(|e| CaptureError::storage("failed to flush cache", e))?;
            let cache = ring.get_mut();
            let copied = cache.copy_to(&mut writer);
            cache
                .seek(SeekFrom::End(0))
                .map_err(|e| CaptureError::storage("failed to rewind cache", e))?;
            copied.map_err(|e| CaptureError::storage("failed to copy cache", e))?;
        }

        let (file, length) = writer.finish()?;
        Ok(DeviceSessionFile {
            device: shared.device.clone(),
            file,
            length,
        })
    }

    /// Playback time currently held in the cache.
    pub fn cached_duration(&self) -> Duration {
        let shared = &self.session.shared;
        let ring = shared.ring.lock();
        let bytes = ring.get_ref().len() + ring.buffer().len() as u64;
        shared.format.duration_of(bytes.min(ring.get_ref().capacity()))
    }
}

impl Drop for PausedCapture<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.resume() {
            log::error!("Failed to replay paused audio for {}: {}", self.session.device().name, e);
        }
    }
}
