use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::config::RecorderConfiguration;
use crate::models::device::Device;
use crate::models::error::CaptureError;
use crate::models::session::{QueueEntry, QueuedRecording, RecordSessionMetadata, SessionSnapshot};
use crate::models::state::RecordingStatus;
use crate::processing::wav_format::WAV_HEADER_SIZE;
use crate::session::capture::CaptureSession;
use crate::session::events::{EventHub, EventKind};
use crate::storage::queue::QueueDirectory;
use crate::traits::device_directory::DeviceDirectory;

struct ActiveRecording {
    sessions: Vec<CaptureSession>,
    started_at: DateTime<Utc>,
    cache_duration: Duration,
}

impl ActiveRecording {
    fn devices(&self) -> Vec<Device> {
        self.sessions.iter().map(|s| s.device().clone()).collect()
    }
}

enum OrchestratorState {
    Stopped,
    Recording(ActiveRecording),
}

/// Owns the capture sessions of the current recording run.
///
/// Every mutating operation runs under one orchestrator-wide lock. Capture
/// callbacks never take that lock; each session has its own.
///
/// ```text
/// [Device A] → callback → [write-behind] → [RingCache A] ─┐
/// [Device B] → callback → [write-behind] → [RingCache B] ─┼→ snapshot → SessionCodec
///                                                         ┘
/// ```
pub struct CaptureOrchestrator {
    directory: Arc<dyn DeviceDirectory>,
    config: RecorderConfiguration,
    queue: QueueDirectory,
    events: EventHub,
    state: Mutex<OrchestratorState>,
    /// Mirrors `state` for readers that must not wait on a snapshot.
    recording: AtomicBool,
}

impl CaptureOrchestrator {
    pub fn new(directory: Arc<dyn DeviceDirectory>, config: RecorderConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let events = EventHub::new();
        let hub = events.clone();
        directory.watch(Arc::new(move || {
            hub.emit(EventKind::DevicesChanged);
        }))?;

        Ok(Self {
            directory,
            queue: QueueDirectory::new(config.queue_directory.clone()),
            config,
            events,
            state: Mutex::new(OrchestratorState::Stopped),
            recording: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn queue(&self) -> &QueueDirectory {
        &self.queue
    }

    pub fn config(&self) -> &RecorderConfiguration {
        &self.config
    }

    pub fn status(&self) -> RecordingStatus {
        match &*self.state.lock() {
            OrchestratorState::Stopped => RecordingStatus::Stopped,
            OrchestratorState::Recording(recording) => RecordingStatus::Recording {
                started_at: recording.started_at,
                cache_duration: recording.cache_duration,
                devices: recording.devices(),
            },
        }
    }

    /// Never blocks, even while a snapshot holds the state lock.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn all_devices(&self) -> Result<Vec<Device>, CaptureError> {
        self.directory.list_devices()
    }

    pub fn find_device(&self, id: &str) -> Result<Device, CaptureError> {
        self.directory
            .find_device(id)?
            .ok_or_else(|| CaptureError::UnknownDevice(id.to_string()))
    }

    /// Start one capture per device, each keeping `cache_duration` of history.
    pub fn start_recording(&self, device_ids: &[String], cache_duration: Duration) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if matches!(*state, OrchestratorState::Recording(_)) {
            return Err(CaptureError::AlreadyRecording);
        }
        if device_ids.is_empty() {
            return Err(CaptureError::NoDevices);
        }
        if cache_duration.is_zero() || cache_duration > self.config.max_cache_duration {
            return Err(CaptureError::ConfigurationFailed(format!(
                "cache duration must be between 0 and {} seconds",
                self.config.max_cache_duration.as_secs()
            )));
        }

        let mut devices: Vec<Device> = Vec::with_capacity(device_ids.len());
        for id in device_ids {
            if devices.iter().any(|d| &d.id == id) {
                continue;
            }
            devices.push(self.find_device(id)?);
        }

        let mut sessions = Vec::with_capacity(devices.len());
        for device in &devices {
            let provider = self.directory.open_capture(device)?;
            sessions.push(CaptureSession::new(provider, cache_duration, &self.config)?);
        }
        // Dropping `sessions` on failure stops the ones already started.
        for session in &mut sessions {
            session.start()?;
        }

        log::info!(
            "Recording {} device(s) with a {:.1}s cache",
            sessions.len(),
            cache_duration.as_secs_f64()
        );
        *state = OrchestratorState::Recording(ActiveRecording {
            sessions,
            started_at: Utc::now(),
            cache_duration,
        });
        self.recording.store(true, Ordering::Release);
        drop(state);

        self.events.emit(EventKind::StatusChanged);
        Ok(())
    }

    /// Stop every capture, waiting for each stream to acknowledge.
    pub fn stop_recording(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        let OrchestratorState::Recording(mut recording) = std::mem::replace(&mut *state, OrchestratorState::Stopped)
        else {
            return Err(CaptureError::NotRecording);
        };
        self.recording.store(false, Ordering::Release);

        let mut first_error = None;
        for session in &mut recording.sessions {
            if let Err(e) = session.stop() {
                log::error!("Failed to stop capture of {}: {}", session.device().name, e);
                first_error.get_or_insert(e);
            }
        }
        drop(recording);
        drop(state);

        log::info!("Recording stopped");
        self.events.emit(EventKind::StatusChanged);
        first_error.map_or(Ok(()), Err)
    }

    pub fn recording_devices(&self) -> Result<Vec<Device>, CaptureError> {
        match &*self.state.lock() {
            OrchestratorState::Recording(recording) => Ok(recording.devices()),
            OrchestratorState::Stopped => Err(CaptureError::NotRecording),
        }
    }

    /// Cache duration requested when the current recording started.
    pub fn max_duration(&self) -> Result<Duration, CaptureError> {
        match &*self.state.lock() {
            OrchestratorState::Recording(recording) => Ok(recording.cache_duration),
            OrchestratorState::Stopped => Err(CaptureError::NotRecording),
        }
    }

    /// Copy every device cache without stopping capture.
    pub fn snapshot(&self) -> Result<SessionSnapshot, CaptureError> {
        let state = self.state.lock();
        match &*state {
            OrchestratorState::Recording(recording) => take_snapshot(recording),
            OrchestratorState::Stopped => Err(CaptureError::NotRecording),
        }
    }

    /// Snapshot the current recording into the queue directory.
    pub fn add_to_queue(&self) -> Result<QueuedRecording, CaptureError> {
        let queued = {
            let state = self.state.lock();
            let OrchestratorState::Recording(recording) = &*state else {
                return Err(CaptureError::NotRecording);
            };
            let mut snapshot = take_snapshot(recording)?;
            self.queue.persist(&mut snapshot)?
        };
        self.events.emit(EventKind::QueueChanged);
        Ok(queued)
    }

    /// Delete queued sessions. Nothing is deleted if any id is unknown.
    pub fn delete_from_queue(&self, ids: &[Uuid]) -> Result<(), CaptureError> {
        {
            let _state = self.state.lock();
            self.queue.remove_all(ids)?;
        }
        log::info!("Deleted {} queued session(s)", ids.len());
        self.events.emit(EventKind::QueueChanged);
        Ok(())
    }

    pub fn list_queue(&self) -> Result<Vec<QueueEntry>, CaptureError> {
        self.queue.entries()
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop_recording() {
                log::warn!("Failed to stop recording on shutdown: {}", e);
            }
        }
    }
}

fn take_snapshot(recording: &ActiveRecording) -> Result<SessionSnapshot, CaptureError> {
    // Pause everything first so all devices are cut at the same instant.
    let paused: Vec<_> = recording.sessions.iter().map(CaptureSession::pause).collect();

    let mut files = Vec::with_capacity(paused.len());
    let mut total_duration = Duration::ZERO;
    for (capture, session) in paused.iter().zip(&recording.sessions) {
        let file = capture.write_wave()?;
        let data_len = file.length.saturating_sub(WAV_HEADER_SIZE as u64);
        total_duration = total_duration.max(session.format().duration_of(data_len));
        files.push(file);
    }
    drop(paused);

    let metadata = RecordSessionMetadata::new(total_duration, recording.devices());
    log::info!(
        "Snapshot {} taken: {} device(s), {:.2}s",
        metadata.id,
        files.len(),
        metadata.total_duration.as_secs_f64()
    );
    Ok(SessionSnapshot { metadata, files })
}
