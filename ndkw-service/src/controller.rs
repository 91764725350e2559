use std::fs::File;
use std::io::{self, Seek};
use std::sync::Arc;
use std::time::Duration;

use ndkw_core::codec;
use ndkw_core::models::session::serde_secs;
use ndkw_core::{
    CaptureError, CaptureOrchestrator, Device, EventKind, QueueEntry, QueuedRecording, RecordingStatus,
    SessionSnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::DispatchError;

/// Argument of `start-recording`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingArgs {
    pub device_ids: Vec<String>,
    #[serde(rename = "cacheDurationSecs", with = "serde_secs")]
    pub cache_duration: Duration,
}

enum ContentPart {
    Bytes(Vec<u8>),
    File { file: File, length: u64 },
}

/// Raw payload following a content result, with its exact length known
/// before the first byte is sent.
pub struct ContentBody {
    length: u64,
    parts: Vec<ContentPart>,
}

impl ContentBody {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            length: bytes.len() as u64,
            parts: vec![ContentPart::Bytes(bytes)],
        }
    }

    /// Container header in memory, wave payloads streamed from their files.
    pub fn from_snapshot(snapshot: SessionSnapshot, version: u16) -> Result<Self, CaptureError> {
        let lengths = snapshot.data_lengths();
        let length = codec::encoded_len(&snapshot.metadata, &lengths, version)?;
        let mut header = Vec::new();
        codec::encode_header(&snapshot.metadata, &lengths, version, &mut header)?;

        let mut parts = vec![ContentPart::Bytes(header)];
        for device_file in snapshot.files {
            parts.push(ContentPart::File {
                file: device_file.file,
                length: device_file.length,
            });
        }
        Ok(Self { length, parts })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Stream every part to `writer`. Returns bytes written.
    pub async fn write_to<W>(self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        for part in self.parts {
            match part {
                ContentPart::Bytes(bytes) => {
                    writer.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                ContentPart::File { mut file, length } => {
                    file.rewind()?;
                    let mut source = tokio::fs::File::from_std(file).take(length);
                    let copied = tokio::io::copy(&mut source, writer).await?;
                    if copied != length {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("content file ended after {} of {} bytes", copied, length),
                        ));
                    }
                    written += copied;
                }
            }
        }
        writer.flush().await?;
        Ok(written)
    }
}

/// Async face of the orchestrator used by endpoint handlers.
///
/// Orchestrator calls block on locks and disk I/O, so they run on the
/// blocking pool.
pub struct Controller {
    orchestrator: Arc<CaptureOrchestrator>,
}

impl Controller {
    pub fn new(orchestrator: Arc<CaptureOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<CaptureOrchestrator> {
        &self.orchestrator
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&CaptureOrchestrator) -> Result<T, CaptureError> + Send + 'static,
        T: Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::task::spawn_blocking(move || op(&orchestrator))
            .await
            .map_err(|e| DispatchError::Internal(format!("orchestrator task failed: {}", e)))?
            .map_err(DispatchError::from)
    }

    pub async fn start_recording(&self, args: StartRecordingArgs) -> Result<(), DispatchError> {
        self.blocking(move |o| o.start_recording(&args.device_ids, args.cache_duration))
            .await
    }

    pub async fn stop_recording(&self) -> Result<(), DispatchError> {
        self.blocking(|o| o.stop_recording()).await
    }

    pub async fn status(&self) -> Result<RecordingStatus, DispatchError> {
        self.blocking(|o| Ok(o.status())).await
    }

    pub async fn recording_devices(&self) -> Result<Vec<Device>, DispatchError> {
        self.blocking(|o| o.recording_devices()).await
    }

    pub async fn max_duration(&self) -> Result<Duration, DispatchError> {
        self.blocking(|o| o.max_duration()).await
    }

    pub async fn devices(&self) -> Result<Vec<Device>, DispatchError> {
        self.blocking(|o| o.all_devices()).await
    }

    pub async fn find_device(&self, id: String) -> Result<Device, DispatchError> {
        self.blocking(move |o| o.find_device(&id)).await
    }

    /// Snapshot the recording as an `.ndkw` container ready to stream.
    pub async fn save_as_ndkw(&self) -> Result<ContentBody, DispatchError> {
        self.blocking(|o| {
            let snapshot = o.snapshot()?;
            ContentBody::from_snapshot(snapshot, codec::latest_version())
        })
        .await
    }

    pub async fn add_to_queue(&self) -> Result<QueuedRecording, DispatchError> {
        self.blocking(|o| o.add_to_queue()).await
    }

    pub async fn delete_from_queue(&self, ids: Vec<Uuid>) -> Result<(), DispatchError> {
        self.blocking(move |o| o.delete_from_queue(&ids)).await
    }

    pub async fn queue(&self) -> Result<Vec<QueueEntry>, DispatchError> {
        self.blocking(|o| o.list_queue()).await
    }

    /// Resolve on the next `kind` event.
    pub async fn next_event(&self, kind: EventKind) -> Result<(), DispatchError> {
        if self.orchestrator.events().subscribe(kind).wait().await {
            Ok(())
        } else {
            Err(DispatchError::Cancelled)
        }
    }

    /// Resolve once the recorder is (or already was) in the wanted state.
    pub async fn wait_until_recording(&self, recording: bool) -> Result<(), DispatchError> {
        loop {
            // Subscribe before checking so a transition in between is seen.
            let subscription = self.orchestrator.events().subscribe(EventKind::StatusChanged);
            if self.orchestrator.is_recording() == recording {
                return Ok(());
            }
            if !subscription.wait().await {
                return Err(DispatchError::Cancelled);
            }
        }
    }
}
