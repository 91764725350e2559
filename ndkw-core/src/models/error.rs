use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;

/// Errors surfaced by the recorder and its storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording is in progress")]
    NotRecording,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("no devices were requested")]
    NoDevices,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("queued recording not found: {0}")]
    QueueItemNotFound(Uuid),

    #[error("capture backend error: {0}")]
    Backend(String),

    #[error("session container error: {0}")]
    Codec(String),
}

impl From<CodecError> for CaptureError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) => Self::StorageError(io.to_string()),
            other => Self::Codec(other.to_string()),
        }
    }
}

impl CaptureError {
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::StorageError(format!("{}: {}", context, err))
    }
}
