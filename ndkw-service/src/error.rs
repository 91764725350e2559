use ndkw_core::CaptureError;
use thiserror::Error;

use crate::protocol::{ProtocolError, ResultCode};

/// Why a single request failed. Always reported as a result frame.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&DispatchError> for ResultCode {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::UnknownEndpoint(_) => ResultCode::InvalidEndpoint,
            DispatchError::InvalidInput(_) => ResultCode::InvalidInputStructure,
            DispatchError::Capture(capture) => match capture {
                CaptureError::AlreadyRecording | CaptureError::NotRecording => ResultCode::InvalidState,
                CaptureError::UnknownDevice(_) | CaptureError::QueueItemNotFound(_) => ResultCode::NotFound,
                CaptureError::DeviceNotAvailable => ResultCode::NotFound,
                CaptureError::NoDevices => ResultCode::InvalidInputStructure,
                CaptureError::ConfigurationFailed(_)
                | CaptureError::StorageError(_)
                | CaptureError::Backend(_)
                | CaptureError::Codec(_) => ResultCode::InvalidState,
            },
            DispatchError::Cancelled => ResultCode::Disconnected,
            DispatchError::Internal(_) => ResultCode::InvalidState,
        }
    }
}

/// Fatal errors of the service process.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn code(err: DispatchError) -> ResultCode {
        ResultCode::from(&err)
    }

    #[test]
    fn capture_errors_map_to_closed_codes() {
        assert_eq!(code(CaptureError::AlreadyRecording.into()), ResultCode::InvalidState);
        assert_eq!(code(CaptureError::NotRecording.into()), ResultCode::InvalidState);
        assert_eq!(code(CaptureError::UnknownDevice("x".into()).into()), ResultCode::NotFound);
        assert_eq!(code(CaptureError::QueueItemNotFound(Uuid::nil()).into()), ResultCode::NotFound);
        assert_eq!(code(CaptureError::NoDevices.into()), ResultCode::InvalidInputStructure);
        assert_eq!(code(CaptureError::Codec("bad".into()).into()), ResultCode::InvalidState);
    }

    #[test]
    fn dispatch_errors_map_to_closed_codes() {
        assert_eq!(code(DispatchError::UnknownEndpoint("x".into())), ResultCode::InvalidEndpoint);
        assert_eq!(code(DispatchError::InvalidInput("x".into())), ResultCode::InvalidInputStructure);
        assert_eq!(code(DispatchError::Cancelled), ResultCode::Disconnected);
    }
}
