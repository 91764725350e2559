//! # ndkw-core
//!
//! Platform-agnostic core of the NDKW recorder.
//!
//! Keeps a rolling history of one or more audio endpoints, snapshots it
//! without interrupting capture, and stores the result as a versioned
//! `.ndkw` session container. Platform backends (Windows WASAPI) implement
//! the `DeviceDirectory` and `CaptureProvider` traits.
//!
//! ## Architecture
//!
//! ```text
//! ndkw-core (this crate)
//! ├── traits/       ← CaptureProvider, DeviceDirectory
//! ├── models/       ← Device, WaveFormat, RecordSession, CaptureError, RecorderConfiguration
//! ├── processing/   ← RingCache, WAV header generation
//! ├── session/      ← CaptureSession, CaptureOrchestrator, EventHub
//! ├── codec/        ← .ndkw container encode/decode (versions 1 and 2)
//! ├── storage/      ← QueueDirectory, WaveFileWriter
//! └── mock          ← in-process backend for tests and hosts without one
//! ```

pub mod codec;
pub mod mock;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use codec::{CodecError, SessionHeader};
pub use models::config::{CacheBackingKind, RecorderConfiguration};
pub use models::device::{Device, DeviceKind};
pub use models::error::CaptureError;
pub use models::format::{SampleEncoding, WaveFormat};
pub use models::session::{
    DeviceSession, DeviceSessionFile, QueueEntry, QueuedRecording, RecordSession, RecordSessionMetadata,
    SessionSnapshot,
};
pub use models::state::RecordingStatus;
pub use processing::ring_cache::{CacheBacking, RingCache};
pub use session::capture::CaptureSession;
pub use session::events::{EventHub, EventKind, Subscription};
pub use session::orchestrator::CaptureOrchestrator;
pub use storage::queue::QueueDirectory;
pub use traits::capture_provider::{CaptureCallback, CaptureProvider};
pub use traits::device_directory::{DeviceChangeCallback, DeviceDirectory};
