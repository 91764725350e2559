use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where a device's rolling cache lives while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheBackingKind {
    Memory,
    #[default]
    TempFile,
}

/// Recorder-wide settings shared by every capture run.
#[derive(Debug, Clone)]
pub struct RecorderConfiguration {
    /// Directory holding finalized `.ndkw` sessions.
    pub queue_directory: PathBuf,

    /// Size of the write-behind buffer in front of each ring cache (default: 8 MiB).
    pub write_behind_capacity: usize,

    /// Backing store for ring caches (default: anonymous temp file).
    pub cache_backing: CacheBackingKind,

    /// Endpoints with more channels are reduced to this many (default: 2).
    pub max_channels: u16,

    /// Longest rolling history a caller may request (default: 1 hour).
    pub max_cache_duration: Duration,
}

impl RecorderConfiguration {
    pub fn with_queue_directory(queue_directory: impl Into<PathBuf>) -> Self {
        Self {
            queue_directory: queue_directory.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue_directory.as_os_str().is_empty() {
            return Err("queue directory must not be empty".into());
        }
        if self.write_behind_capacity == 0 {
            return Err("write-behind capacity must be positive".into());
        }
        if self.max_channels == 0 {
            return Err("max channels must be positive".into());
        }
        if self.max_cache_duration.is_zero() {
            return Err("max cache duration must be positive".into());
        }
        Ok(())
    }
}

impl Default for RecorderConfiguration {
    fn default() -> Self {
        Self {
            queue_directory: PathBuf::from("Queued"),
            write_behind_capacity: 1 << 23,
            cache_backing: CacheBackingKind::TempFile,
            max_channels: 2,
            max_cache_duration: Duration::from_secs(60 * 60),
        }
    }
}
