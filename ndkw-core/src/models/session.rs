use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::Device;

/// Nanoseconds in one .NET-style tick, the duration unit of the container.
pub const NANOS_PER_TICK: u128 = 100;

/// Descriptor of a finalized capture run or snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSessionMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "totalDurationSecs", with = "serde_secs")]
    pub total_duration: Duration,
    pub devices: Vec<Device>,
}

impl RecordSessionMetadata {
    /// Fresh metadata stamped with a new id and the current time.
    ///
    /// Time and duration are truncated to the precision the container stores
    /// (milliseconds and ticks), so a decoded copy compares equal.
    pub fn new(total_duration: Duration, devices: Vec<Device>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: truncate_to_millis(Utc::now()),
            total_duration: truncate_to_ticks(total_duration),
            devices,
        }
    }
}

pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(time.timestamp_millis())
        .single()
        .unwrap_or(time)
}

pub fn truncate_to_ticks(duration: Duration) -> Duration {
    let ticks = duration.as_nanos() / NANOS_PER_TICK;
    Duration::from_nanos((ticks * NANOS_PER_TICK).min(u64::MAX as u128) as u64)
}

/// One device's payload: a complete WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub device: Device,
    pub wave_data: Vec<u8>,
}

/// Complete in-memory result of a capture run.
///
/// `device_sessions` is ordered like `metadata.devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSession {
    pub metadata: RecordSessionMetadata,
    pub device_sessions: Vec<DeviceSession>,
}

impl RecordSession {
    pub fn new(metadata: RecordSessionMetadata, device_sessions: Vec<DeviceSession>) -> Self {
        Self {
            metadata,
            device_sessions,
        }
    }

    /// Whether every device session lines up with the metadata device list.
    pub fn devices_match(&self) -> bool {
        self.metadata.devices.len() == self.device_sessions.len()
            && self
                .metadata
                .devices
                .iter()
                .zip(&self.device_sessions)
                .all(|(device, session)| *device == session.device)
    }
}

/// A device's WAV file produced by a snapshot, held as an open temp file.
#[derive(Debug)]
pub struct DeviceSessionFile {
    pub device: Device,
    pub file: File,
    pub length: u64,
}

impl DeviceSessionFile {
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).map(|_| ())
    }

    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        let mut data = Vec::with_capacity(self.length as usize);
        (&mut self.file).take(self.length).read_to_end(&mut data)?;
        Ok(data)
    }
}

/// File-backed snapshot of a running recording.
///
/// Wave payloads stay on disk so the container can be streamed without
/// holding every device in memory.
#[derive(Debug)]
pub struct SessionSnapshot {
    pub metadata: RecordSessionMetadata,
    pub files: Vec<DeviceSessionFile>,
}

impl SessionSnapshot {
    pub fn data_lengths(&self) -> Vec<u64> {
        self.files.iter().map(|f| f.length).collect()
    }

    pub fn into_record_session(mut self) -> io::Result<RecordSession> {
        let mut device_sessions = Vec::with_capacity(self.files.len());
        for file in &mut self.files {
            device_sessions.push(DeviceSession {
                device: file.device.clone(),
                wave_data: file.read_all()?,
            });
        }
        Ok(RecordSession::new(self.metadata, device_sessions))
    }
}

/// A persisted session discovered in the queue directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub metadata: RecordSessionMetadata,
    pub file_path: PathBuf,
}

/// Result of adding the current recording to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRecording {
    pub metadata: RecordSessionMetadata,
    pub file_path: PathBuf,
    /// SHA-256 of the finished file, lowercase hex.
    pub checksum: String,
}

/// `Duration` as fractional seconds in JSON.
pub mod serde_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::DeviceKind;
    use approx::assert_relative_eq;

    #[test]
    fn new_metadata_is_truncated_to_container_precision() {
        let meta = RecordSessionMetadata::new(Duration::from_nanos(1_234_567), vec![]);
        assert_eq!(meta.total_duration, Duration::from_nanos(1_234_500));
        assert_eq!(meta.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn metadata_json_uses_seconds() {
        let meta = RecordSessionMetadata {
            id: Uuid::nil(),
            created_at: Utc.timestamp_millis_opt(946_728_605_156).unwrap(),
            total_duration: Duration::from_millis(2500),
            devices: vec![Device::new("a", "Mic", DeviceKind::Input)],
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_relative_eq!(json["totalDurationSecs"].as_f64().unwrap(), 2.5);
        assert_eq!(json["createdAt"], "2000-01-01T12:10:05.156Z");

        let back: RecordSessionMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn device_order_check() {
        let mic = Device::new("a", "Mic", DeviceKind::Input);
        let speakers = Device::new("b", "Speakers", DeviceKind::Output);
        let meta = RecordSessionMetadata::new(Duration::ZERO, vec![mic.clone(), speakers.clone()]);

        let ordered = RecordSession::new(
            meta.clone(),
            vec![
                DeviceSession { device: mic.clone(), wave_data: vec![] },
                DeviceSession { device: speakers.clone(), wave_data: vec![] },
            ],
        );
        assert!(ordered.devices_match());

        let swapped = RecordSession::new(
            meta,
            vec![
                DeviceSession { device: speakers, wave_data: vec![] },
                DeviceSession { device: mic, wave_data: vec![] },
            ],
        );
        assert!(!swapped.devices_match());
    }
}
