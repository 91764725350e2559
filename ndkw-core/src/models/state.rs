use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::Device;
use super::session::serde_secs;

/// Observable recorder state.
///
/// ```text
/// stopped ──start──→ recording ──stop──→ stopped
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecordingStatus {
    Stopped,
    Recording {
        started_at: DateTime<Utc>,
        #[serde(rename = "cacheDurationSecs", with = "serde_secs")]
        cache_duration: Duration,
        devices: Vec<Device>,
    },
}

impl RecordingStatus {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::DeviceKind;
    use chrono::TimeZone;

    #[test]
    fn stopped_json() {
        let json = serde_json::to_value(RecordingStatus::Stopped).unwrap();
        assert_eq!(json, serde_json::json!({"state": "stopped"}));
    }

    #[test]
    fn recording_json_round_trip() {
        let status = RecordingStatus::Recording {
            started_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            cache_duration: Duration::from_secs(30),
            devices: vec![Device::new("mic", "Mic", DeviceKind::Input)],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "recording");
        assert_eq!(json["cacheDurationSecs"], 30.0);
        assert!(json.get("startedAt").is_some());

        let back: RecordingStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
        assert!(back.is_recording());
    }
}
