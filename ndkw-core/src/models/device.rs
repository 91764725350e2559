use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Capture endpoint (microphone, line in).
    Input,
    /// Render endpoint, recorded through loopback.
    Output,
}

impl DeviceKind {
    /// On-disk tag used by the session container.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Immutable snapshot of an OS audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// OS-assigned endpoint id, stable across enumerations.
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn is_output(&self) -> bool {
        self.kind == DeviceKind::Output
    }
}
