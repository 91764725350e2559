//! Wire protocol: version handshake, length-prefixed frames and result JSON.
//!
//! ```text
//! handshake: client → i32 count, count × u16 versions
//!            server → u16 chosen version (0 = none in common, then close)
//! request:   i32 length LE, UTF-8 "<endpoint>[:<json>]"
//! response:  i32 length LE, UTF-8 result JSON
//!            [contentLength raw bytes when the result announces content]
//! ```

pub mod frame;
pub mod handshake;
pub mod result;

use thiserror::Error;

pub use result::{ResultCode, ResultFrame};

/// Protocol versions this server speaks, ascending.
pub const SERVER_VERSIONS: &[u16] = &[1];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no protocol version in common")]
    NoCompatibleVersion,

    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("invalid length field {0}")]
    InvalidFrameLength(i32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

/// A request frame split into endpoint name and optional JSON argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub endpoint: &'a str,
    pub argument: Option<&'a str>,
}

impl<'a> Request<'a> {
    /// Split at the first `:`; everything after it is the argument.
    pub fn parse(payload: &'a [u8]) -> Result<Self, std::str::Utf8Error> {
        let text = std::str::from_utf8(payload)?;
        Ok(match text.split_once(':') {
            Some((endpoint, argument)) => Self {
                endpoint: endpoint.trim(),
                argument: Some(argument),
            },
            None => Self {
                endpoint: text.trim(),
                argument: None,
            },
        })
    }

    pub fn format(endpoint: &str, argument: Option<&str>) -> String {
        match argument {
            Some(argument) => format!("{}:{}", endpoint, argument),
            None => endpoint.to_string(),
        }
    }
}
