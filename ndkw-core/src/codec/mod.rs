//! `.ndkw` session container.
//!
//! ```text
//! "NDKW"          4 bytes
//! version         u16 LE
//! id              16 bytes, mixed-endian GUID order
//! createdAt       i64 LE, Unix epoch milliseconds
//! totalDuration   i64 LE, 100ns ticks
//! deviceCount     i32 LE
//! per device:     idLen i32 | id UTF-8 | nameLen i32 | name UTF-8 | kind u8 | dataLength
//! wave payloads   concatenated in device order
//! ```
//!
//! `dataLength` is i32 in version 1 and i64 in version 2. Everything before
//! the wave payloads is written first so the total size is known up front.

mod layout;

use std::io::{self, Read, Write};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::device::{Device, DeviceKind};
use crate::models::session::{
    DeviceSession, RecordSession, RecordSessionMetadata, SessionSnapshot, NANOS_PER_TICK,
};

use layout::SessionLayout;
pub use layout::SUPPORTED_VERSIONS;

pub const MAGIC: [u8; 4] = *b"NDKW";
pub const FILE_EXTENSION: &str = "ndkw";

/// Upper bound for device id and name fields.
const MAX_STRING_BYTES: usize = 64 * 1024;
/// Upper bound for the device count of a single session.
const MAX_DEVICES: usize = 4096;

const FIXED_HEADER_LEN: u64 = 4 + 2 + 16 + 8 + 8 + 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("device sessions do not match metadata: {0}")]
    DeviceMismatch(String),

    #[error("payload of {length} bytes does not fit container version {version}")]
    PayloadTooLarge { length: u64, version: u16 },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::MalformedContainer("unexpected end of stream".into())
        } else {
            Self::Io(err)
        }
    }
}

/// Highest container version; used whenever no version is requested.
pub fn latest_version() -> u16 {
    layout::latest().version()
}

/// Metadata block of a container, without wave payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub version: u16,
    pub metadata: RecordSessionMetadata,
    /// Byte length of each device payload, in device order.
    pub data_lengths: Vec<u64>,
}

impl SessionHeader {
    pub fn payload_len(&self) -> u64 {
        self.data_lengths.iter().sum()
    }
}

/// Encode `session` with the latest container version.
pub fn encode<W: Write>(session: &RecordSession, writer: &mut W) -> Result<(), CodecError> {
    encode_with_version(session, latest_version(), writer)
}

pub fn encode_with_version<W: Write>(
    session: &RecordSession,
    version: u16,
    writer: &mut W,
) -> Result<(), CodecError> {
    if !session.devices_match() {
        return Err(CodecError::DeviceMismatch(format!(
            "{} devices in metadata, {} device sessions",
            session.metadata.devices.len(),
            session.device_sessions.len()
        )));
    }
    let lengths: Vec<u64> = session
        .device_sessions
        .iter()
        .map(|s| s.wave_data.len() as u64)
        .collect();

    encode_header(&session.metadata, &lengths, version, writer)?;
    for device_session in &session.device_sessions {
        writer.write_all(&device_session.wave_data)?;
    }
    Ok(())
}

pub fn encode_to_vec(session: &RecordSession) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode(session, &mut out)?;
    Ok(out)
}

/// Write everything up to the first wave payload.
///
/// `data_lengths` must list one length per device in `metadata.devices`.
pub fn encode_header<W: Write>(
    metadata: &RecordSessionMetadata,
    data_lengths: &[u64],
    version: u16,
    writer: &mut W,
) -> Result<(), CodecError> {
    let layout = layout::layout_for(version)?;
    if metadata.devices.len() != data_lengths.len() {
        return Err(CodecError::DeviceMismatch(format!(
            "{} devices, {} data lengths",
            metadata.devices.len(),
            data_lengths.len()
        )));
    }

    // Validate every length before the first byte goes out.
    let mut header = Vec::with_capacity(header_len(metadata, layout) as usize);
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&metadata.id.to_bytes_le());
    header.extend_from_slice(&metadata.created_at.timestamp_millis().to_le_bytes());
    header.extend_from_slice(&duration_to_ticks(metadata.total_duration).to_le_bytes());
    write_count(&mut header, metadata.devices.len(), version)?;

    for (device, length) in metadata.devices.iter().zip(data_lengths) {
        write_string(&mut header, &device.id, version)?;
        write_string(&mut header, &device.name, version)?;
        header.push(device.kind.to_byte());
        layout.write_data_length(&mut header, *length)?;
    }

    writer.write_all(&header)?;
    Ok(())
}

/// Exact encoded size of a container with these payload lengths.
pub fn encoded_len(
    metadata: &RecordSessionMetadata,
    data_lengths: &[u64],
    version: u16,
) -> Result<u64, CodecError> {
    let layout = layout::layout_for(version)?;
    check_device_count(metadata.devices.len(), version)?;
    Ok(header_len(metadata, layout) + data_lengths.iter().sum::<u64>())
}

/// Stream a file-backed snapshot as a container. Returns bytes written.
pub fn write_snapshot<W: Write>(
    snapshot: &mut SessionSnapshot,
    version: u16,
    writer: &mut W,
) -> Result<u64, CodecError> {
    let lengths = snapshot.data_lengths();
    encode_header(&snapshot.metadata, &lengths, version, writer)?;
    let mut written = encoded_len(&snapshot.metadata, &[], version)?;

    for device_file in &mut snapshot.files {
        device_file.rewind()?;
        let copied = io::copy(&mut (&mut device_file.file).take(device_file.length), writer)?;
        if copied != device_file.length {
            return Err(CodecError::MalformedContainer(format!(
                "wave file for {} ended after {} of {} bytes",
                device_file.device.id, copied, device_file.length
            )));
        }
        written += copied;
    }
    Ok(written)
}

/// Read the magic and version field.
pub fn read_version<R: Read>(reader: &mut R) -> Result<u16, CodecError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CodecError::MalformedContainer("missing NDKW magic".into()));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    Ok(u16::from_le_bytes(version))
}

/// Decode the metadata block; the reader is left at the first wave payload.
pub fn read_header<R: Read>(reader: &mut R) -> Result<SessionHeader, CodecError> {
    let version = read_version(reader)?;
    let layout = layout::layout_for(version)?;

    let mut guid = [0u8; 16];
    reader.read_exact(&mut guid)?;
    let id = Uuid::from_bytes_le(guid);

    let millis = read_i64(reader)?;
    let created_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| CodecError::MalformedContainer(format!("creation time {} out of range", millis)))?;

    let ticks = read_i64(reader)?;
    let total_duration = ticks_to_duration(ticks)?;

    let count = read_i32(reader)?;
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c <= MAX_DEVICES)
        .ok_or_else(|| CodecError::MalformedContainer(format!("invalid device count {}", count)))?;

    let mut devices = Vec::with_capacity(count);
    let mut data_lengths = Vec::with_capacity(count);
    for _ in 0..count {
        let id = read_string(reader)?;
        let name = read_string(reader)?;
        let mut kind = [0u8; 1];
        reader.read_exact(&mut kind)?;
        let kind = DeviceKind::from_byte(kind[0])
            .ok_or_else(|| CodecError::MalformedContainer(format!("unknown device kind {}", kind[0])))?;
        devices.push(Device { id, name, kind });
        data_lengths.push(layout.read_data_length(reader)?);
    }

    Ok(SessionHeader {
        version,
        metadata: RecordSessionMetadata {
            id,
            created_at,
            total_duration,
            devices,
        },
        data_lengths,
    })
}

/// Metadata-only decode; wave payloads are never read.
pub fn read_metadata<R: Read>(reader: &mut R) -> Result<RecordSessionMetadata, CodecError> {
    read_header(reader).map(|header| header.metadata)
}

/// Full decode including every wave payload.
pub fn read_session<R: Read>(reader: &mut R) -> Result<RecordSession, CodecError> {
    let header = read_header(reader)?;
    let mut device_sessions = Vec::with_capacity(header.data_lengths.len());

    for (device, length) in header.metadata.devices.iter().zip(&header.data_lengths) {
        let mut wave_data = Vec::with_capacity((*length).min(1 << 20) as usize);
        reader.by_ref().take(*length).read_to_end(&mut wave_data)?;
        if wave_data.len() as u64 != *length {
            return Err(CodecError::MalformedContainer(format!(
                "wave data for {} truncated at {} of {} bytes",
                device.id,
                wave_data.len(),
                length
            )));
        }
        device_sessions.push(DeviceSession {
            device: device.clone(),
            wave_data,
        });
    }

    Ok(RecordSession::new(header.metadata, device_sessions))
}

fn header_len(metadata: &RecordSessionMetadata, layout: &dyn SessionLayout) -> u64 {
    let devices: u64 = metadata
        .devices
        .iter()
        .map(|d| 4 + d.id.len() as u64 + 4 + d.name.len() as u64 + 1 + layout.length_width())
        .sum();
    FIXED_HEADER_LEN + devices
}

fn duration_to_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / NANOS_PER_TICK).unwrap_or(i64::MAX)
}

fn ticks_to_duration(ticks: i64) -> Result<Duration, CodecError> {
    let ticks = u64::try_from(ticks)
        .map_err(|_| CodecError::MalformedContainer(format!("negative duration {}", ticks)))?;
    let nanos = ticks as u128 * NANOS_PER_TICK;
    Ok(Duration::new(
        (nanos / 1_000_000_000) as u64,
        (nanos % 1_000_000_000) as u32,
    ))
}

fn write_count(out: &mut Vec<u8>, count: usize, version: u16) -> Result<(), CodecError> {
    check_device_count(count, version)?;
    out.extend_from_slice(&(count as i32).to_le_bytes());
    Ok(())
}

/// Readers refuse more than `MAX_DEVICES`, so writers must too.
fn check_device_count(count: usize, version: u16) -> Result<(), CodecError> {
    if count > MAX_DEVICES {
        return Err(CodecError::PayloadTooLarge {
            length: count as u64,
            version,
        });
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, value: &str, version: u16) -> Result<(), CodecError> {
    if value.len() > MAX_STRING_BYTES {
        return Err(CodecError::PayloadTooLarge {
            length: value.len() as u64,
            version,
        });
    }
    out.extend_from_slice(&(value.len() as i32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, CodecError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, CodecError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, CodecError> {
    let len = read_i32(reader)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_STRING_BYTES)
        .ok_or_else(|| CodecError::MalformedContainer(format!("invalid string length {}", len)))?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| CodecError::MalformedContainer(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom};

    use crate::models::session::DeviceSessionFile;

    /// Two devices, 64-bit data lengths.
    const FIXTURE_V2: [u8; 162] = [
        0x4e, 0x44, 0x4b, 0x57, 0x02, 0x00, 0xac, 0x41, 0xe9, 0xa7, 0xa6, 0xe0, 0xfd, 0x45, 0x9e, 0xc5,
        0x8c, 0xcc, 0x6c, 0xeb, 0xbc, 0x04, 0xe4, 0x15, 0x6c, 0x6d, 0xdc, 0x00, 0x00, 0x00, 0xa0, 0x2b,
        0xdd, 0x09, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x64, 0x65,
        0x76, 0x69, 0x63, 0x65, 0x49, 0x64, 0x31, 0x0b, 0x00, 0x00, 0x00, 0x64, 0x65, 0x76, 0x69, 0x63,
        0x65, 0x20, 0x6e, 0x61, 0x6d, 0x65, 0x00, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09,
        0x00, 0x00, 0x00, 0x64, 0x65, 0x76, 0x69, 0x63, 0x65, 0x49, 0x64, 0x32, 0x11, 0x00, 0x00, 0x00,
        0x64, 0x65, 0x76, 0x69, 0x63, 0x65, 0x20, 0x6f, 0x74, 0x68, 0x65, 0x72, 0x20, 0x6e, 0x61, 0x6d,
        0x65, 0x01, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x2c, 0x61, 0x60, 0x5a, 0x76,
        0x1e, 0x20, 0x7e, 0x18, 0x1f, 0xcc, 0xb5, 0x6c, 0xc7, 0xab, 0x38, 0x7e, 0xde, 0xb3, 0x20, 0x0e,
        0x2c, 0x7e, 0x1f, 0x76, 0x07, 0x79, 0x08, 0x5f, 0x61, 0x60, 0x7f, 0x61, 0xdf, 0x87, 0x08, 0x60,
        0x78, 0x0e,
    ];

    /// Same session with 32-bit data lengths.
    fn fixture_v1() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&FIXTURE_V2[..4]);
        out.extend_from_slice(&[0x01, 0x00]);
        out.extend_from_slice(&FIXTURE_V2[6..75]);
        out.extend_from_slice(&FIXTURE_V2[79..118]);
        out.extend_from_slice(&FIXTURE_V2[122..]);
        out
    }

    fn fixture_session() -> RecordSession {
        let first = Device::new("deviceId1", "device name", DeviceKind::Input);
        let second = Device::new("deviceId2", "device other name", DeviceKind::Output);
        RecordSession::new(
            RecordSessionMetadata {
                id: Uuid::parse_str("a7e941ac-e0a6-45fd-9ec5-8ccc6cebbc04").unwrap(),
                created_at: Utc.timestamp_millis_opt(946_728_605_156).unwrap(),
                total_duration: Duration::from_nanos(165_489_568 * 100),
                devices: vec![first.clone(), second.clone()],
            },
            vec![
                DeviceSession {
                    device: first,
                    wave_data: FIXTURE_V2[122..145].to_vec(),
                },
                DeviceSession {
                    device: second,
                    wave_data: FIXTURE_V2[145..].to_vec(),
                },
            ],
        )
    }

    fn session_with(devices: usize) -> RecordSession {
        let mut all = Vec::new();
        let mut sessions = Vec::new();
        for i in 0..devices {
            let kind = if i % 2 == 0 { DeviceKind::Input } else { DeviceKind::Output };
            let device = Device::new(format!("{{0.0.{}}}", i), format!("Gerät {}", i), kind);
            all.push(device.clone());
            sessions.push(DeviceSession {
                device,
                wave_data: (0..(i * 37 + 5)).map(|b| b as u8).collect(),
            });
        }
        RecordSession::new(RecordSessionMetadata::new(Duration::from_millis(1500), all), sessions)
    }

    #[test]
    fn decode_fixture() {
        let decoded = read_session(&mut Cursor::new(&FIXTURE_V2[..])).unwrap();
        assert_eq!(decoded, fixture_session());
        assert_eq!(decoded.device_sessions[0].wave_data.len(), 23);
        assert_eq!(decoded.device_sessions[1].wave_data.len(), 17);
    }

    #[test]
    fn encode_matches_fixture_bytes() {
        let mut out = Vec::new();
        encode(&fixture_session(), &mut out).unwrap();
        assert_eq!(out, FIXTURE_V2.to_vec());

        let mut v1 = Vec::new();
        encode_with_version(&fixture_session(), 1, &mut v1).unwrap();
        assert_eq!(v1, fixture_v1());
        assert_eq!(read_session(&mut Cursor::new(v1)).unwrap(), fixture_session());
    }

    #[test]
    fn round_trip_zero_one_many_devices() {
        for devices in [0, 1, 5] {
            for version in SUPPORTED_VERSIONS {
                let session = session_with(devices);
                let mut out = Vec::new();
                encode_with_version(&session, version, &mut out).unwrap();
                let decoded = read_session(&mut Cursor::new(out)).unwrap();
                assert_eq!(decoded, session, "{} devices, version {}", devices, version);
            }
        }
    }

    #[test]
    fn metadata_only_stops_before_payloads() {
        let session = session_with(3);
        let bytes = encode_to_vec(&session).unwrap();
        let mut cursor = Cursor::new(&bytes[..]);

        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header.version, latest_version());
        assert_eq!(header.metadata, session.metadata);
        assert_eq!(header.data_lengths, vec![5, 42, 79]);
        assert_eq!(bytes.len() as u64 - cursor.position(), header.payload_len());
    }

    #[test]
    fn metadata_only_tolerates_missing_payloads() {
        let bytes = encode_to_vec(&session_with(2)).unwrap();
        let header_only = &bytes[..bytes.len() - 47];
        let meta = read_metadata(&mut Cursor::new(header_only)).unwrap();
        assert_eq!(meta.devices.len(), 2);
    }

    #[test]
    fn encoded_len_is_exact() {
        let session = session_with(4);
        let lengths: Vec<u64> = session.device_sessions.iter().map(|s| s.wave_data.len() as u64).collect();
        for version in SUPPORTED_VERSIONS {
            let mut out = Vec::new();
            encode_with_version(&session, version, &mut out).unwrap();
            assert_eq!(encoded_len(&session.metadata, &lengths, version).unwrap(), out.len() as u64);
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = FIXTURE_V2.to_vec();
        bytes[4] = 0x09;
        let err = read_session(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(9)));

        let err = encode_with_version(&fixture_session(), 7, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(7)));
    }

    #[test]
    fn wrong_or_missing_magic_is_malformed() {
        let mut bytes = FIXTURE_V2.to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            read_session(&mut Cursor::new(bytes)),
            Err(CodecError::MalformedContainer(_))
        ));
        assert!(matches!(
            read_metadata(&mut Cursor::new(Vec::new())),
            Err(CodecError::MalformedContainer(_))
        ));
        assert!(matches!(
            read_version(&mut Cursor::new(b"ND".to_vec())),
            Err(CodecError::MalformedContainer(_))
        ));
    }

    #[test]
    fn truncated_streams_are_malformed() {
        for cut in [10, 40, 60, 121, 150] {
            let err = read_session(&mut Cursor::new(&FIXTURE_V2[..cut])).unwrap_err();
            assert!(matches!(err, CodecError::MalformedContainer(_)), "cut at {}", cut);
        }
    }

    #[test]
    fn corrupt_fields_are_malformed() {
        let mut negative_count = FIXTURE_V2.to_vec();
        negative_count[38..42].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            read_metadata(&mut Cursor::new(negative_count)),
            Err(CodecError::MalformedContainer(_))
        ));

        let mut bad_kind = FIXTURE_V2.to_vec();
        bad_kind[70] = 7;
        assert!(matches!(
            read_metadata(&mut Cursor::new(bad_kind)),
            Err(CodecError::MalformedContainer(_))
        ));

        let mut bad_utf8 = FIXTURE_V2.to_vec();
        bad_utf8[46] = 0xff;
        assert!(matches!(
            read_metadata(&mut Cursor::new(bad_utf8)),
            Err(CodecError::MalformedContainer(_))
        ));
    }

    #[test]
    fn device_count_limit_matches_reader() {
        let devices = |n: usize| -> Vec<Device> {
            (0..n).map(|i| Device::new(i.to_string(), "", DeviceKind::Input)).collect()
        };

        let at_limit = RecordSessionMetadata::new(Duration::ZERO, devices(MAX_DEVICES));
        let mut bytes = Vec::new();
        encode_header(&at_limit, &vec![0; MAX_DEVICES], latest_version(), &mut bytes).unwrap();
        let header = read_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.metadata.devices.len(), MAX_DEVICES);

        let over = RecordSessionMetadata::new(Duration::ZERO, devices(MAX_DEVICES + 1));
        let mut out = Vec::new();
        assert!(matches!(
            encode_header(&over, &vec![0; MAX_DEVICES + 1], latest_version(), &mut out),
            Err(CodecError::PayloadTooLarge { length, .. }) if length == (MAX_DEVICES + 1) as u64
        ));
        assert!(out.is_empty());
        assert!(matches!(
            encoded_len(&over, &[], latest_version()),
            Err(CodecError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn mismatched_device_order_is_rejected() {
        let mut session = fixture_session();
        session.device_sessions.swap(0, 1);
        assert!(matches!(
            encode(&session, &mut Vec::new()),
            Err(CodecError::DeviceMismatch(_))
        ));
    }

    #[test]
    fn snapshot_streams_from_files() {
        let session = fixture_session();
        let mut files = Vec::new();
        for device_session in &session.device_sessions {
            let mut file = tempfile::tempfile().unwrap();
            file.write_all(&device_session.wave_data).unwrap();
            file.seek(SeekFrom::Start(3)).unwrap();
            files.push(DeviceSessionFile {
                device: device_session.device.clone(),
                file,
                length: device_session.wave_data.len() as u64,
            });
        }
        let mut snapshot = SessionSnapshot {
            metadata: session.metadata.clone(),
            files,
        };

        let mut out = Vec::new();
        let written = write_snapshot(&mut snapshot, 2, &mut out).unwrap();
        assert_eq!(written, 162);
        assert_eq!(out, FIXTURE_V2.to_vec());
        assert_eq!(snapshot.into_record_session().unwrap(), session);
    }
}
