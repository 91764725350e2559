use std::io::{Read, Write};

use super::CodecError;

/// Version-specific parts of the container body.
///
/// Both layouts share the header and device block; they differ in the width
/// of each device's `dataLength` field.
pub(crate) trait SessionLayout: Sync {
    fn version(&self) -> u16;

    /// Bytes taken by one encoded `dataLength`.
    fn length_width(&self) -> u64;

    fn write_data_length(&self, writer: &mut dyn Write, length: u64) -> Result<(), CodecError>;

    fn read_data_length(&self, reader: &mut dyn Read) -> Result<u64, CodecError>;
}

/// Version 1: `dataLength` is int32 LE.
struct CompactLengths;

/// Version 2: `dataLength` is int64 LE.
struct WideLengths;

impl SessionLayout for CompactLengths {
    fn version(&self) -> u16 {
        1
    }

    fn length_width(&self) -> u64 {
        4
    }

    fn write_data_length(&self, writer: &mut dyn Write, length: u64) -> Result<(), CodecError> {
        let length = i32::try_from(length).map_err(|_| CodecError::PayloadTooLarge {
            length,
            version: self.version(),
        })?;
        writer.write_all(&length.to_le_bytes())?;
        Ok(())
    }

    fn read_data_length(&self, reader: &mut dyn Read) -> Result<u64, CodecError> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        let length = i32::from_le_bytes(buf);
        u64::try_from(length)
            .map_err(|_| CodecError::MalformedContainer(format!("negative data length {}", length)))
    }
}

impl SessionLayout for WideLengths {
    fn version(&self) -> u16 {
        2
    }

    fn length_width(&self) -> u64 {
        8
    }

    fn write_data_length(&self, writer: &mut dyn Write, length: u64) -> Result<(), CodecError> {
        let length = i64::try_from(length).map_err(|_| CodecError::PayloadTooLarge {
            length,
            version: self.version(),
        })?;
        writer.write_all(&length.to_le_bytes())?;
        Ok(())
    }

    fn read_data_length(&self, reader: &mut dyn Read) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let length = i64::from_le_bytes(buf);
        u64::try_from(length)
            .map_err(|_| CodecError::MalformedContainer(format!("negative data length {}", length)))
    }
}

static LAYOUTS: [&dyn SessionLayout; 2] = [&CompactLengths, &WideLengths];

/// Versions this build can read and write, ascending.
pub const SUPPORTED_VERSIONS: [u16; 2] = [1, 2];

pub(crate) fn layout_for(version: u16) -> Result<&'static dyn SessionLayout, CodecError> {
    LAYOUTS
        .iter()
        .copied()
        .find(|layout| layout.version() == version)
        .ok_or(CodecError::UnsupportedVersion(version))
}

pub(crate) fn latest() -> &'static dyn SessionLayout {
    LAYOUTS[LAYOUTS.len() - 1]
}
