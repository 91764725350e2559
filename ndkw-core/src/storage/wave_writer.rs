use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use crate::models::error::CaptureError;
use crate::models::format::WaveFormat;
use crate::processing::wav_format::{self, MAX_WAV_DATA_SIZE, WAV_HEADER_SIZE};

/// Streaming WAV writer over an anonymous temp file.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, sizes patched on finish]
/// [raw interleaved sample data...]
/// ```
///
/// Implements `io::Write` so a ring cache can copy straight into it.
pub struct WaveFileWriter {
    file: File,
    format: WaveFormat,
    data_bytes: u64,
}

impl WaveFileWriter {
    /// Create a temp file and write the placeholder header.
    pub fn create(format: WaveFormat) -> Result<Self, CaptureError> {
        let file = tempfile::tempfile().map_err(|e| CaptureError::storage("failed to create temp file", e))?;
        Self::from_file(file, format)
    }

    pub fn from_file(mut file: File, format: WaveFormat) -> Result<Self, CaptureError> {
        let header = wav_format::generate_wav_header(&format, 0);
        file.write_all(&header)
            .map_err(|e| CaptureError::storage("failed to write WAV header", e))?;
        Ok(Self {
            file,
            format,
            data_bytes: 0,
        })
    }

    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    /// Sample bytes written so far, excluding the header.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    /// Patch the header sizes and rewind. Returns the file and its total length.
    pub fn finish(mut self) -> Result<(File, u64), CaptureError> {
        if self.data_bytes > MAX_WAV_DATA_SIZE {
            return Err(CaptureError::StorageError(format!(
                "{} bytes of audio do not fit a WAV data chunk",
                self.data_bytes
            )));
        }

        let mut header = wav_format::generate_wav_header(&self.format, 0);
        wav_format::patch_sizes(&mut header, self.data_bytes as u32);

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header))
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .map_err(|e| CaptureError::storage("failed to finalize WAV file", e))?;

        Ok((self.file, WAV_HEADER_SIZE as u64 + self.data_bytes))
    }
}

impl Write for WaveFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.data_bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn write_wav_to_temp_file() {
        let mut writer = WaveFileWriter::create(WaveFormat::pcm16(48000, 2)).unwrap();
        writer.write_all(&[7u8; 16]).unwrap();
        writer.write_all(&[9u8; 4]).unwrap();
        assert_eq!(writer.data_bytes(), 20);

        let (mut file, length) = writer.finish().unwrap();
        assert_eq!(length, 64);

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), 64);
        assert_eq!(wav_format::data_size(&contents), Some(20));
        assert_eq!(&contents[44..60], &[7u8; 16]);
    }

    #[test]
    fn empty_wav_is_header_only() {
        let writer = WaveFileWriter::create(WaveFormat::float32(44100, 1)).unwrap();
        let (mut file, length) = writer.finish().unwrap();
        assert_eq!(length, 44);

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(wav_format::data_size(&contents), Some(0));
        assert_eq!(u16::from_le_bytes([contents[20], contents[21]]), 3);
    }
}
