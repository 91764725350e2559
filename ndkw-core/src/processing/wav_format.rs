/// WAV file format utilities.
///
/// Generates standard 44-byte RIFF WAV headers for a [`WaveFormat`] and
/// patches the size fields once the payload length is known.
use crate::models::format::WaveFormat;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Largest data chunk a 44-byte header can describe.
pub const MAX_WAV_DATA_SIZE: u64 = u32::MAX as u64 - 36;

/// Generate a 44-byte WAV RIFF header.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (fmt chunk size)
/// [20-21]  format tag (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bits / 8
/// [34-35]  bits per sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &WaveFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = format.bytes_per_second() as u32;
    let chunk_size = 36u32.saturating_add(data_size);

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.encoding.format_tag().to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Patch the RIFF chunk size (offset 4) and data size (offset 40).
pub fn patch_sizes(header: &mut [u8], data_size: u32) {
    let chunk_size = 36u32.saturating_add(data_size);
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
}

/// Read the data-chunk size of a header produced by [`generate_wav_header`].
pub fn data_size(header: &[u8]) -> Option<u32> {
    if header.len() < WAV_HEADER_SIZE || &header[0..4] != b"RIFF" || &header[36..40] != b"data" {
        return None;
    }
    Some(u32::from_le_bytes([header[40], header[41], header[42], header[43]]))
}

/// Keep the first `max_channels` channels of every interleaved frame.
///
/// Endpoints such as 5.1 speakers deliver more channels than the recorder
/// stores; front left/right come first in every standard layout. A trailing
/// partial frame is dropped.
pub fn limit_channels(data: &[u8], format: &WaveFormat, max_channels: u16) -> Vec<u8> {
    if format.channels <= max_channels {
        return data.to_vec();
    }
    let sample_bytes = (format.bits_per_sample / 8) as usize;
    let frame_bytes = format.block_align() as usize;
    let kept_bytes = sample_bytes * max_channels as usize;

    let mut out = Vec::with_capacity(data.len() / frame_bytes * kept_bytes);
    for frame in data.chunks_exact(frame_bytes) {
        out.extend_from_slice(&frame[..kept_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(header: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([header[offset], header[offset + 1]])
    }

    fn u32_at(header: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([header[offset], header[offset + 1], header[offset + 2], header[offset + 3]])
    }

    #[test]
    fn header_riff_magic() {
        let header = generate_wav_header(&WaveFormat::pcm16(48000, 2), 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_48khz_stereo_16bit() {
        let header = generate_wav_header(&WaveFormat::pcm16(48000, 2), 9600);

        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48000);
        assert_eq!(u32_at(&header, 28), 192000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(u32_at(&header, 40), 9600);
        assert_eq!(u32_at(&header, 4), 36 + 9600);
    }

    #[test]
    fn header_float_format_tag() {
        let header = generate_wav_header(&WaveFormat::float32(44100, 2), 0);
        assert_eq!(u16_at(&header, 20), 3);
        assert_eq!(u16_at(&header, 34), 32);
        assert_eq!(u32_at(&header, 28), 44100 * 8);
    }

    #[test]
    fn patch_and_read_back_sizes() {
        let mut header = generate_wav_header(&WaveFormat::pcm16(48000, 2), 0);
        patch_sizes(&mut header, 19200);

        assert_eq!(data_size(&header), Some(19200));
        assert_eq!(u32_at(&header, 4), 19200 + 36);
        assert_eq!(data_size(&header[..20]), None);
    }

    #[test]
    fn limit_keeps_front_pair() {
        // 16-bit, 3 channels, two frames
        let format = WaveFormat::pcm16(48000, 3);
        let data = [1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6];
        assert_eq!(limit_channels(&data, &format, 2), vec![1, 1, 2, 2, 4, 4, 5, 5]);
    }

    #[test]
    fn limit_passthrough_and_partial_frame() {
        let stereo = WaveFormat::pcm16(48000, 2);
        assert_eq!(limit_channels(&[1, 2, 3, 4], &stereo, 2), vec![1, 2, 3, 4]);

        let quad = WaveFormat::pcm16(48000, 4);
        assert_eq!(limit_channels(&[1, 2, 3, 4, 5, 6, 7, 8, 9], &quad, 1), vec![1, 2]);
    }
}
