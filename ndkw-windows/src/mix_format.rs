//! Mapping from WASAPI mix formats to [`WaveFormat`].
//!
//! Kept free of Windows types so the mapping is testable on every host.

use ndkw_core::models::error::CaptureError;
use ndkw_core::{SampleEncoding, WaveFormat};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Byte offset of `SubFormat` inside `WAVEFORMATEXTENSIBLE`.
pub const SUBFORMAT_OFFSET: usize = 24;

/// Fields of a `WAVEFORMATEX` (plus the extensible sub-format tag) that
/// decide how captured bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// First field of the `SubFormat` GUID, which equals the plain format
    /// tag for PCM and IEEE float.
    pub sub_format: Option<u16>,
}

impl MixFormat {
    pub fn to_wave_format(&self) -> Result<WaveFormat, CaptureError> {
        let tag = match self.format_tag {
            WAVE_FORMAT_EXTENSIBLE => self.sub_format.ok_or_else(|| {
                CaptureError::ConfigurationFailed("extensible mix format without a sub-format".into())
            })?,
            tag => tag,
        };

        let encoding = match tag {
            WAVE_FORMAT_PCM => SampleEncoding::Pcm,
            WAVE_FORMAT_IEEE_FLOAT => SampleEncoding::IeeeFloat,
            other => {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "unsupported mix format tag {:#06x}",
                    other
                )))
            }
        };

        let format = WaveFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            encoding,
        };
        format.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix(format_tag: u16, bits: u16, sub_format: Option<u16>) -> MixFormat {
        MixFormat {
            format_tag,
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: bits,
            sub_format,
        }
    }

    #[test]
    fn shared_mode_float_mix() {
        let format = mix(WAVE_FORMAT_EXTENSIBLE, 32, Some(WAVE_FORMAT_IEEE_FLOAT))
            .to_wave_format()
            .unwrap();
        assert_eq!(format, WaveFormat::float32(48_000, 2));
    }

    #[test]
    fn plain_pcm_mix() {
        let format = mix(WAVE_FORMAT_PCM, 16, None).to_wave_format().unwrap();
        assert_eq!(format, WaveFormat::pcm16(48_000, 2));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(mix(0x0055, 16, None).to_wave_format().is_err());
        assert!(mix(WAVE_FORMAT_EXTENSIBLE, 32, None).to_wave_format().is_err());
    }
}
