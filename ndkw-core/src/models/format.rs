use std::time::Duration;

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Sample encoding carried in the WAV `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleEncoding {
    Pcm,
    IeeeFloat,
}

impl SampleEncoding {
    /// WAVE format tag.
    pub fn format_tag(self) -> u16 {
        match self {
            Self::Pcm => 1,
            Self::IeeeFloat => 3,
        }
    }
}

/// Interleaved PCM layout delivered by a capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl WaveFormat {
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            encoding: SampleEncoding::Pcm,
        }
    }

    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::IeeeFloat,
        }
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Playback time of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: u64) -> Duration {
        let rate = self.bytes_per_second() as u128;
        if rate == 0 {
            return Duration::ZERO;
        }
        let nanos = bytes as u128 * NANOS_PER_SEC / rate;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Bytes needed to hold `duration` of audio, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> u64 {
        let raw = duration.as_nanos() * self.bytes_per_second() as u128 / NANOS_PER_SEC;
        let block = self.block_align().max(1) as u128;
        ((raw / block) * block).min(u64::MAX as u128) as u64
    }

    /// Same format limited to `max_channels` channels.
    pub fn with_max_channels(&self, max_channels: u16) -> Self {
        Self {
            channels: self.channels.min(max_channels),
            ..*self
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        match (self.encoding, self.bits_per_sample) {
            (SampleEncoding::Pcm, 8 | 16 | 24 | 32) | (SampleEncoding::IeeeFloat, 32 | 64) => Ok(()),
            (encoding, bits) => Err(format!("unsupported sample layout: {:?} {} bit", encoding, bits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn derived_rates() {
        let format = WaveFormat::pcm16(48000, 2);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.bytes_per_second(), 192_000);

        let float = WaveFormat::float32(44100, 2);
        assert_eq!(float.block_align(), 8);
        assert_eq!(float.bytes_per_second(), 352_800);
    }

    #[test]
    fn duration_of_bytes() {
        let format = WaveFormat::pcm16(48000, 2);
        assert_relative_eq!(format.duration_of(192_000).as_secs_f64(), 1.0);
        assert_relative_eq!(format.duration_of(48_000).as_secs_f64(), 0.25);
        assert_eq!(format.duration_of(0), Duration::ZERO);
    }

    #[test]
    fn bytes_for_rounds_to_whole_frames() {
        let format = WaveFormat::pcm16(48000, 2);
        assert_eq!(format.bytes_for(Duration::from_secs(10)), 1_920_000);

        let odd = WaveFormat::pcm16(44100, 1);
        let bytes = odd.bytes_for(Duration::from_micros(33));
        assert_eq!(bytes % 2, 0);
        assert_eq!(bytes, 2);
    }

    #[test]
    fn channel_limit() {
        let surround = WaveFormat::float32(48000, 6);
        assert_eq!(surround.with_max_channels(2).channels, 2);
        assert_eq!(WaveFormat::pcm16(48000, 1).with_max_channels(2).channels, 1);
    }

    #[test]
    fn validate_rejects_odd_layouts() {
        assert!(WaveFormat::pcm16(48000, 2).validate().is_ok());
        assert!(WaveFormat::pcm16(0, 2).validate().is_err());
        let bad = WaveFormat {
            bits_per_sample: 12,
            ..WaveFormat::pcm16(48000, 2)
        };
        assert!(bad.validate().is_err());
    }
}
