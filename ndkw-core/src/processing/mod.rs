pub mod ring_cache;
pub mod wav_format;
