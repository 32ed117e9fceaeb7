//! Audio format descriptors shared by every stage that touches raw audio.

use serde::{Deserialize, Serialize};

use super::CodecError;

/// Sample encoding of a raw audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// 16-bit signed little-endian PCM
    #[default]
    Linear16,
    /// 8-bit G.711 mu-law
    Mulaw,
}

impl AudioEncoding {
    /// Bytes used by one sample of one channel.
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Linear16 => 2,
            Self::Mulaw => 1,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear16 => "linear16",
            Self::Mulaw => "mulaw",
        }
    }
}

impl std::fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AudioEncoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear16" | "pcm" | "pcm16" | "s16le" => Ok(Self::Linear16),
            "mulaw" | "ulaw" | "mu-law" | "pcmu" => Ok(Self::Mulaw),
            other => Err(CodecError::UnsupportedFormat(format!(
                "Unsupported audio encoding: {other}. Supported: linear16, mulaw"
            ))),
        }
    }
}

/// Complete description of a raw (headerless) audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    /// Telephony default: 8 kHz, 16-bit mono PCM.
    fn default() -> Self {
        Self::linear16(8000)
    }
}

impl AudioFormat {
    pub const fn new(encoding: AudioEncoding, sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding,
            sample_rate,
            channels,
        }
    }

    /// Mono 16-bit PCM at the given rate.
    pub const fn linear16(sample_rate: u32) -> Self {
        Self::new(AudioEncoding::Linear16, sample_rate, 1)
    }

    /// Mono mu-law at the given rate.
    pub const fn mulaw(sample_rate: u32) -> Self {
        Self::new(AudioEncoding::Mulaw, sample_rate, 1)
    }

    /// Size in bytes of one sample across all channels.
    #[inline]
    pub fn block_align(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes per second of audio in this format.
    #[inline]
    pub fn byte_rate(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Size in bytes of a frame lasting `duration_ms`.
    pub fn frame_bytes(&self, duration_ms: u32) -> usize {
        let samples = self.sample_rate as usize * duration_ms as usize / 1000;
        samples * self.block_align()
    }

    /// Playback duration of `len` bytes in milliseconds.
    pub fn duration_ms(&self, len: usize) -> u64 {
        let rate = self.byte_rate();
        if rate == 0 {
            return 0;
        }
        (len as u64 * 1000) / rate as u64
    }

    /// Check the descriptor itself is usable.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.sample_rate == 0 {
            return Err(CodecError::UnsupportedFormat(
                "sample_rate must be greater than 0".to_string(),
            ));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(CodecError::UnsupportedFormat(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Reject buffers whose length cannot hold a whole number of samples
    /// in this format.
    pub fn validate_buffer(&self, data: &[u8]) -> Result<(), CodecError> {
        let block_align = self.block_align();
        if data.len() % block_align != 0 {
            return Err(CodecError::MisalignedBuffer {
                encoding: self.encoding,
                len: data.len(),
                block_align,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}Hz/{}ch",
            self.encoding, self.sample_rate, self.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_telephony() {
        let format = AudioFormat::linear16(8000);
        assert_eq!(format.frame_bytes(20), 320);
        assert_eq!(format.frame_bytes(100), 1600);
        assert_eq!(AudioFormat::mulaw(8000).frame_bytes(20), 160);
    }

    #[test]
    fn test_duration_ms() {
        let format = AudioFormat::linear16(8000);
        assert_eq!(format.duration_ms(12_800), 800);
        assert_eq!(AudioFormat::linear16(24000).duration_ms(48_000), 1000);
    }

    #[test]
    fn test_validate_buffer_rejects_odd_pcm() {
        let format = AudioFormat::linear16(8000);
        assert!(format.validate_buffer(&[0u8; 320]).is_ok());
        let err = format.validate_buffer(&[0u8; 321]).unwrap_err();
        assert!(matches!(err, CodecError::MisalignedBuffer { len: 321, .. }));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("PCM".parse::<AudioEncoding>().unwrap(), AudioEncoding::Linear16);
        assert_eq!("ulaw".parse::<AudioEncoding>().unwrap(), AudioEncoding::Mulaw);
        assert!("opus".parse::<AudioEncoding>().is_err());
    }
}
