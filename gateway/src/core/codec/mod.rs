//! Frame codec
//!
//! Pure conversion between the telephony wire format and the formats the
//! transcription and synthesis collaborators expect. Every other component
//! talks about audio only through an [`AudioFormat`] pair and a
//! [`FrameCodec`]; none of them assume an encoding or sample rate.
//!
//! # Example
//!
//! ```rust
//! use callbridge_gateway::core::codec::{AudioFormat, FrameCodec};
//!
//! // 24 kHz synthesis output -> 8 kHz telephony leg
//! let codec = FrameCodec::new(AudioFormat::linear16(24000), AudioFormat::linear16(8000)).unwrap();
//! let wire = codec.transform(&vec![0u8; 4800]).unwrap();
//! assert_eq!(wire.len(), 1600);
//! ```

mod format;
pub mod pcm;
pub mod resample;
pub mod wav;

use bytes::Bytes;
use thiserror::Error;

pub use format::{AudioEncoding, AudioFormat};
pub use pcm::rms_energy;

/// Errors raised by the frame codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer length is not a whole number of samples for its declared format
    #[error("Buffer of {len} bytes is not aligned to {encoding} samples ({block_align} bytes each)")]
    MisalignedBuffer {
        encoding: AudioEncoding,
        len: usize,
        block_align: usize,
    },

    /// Format descriptor cannot be processed
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Container encoding failed
    #[error("Container error: {0}")]
    Container(String),
}

/// Stateless `(input, output) -> transform` converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    input: AudioFormat,
    output: AudioFormat,
}

impl FrameCodec {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self, CodecError> {
        input.validate()?;
        output.validate()?;
        Ok(Self { input, output })
    }

    pub fn input(&self) -> AudioFormat {
        self.input
    }

    pub fn output(&self) -> AudioFormat {
        self.output
    }

    /// True when input and output formats are identical.
    #[inline]
    pub fn is_passthrough(&self) -> bool {
        self.input == self.output
    }

    /// Convert one buffer from the input format to the output format.
    ///
    /// Buffers whose length does not match the declared input encoding are
    /// rejected rather than converted into garbled audio.
    pub fn transform(&self, data: &[u8]) -> Result<Bytes, CodecError> {
        self.input.validate_buffer(data)?;

        if self.is_passthrough() {
            return Ok(Bytes::copy_from_slice(data));
        }

        let samples = match self.input.encoding {
            AudioEncoding::Linear16 => pcm::bytes_to_samples(data),
            AudioEncoding::Mulaw => data.iter().map(|&b| pcm::mulaw_decode(b)).collect(),
        };

        let samples = pcm::convert_channels(samples, self.input.channels, self.output.channels);
        let samples = resample::resample(
            &samples,
            self.output.channels,
            self.input.sample_rate,
            self.output.sample_rate,
        );

        let encoded = match self.output.encoding {
            AudioEncoding::Linear16 => pcm::samples_to_bytes(&samples),
            AudioEncoding::Mulaw => samples.iter().map(|&s| pcm::mulaw_encode(s)).collect(),
        };

        Ok(Bytes::from(encoded))
    }
}

/// One-shot convenience wrapper around [`FrameCodec::transform`].
pub fn transcode(
    data: &[u8],
    input: AudioFormat,
    output: AudioFormat,
) -> Result<Bytes, CodecError> {
    FrameCodec::new(input, output)?.transform(data)
}
