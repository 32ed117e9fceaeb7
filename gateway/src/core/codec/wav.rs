//! WAV container wrapping for batch transcription uploads.

use std::io::Cursor;

use super::{AudioEncoding, AudioFormat, CodecError};

/// Wrap raw 16-bit PCM in a WAV container.
pub fn wrap_pcm(pcm_data: &[u8], format: &AudioFormat) -> Result<Vec<u8>, CodecError> {
    if format.encoding != AudioEncoding::Linear16 {
        return Err(CodecError::UnsupportedFormat(format!(
            "WAV wrapping expects linear16 input, got {}",
            format.encoding
        )));
    }
    format.validate_buffer(pcm_data)?;

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm_data.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CodecError::Container(e.to_string()))?;
        for chunk in pcm_data.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(|e| CodecError::Container(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CodecError::Container(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
