//! Sample-level primitives: G.711 mu-law, channel mixing and RMS energy.

/// Scale factor for converting PCM 16-bit samples to normalized float (-1.0 to 1.0)
pub(crate) const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Encode one 16-bit sample as G.711 mu-law.
pub fn mulaw_encode(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > MULAW_CLIP {
        pcm = MULAW_CLIP;
    }
    pcm += MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) as i32 | mantissa) as u8
}

/// Decode one G.711 mu-law byte to a 16-bit sample.
pub fn mulaw_decode(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Interpret little-endian bytes as 16-bit samples. Caller guarantees even length.
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Convert interleaved samples between 1 and 2 channels.
pub fn convert_channels(samples: Vec<i16>, from: u16, to: u16) -> Vec<i16> {
    match (from, to) {
        (a, b) if a == b => samples,
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        _ => samples,
    }
}

/// Root-mean-square energy of 16-bit little-endian PCM, normalised to 0.0..=1.0.
pub fn rms_energy(audio_data: &[u8]) -> f32 {
    if audio_data.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f32;
    let sample_count = audio_data.len() / 2;

    for chunk in audio_data.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * PCM_TO_FLOAT_SCALE;
        sum_squares += sample * sample;
    }

    (sum_squares / sample_count as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_silence_and_extremes() {
        assert_eq!(mulaw_encode(0), 0xFF);
        assert_eq!(mulaw_decode(0xFF), 0);
        // Companding is lossy but must preserve sign and rough magnitude
        for sample in [1000i16, -1000, 12000, -12000, i16::MAX, i16::MIN + 1] {
            let decoded = mulaw_decode(mulaw_encode(sample)) as i32;
            let tolerance = (sample as i32).abs() / 16 + 16;
            assert!(
                (decoded - sample as i32).abs() <= tolerance,
                "sample {sample} decoded to {decoded}"
            );
        }
    }

    #[test]
    fn test_convert_channels_downmix() {
        let stereo = vec![100i16, 300, -100, -300];
        assert_eq!(convert_channels(stereo, 2, 1), vec![200, -200]);
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[0u8; 320]), 0.0);
        let loud = samples_to_bytes(&[16384i16; 160]);
        assert!((rms_energy(&loud) - 0.5).abs() < 0.001);
    }
}
