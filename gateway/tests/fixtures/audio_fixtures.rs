//! Audio test fixtures
//!
//! Generated rather than loaded so tests have no file dependencies. All
//! audio is the telephony default: 8 kHz, 16-bit signed little-endian PCM,
//! mono.

use std::f32::consts::PI;

pub const SAMPLE_RATE: u32 = 8000;

/// One 20 ms frame at 8 kHz, in bytes
pub const FRAME_BYTES: usize = 320;
pub const FRAME_MS: u64 = 20;

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Sine tone well above the default energy threshold.
pub fn generate_tone(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / SAMPLE_RATE as f32;
    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// One voiced 20 ms frame.
pub fn voiced_frame() -> Vec<u8> {
    samples_to_bytes(&generate_tone(FRAME_BYTES / 2, 440.0, 0.5))
}

/// One silent 20 ms frame.
pub fn silent_frame() -> Vec<u8> {
    vec![0u8; FRAME_BYTES]
}

/// `total_bytes` of voiced audio split into 20 ms frames.
pub fn voiced_frames(total_bytes: usize) -> Vec<Vec<u8>> {
    let frame = voiced_frame();
    let mut frames = Vec::new();
    let mut remaining = total_bytes;
    while remaining > 0 {
        let len = remaining.min(FRAME_BYTES);
        frames.push(frame[..len].to_vec());
        remaining -= len;
    }
    frames
}

/// Deterministic synthesized audio for `text`: 40 bytes of PCM per
/// character, so clip length tracks text length.
pub fn synthetic_speech(text: &str) -> Vec<u8> {
    let samples = generate_tone(text.chars().count().max(1) * 20, 220.0, 0.3);
    samples_to_bytes(&samples)
}

/// Byte length of [`synthetic_speech`] for `text`.
pub fn clip_len(text: &str) -> usize {
    text.chars().count().max(1) * 40
}
