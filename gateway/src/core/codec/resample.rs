//! Sample-rate conversion.
//!
//! Buffers of at least one resampler chunk go through rubato's FFT
//! resampler, which band-limits before decimating so 24 kHz synthesis output
//! does not alias into the 8 kHz telephone band. Shorter buffers (single
//! wire frames) use linear interpolation.

use rubato::{FftFixedIn, Resampler};
use tracing::warn;

use super::pcm::PCM_TO_FLOAT_SCALE;

/// Input frames per rubato call; also the threshold below which the linear
/// path is used.
pub const RESAMPLER_CHUNK: usize = 1024;

const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Resample interleaved 16-bit samples. The output always holds exactly
/// `in_frames * to_rate / from_rate` frames.
pub fn resample(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let channels = channels.max(1) as usize;
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Vec::new();
    }
    let out_frames = ((in_frames as u64 * to_rate as u64) / from_rate as u64).max(1) as usize;

    if in_frames < RESAMPLER_CHUNK {
        return resample_linear(samples, channels, in_frames, out_frames, from_rate, to_rate);
    }

    match resample_sinc(samples, channels, in_frames, out_frames, from_rate, to_rate) {
        Ok(out) => out,
        Err(e) => {
            warn!(from_rate, to_rate, error = %e, "FFT resampling failed, using linear interpolation");
            resample_linear(samples, channels, in_frames, out_frames, from_rate, to_rate)
        }
    }
}

fn resample_sinc(
    samples: &[i16],
    channels: usize,
    in_frames: usize,
    out_frames: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<i16>, String> {
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLER_CHUNK,
        RESAMPLER_SUB_CHUNKS,
        channels,
    )
    .map_err(|e| e.to_string())?;

    let planes: Vec<Vec<f32>> = (0..channels)
        .map(|ch| {
            samples
                .iter()
                .skip(ch)
                .step_by(channels)
                .take(in_frames)
                .map(|&s| s as f32 * PCM_TO_FLOAT_SCALE)
                .collect()
        })
        .collect();

    let delay = resampler.output_delay();
    let wanted = delay + out_frames;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels];
    let append = |output: &mut Vec<Vec<f32>>, produced: Vec<Vec<f32>>| {
        for (plane, chunk) in output.iter_mut().zip(produced) {
            plane.extend_from_slice(&chunk);
        }
    };

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= in_frames {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planes.iter().map(|p| &p[pos..pos + needed]).collect();
        let produced = resampler.process(&chunk, None).map_err(|e| e.to_string())?;
        append(&mut output, produced);
        pos += needed;
    }

    if pos < in_frames {
        let chunk: Vec<&[f32]> = planes.iter().map(|p| &p[pos..]).collect();
        let produced = resampler
            .process_partial(Some(&chunk), None)
            .map_err(|e| e.to_string())?;
        append(&mut output, produced);
    }

    // Flush the filter delay line
    while output[0].len() < wanted {
        let produced = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| e.to_string())?;
        if produced.first().is_none_or(|p| p.is_empty()) {
            break;
        }
        append(&mut output, produced);
    }

    let mut out = Vec::with_capacity(out_frames * channels);
    for frame in delay..wanted {
        for plane in &output {
            let value = plane.get(frame).copied().unwrap_or(0.0);
            out.push((value * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
    }
    Ok(out)
}

fn resample_linear(
    samples: &[i16],
    channels: usize,
    in_frames: usize,
    out_frames: usize,
    from_rate: u32,
    to_rate: u32,
) -> Vec<i16> {
    let step = from_rate as f64 / to_rate as f64;

    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let pos = i as f64 * step;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f64;
        let next = (idx + 1).min(in_frames - 1);
        let idx = idx.min(in_frames - 1);
        for ch in 0..channels {
            let a = samples[idx * channels + ch] as f64;
            let b = samples[next * channels + ch] as f64;
            let value = a + (b - a) * frac;
            out.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
    }
    out
}
