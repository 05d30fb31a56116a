//! Sample-rate conversion using rubato's FFT-based resampler.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Chunk size for FFT-based resampling (provides good quality and performance).
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Calls that may return no frames after the input is exhausted before giving up.
const MAX_EMPTY_ROUNDS: usize = 8;

/// Resample interleaved audio from one rate to another.
///
/// The resampler's startup delay is removed and the tail is flushed, so the
/// result holds exactly `round(frames * to_rate / from_rate)` frames.
/// A trailing partial frame in `samples` is ignored.
///
/// # Example
/// ```no_run
/// use readalong::audio::resampler::resample;
///
/// let part = vec![0.0; 24000]; // 1 second of mono at 24kHz
/// let aligned = resample(&part, 1, 24000, 22050).unwrap();
/// assert_eq!(aligned.len(), 22050);
/// ```
pub fn resample(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if channels == 0 || from_rate == 0 || to_rate == 0 {
        anyhow::bail!("Invalid resampling request: {} channel(s), {} Hz -> {} Hz", channels, from_rate, to_rate);
    }

    let frames = samples.len() / channels;
    if from_rate == to_rate || frames == 0 {
        return Ok(samples[..frames * channels].to_vec());
    }

    let mut resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, channels, FixedSync::Input)
        .context("Failed to create resampler")?;

    let delay = resampler.output_delay();
    let expected = (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let output_frames_max = resampler.output_frames_max();

    let mut input_chunk = vec![0.0f32; CHUNK_SIZE * channels];
    let mut output_buffer = vec![0.0f32; output_frames_max * channels];
    let mut output = Vec::with_capacity((delay + expected + output_frames_max) * channels);

    let mut pos = 0;
    let mut empty_rounds = 0;
    while output.len() < (delay + expected) * channels {
        // Past the end of the input the chunk stays zeroed to flush the filter
        input_chunk.fill(0.0);
        if pos < frames {
            let end = (pos + CHUNK_SIZE).min(frames);
            input_chunk[..(end - pos) * channels].copy_from_slice(&samples[pos * channels..end * channels]);
        }
        pos += CHUNK_SIZE;

        let input_adapter = InterleavedSlice::new(&input_chunk, channels, CHUNK_SIZE).context("Failed to create input adapter")?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut output_buffer, channels, output_frames_max).context("Failed to create output adapter")?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
        output.extend_from_slice(&output_buffer[..frames_written * channels]);

        if frames_written == 0 && pos >= frames {
            empty_rounds += 1;
            if empty_rounds > MAX_EMPTY_ROUNDS {
                anyhow::bail!("Resampler stopped producing output after {} of {} frames", output.len() / channels, delay + expected);
            }
        }
    }

    Ok(output[delay * channels..(delay + expected) * channels].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_upsampling() {
        let samples = vec![0.0; 16000]; // 1 second at 16kHz
        let result = resample(&samples, 1, 16000, 48000).unwrap();
        assert_eq!(result.len(), 48000);
    }

    #[test]
    fn test_resample_downsampling() {
        let samples = vec![0.0; 48000]; // 1 second at 48kHz
        let result = resample(&samples, 1, 48000, 16000).unwrap();
        assert_eq!(result.len(), 16000);
    }

    #[test]
    fn test_resample_stereo_keeps_interleaving() {
        let samples = vec![0.0; 44100 * 2];
        let result = resample(&samples, 2, 44100, 22050).unwrap();
        assert_eq!(result.len(), 22050 * 2);
    }

    #[test]
    fn test_resample_preserves_level() {
        let samples = vec![0.5; 16000];
        let result = resample(&samples, 1, 16000, 24000).unwrap();
        assert_eq!(result.len(), 24000);
        let middle = result[12000];
        assert!((middle - 0.5).abs() < 0.05, "got {}", middle);
    }

    #[test]
    fn test_same_rate_is_a_copy() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 1, 22050, 22050).unwrap(), samples);
        assert!(resample(&samples, 0, 22050, 16000).is_err());
    }
}
