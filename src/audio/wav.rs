//! WAV encoding and the in-process WAV combiner.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info};

use super::combiner::AudioCombiner;
use super::resampler::resample;
use crate::error::CombineError;
use crate::store::{OutputStore, file_name};

/// Encode float samples (interleaved, -1.0..=1.0) as a 16-bit PCM WAV file.
pub fn encode_pcm16(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec { channels, sample_rate, bits_per_sample: 16, sample_format: SampleFormat::Int };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decoded PCM audio.
#[derive(Debug, Clone)]
struct Pcm {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode(bytes: &[u8]) -> Result<Pcm, hound::Error> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader.into_samples::<i32>().map(|s| s.map(|v| v as f32 / scale)).collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Pcm { samples, channels: spec.channels, sample_rate: spec.sample_rate })
}

/// Mix interleaved frames down to mono by averaging channels.
pub fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}

/// Concatenate decoded parts in order at the first part's rate.
///
/// Parts keep their channel count when they all agree; otherwise everything
/// is mixed to mono.
fn concatenate(parts: Vec<Pcm>) -> anyhow::Result<Pcm> {
    let Some(first) = parts.first() else {
        anyhow::bail!("No audio to concatenate");
    };
    let sample_rate = first.sample_rate;
    let same_layout = parts.iter().all(|p| p.channels == first.channels);
    let channels = if same_layout { first.channels } else { 1 };

    let mut samples = Vec::new();
    for part in parts {
        let data = if same_layout { part.samples } else { mix_to_mono(&part.samples, part.channels as usize) };
        samples.extend(resample(&data, channels as usize, part.sample_rate, sample_rate)?);
    }

    Ok(Pcm { samples, channels, sample_rate })
}

/// Combines WAV parts without external tools.
pub struct WavCombiner {
    store: Arc<dyn OutputStore>,
}

impl WavCombiner {
    pub fn new(store: Arc<dyn OutputStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AudioCombiner for WavCombiner {
    fn name(&self) -> &str {
        "wav"
    }

    async fn combine(&self, parts: &[PathBuf], name: &str) -> Result<PathBuf, CombineError> {
        let mut inputs = Vec::with_capacity(parts.len());
        for path in parts {
            let bytes = tokio::fs::read(path).await?;
            if !is_wav(&bytes) {
                return Err(CombineError::Unsupported(format!("{} is not a WAV file", file_name(path))));
            }
            inputs.push(bytes);
        }

        let output = format!("{}_combined.wav", name);
        let bytes = match inputs.len() {
            0 => return Err(CombineError::Failed("no audio parts to combine".to_string())),
            1 => inputs.remove(0),
            count => {
                debug!("Decoding {} WAV parts", count);
                tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CombineError> {
                    let decoded = inputs.iter().map(|bytes| decode(bytes)).collect::<Result<Vec<_>, _>>().map_err(|e| CombineError::Failed(e.to_string()))?;
                    let combined = concatenate(decoded).map_err(|e| CombineError::Failed(e.to_string()))?;
                    encode_pcm16(&combined.samples, combined.channels, combined.sample_rate).map_err(|e| CombineError::Failed(e.to_string()))
                })
                .await
                .map_err(|e| CombineError::Failed(e.to_string()))??
            }
        };

        let path = self.store.save(&bytes, &output).await?;
        info!("🔗 Combined {} part(s) into {}", parts.len(), file_name(&path));
        Ok(path)
    }
}
