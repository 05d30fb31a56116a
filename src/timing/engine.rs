//! Produces ordered audio parts and their timing for a whole request.
//!
//! The strategy is chosen once per request from the backend's capabilities:
//! native timestamps when the backend has them, measured durations otherwise.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::estimation::{normalize_native, place};
use super::measurement::{DEFAULT_MIN_SENTENCE_SECS, SentenceBatch, layout_batch, plan_batches, timed_sentences};
use super::model::TextSegment;
use super::probe::DurationMeter;
use crate::store::OutputStore;
use crate::synthesis::Coordinator;
use crate::text::TextChunk;
use crate::tts::{TimedAudio, require_audio};

/// How segment timing is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Estimation when the backend supports timestamps, measurement otherwise
    #[default]
    Auto,
    /// Native backend timestamps, measuring only the chunks that need it
    Estimation,
    /// Measure synthesized sentence batches
    Measurement,
    /// Native timestamps only; redo the request with measurement if no timing comes back
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSettings {
    pub mode: TimingMode,
    /// Longest chunk (in characters) sent for native timestamps.
    pub estimation_max_chars: usize,
    /// Floor for each measured sentence, in seconds.
    pub min_sentence_secs: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self { mode: TimingMode::Auto, estimation_max_chars: 3000, min_sentence_secs: DEFAULT_MIN_SENTENCE_SECS }
    }
}

/// Audio parts in playback order with their timing.
#[derive(Debug, Clone, Default)]
pub struct TimedParts {
    /// Strategy that produced the timing.
    pub mode: TimingMode,
    pub parts: Vec<PathBuf>,
    pub segments: Vec<TextSegment>,
    /// Chunks expected to produce audio.
    pub attempted_chunks: usize,
    /// Chunks that produced no audio at all.
    pub dropped_chunks: Vec<usize>,
    /// Chunks that produced audio but lost one or more sentence batches.
    pub incomplete_chunks: Vec<usize>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Placeholder or nothing to speak.
    Skip,
    Native,
    Measure,
}

/// Turns chunks into stored audio parts plus text timing.
pub struct TimingEngine {
    coordinator: Coordinator,
    meter: Arc<DurationMeter>,
    store: Arc<dyn OutputStore>,
    settings: TimingSettings,
}

impl TimingEngine {
    pub fn new(coordinator: Coordinator, meter: Arc<DurationMeter>, store: Arc<dyn OutputStore>, settings: TimingSettings) -> Self {
        Self { coordinator, meter, store, settings }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Strategy that will actually run for this backend.
    pub fn resolve_mode(&self) -> TimingMode {
        let native = self.coordinator.backend().supports_timestamps();
        match self.settings.mode {
            TimingMode::Auto if native => TimingMode::Estimation,
            TimingMode::Auto => TimingMode::Measurement,
            TimingMode::Estimation | TimingMode::Hybrid if !native => {
                warn!("{} has no native timestamps, using measurement mode", self.coordinator.backend().name());
                TimingMode::Measurement
            }
            mode => mode,
        }
    }

    /// Synthesize `chunks`, store each part as `<name>_partNNN.<ext>` and time every sentence.
    ///
    /// # Errors
    /// Returns an error only if a part cannot be written to the store.
    pub async fn generate(&self, chunks: &[TextChunk], name: &str) -> io::Result<TimedParts> {
        let mode = self.resolve_mode();
        info!("⏱️  Timing mode: {:?}", mode);

        match mode {
            TimingMode::Hybrid => {
                let first = self.run(chunks, name, mode).await?;
                if !first.segments.is_empty() || first.cancelled {
                    return Ok(first);
                }

                warn!("Native timestamps produced no timing, redoing the request in measurement mode");
                for part in &first.parts {
                    if let Err(e) = self.store.remove(part).await {
                        warn!("Failed to remove {}: {}", part.display(), e);
                    }
                }
                self.run(chunks, name, TimingMode::Measurement).await
            }
            mode => self.run(chunks, name, mode).await,
        }
    }

    async fn run(&self, chunks: &[TextChunk], name: &str, mode: TimingMode) -> io::Result<TimedParts> {
        let native = matches!(mode, TimingMode::Estimation | TimingMode::Hybrid);
        let fallback = mode == TimingMode::Estimation;
        let max_chars = self.settings.estimation_max_chars;

        let mut plans: Vec<Plan> = chunks
            .iter()
            .map(|chunk| {
                if self.coordinator.is_placeholder(&chunk.text) {
                    Plan::Skip
                } else if native && chunk.char_len() <= max_chars {
                    Plan::Native
                } else {
                    if native {
                        info!("Chunk {} has {} chars (limit {}), timing it by measurement", chunk.index, chunk.char_len(), max_chars);
                    }
                    Plan::Measure
                }
            })
            .collect();

        let mut native_audio: Vec<Option<TimedAudio>> = chunks.iter().map(|_| None).collect();
        if plans.contains(&Plan::Native) {
            let units = chunks.iter().zip(&plans).map(|(chunk, plan)| (*plan == Plan::Native).then(|| chunk.text.clone())).collect();
            let backend = self.coordinator.backend().clone();
            let batch = self
                .coordinator
                .run(units, move |text: String| {
                    let backend = backend.clone();
                    async move {
                        let timed = backend.synthesize_with_timestamps(&text).await?;
                        Ok(TimedAudio { audio: require_audio(timed.audio)?, segments: timed.segments })
                    }
                })
                .await;

            for (pos, output) in batch.outputs.into_iter().enumerate() {
                if plans[pos] != Plan::Native {
                    continue;
                }
                match output {
                    Some(timed) => native_audio[pos] = Some(timed),
                    None if fallback && !batch.report.cancelled.contains(&pos) => {
                        info!("Native timing failed for chunk {}, falling back to measurement", chunks[pos].index);
                        plans[pos] = Plan::Measure;
                    }
                    None => {}
                }
            }
        }

        let mut batches: Vec<(usize, SentenceBatch)> = Vec::new();
        for (pos, chunk) in chunks.iter().enumerate() {
            if plans[pos] != Plan::Measure {
                continue;
            }
            let planned = plan_batches(chunk.index, &chunk.text);
            if planned.is_empty() {
                debug!("Chunk {} has nothing to speak", chunk.index);
                plans[pos] = Plan::Skip;
            }
            batches.extend(planned.into_iter().map(|batch| (pos, batch)));
        }

        let mut measured: Vec<Vec<(SentenceBatch, Vec<u8>)>> = chunks.iter().map(|_| Vec::new()).collect();
        let mut lost_batches = vec![0usize; chunks.len()];
        if !batches.is_empty() {
            debug!("Synthesizing {} sentence batches for measurement", batches.len());
            let units = batches.iter().map(|(_, batch)| Some(batch.text())).collect();
            let backend = self.coordinator.backend().clone();
            let batch = self
                .coordinator
                .run(units, move |text: String| {
                    let backend = backend.clone();
                    async move { backend.synthesize(&text).await.and_then(require_audio) }
                })
                .await;

            for ((pos, sentence_batch), output) in batches.into_iter().zip(batch.outputs) {
                match output {
                    Some(audio) => measured[pos].push((sentence_batch, audio)),
                    None => {
                        warn!(
                            chunk = chunks[pos].index,
                            batch_start = sentence_batch.first_sentence,
                            sentences = sentence_batch.sentences.len(),
                            "Sentence batch produced no audio"
                        );
                        lost_batches[pos] += 1;
                    }
                }
            }
        }

        let extension = self.coordinator.backend().profile().format.extension();
        let min_secs = self.settings.min_sentence_secs;
        let mut result = TimedParts { mode: if native { mode } else { TimingMode::Measurement }, ..Default::default() };
        let mut cumulative = 0.0;

        for (pos, chunk) in chunks.iter().enumerate() {
            if plans[pos] == Plan::Skip {
                continue;
            }
            result.attempted_chunks += 1;
            let parts_before = result.parts.len();

            if let Some(timed) = native_audio[pos].take() {
                let path = self.save_part(&timed.audio, name, result.parts.len(), extension).await?;
                let segments = normalize_native(timed.segments, chunk.index);

                if !segments.is_empty() {
                    let (segments, end) = place(segments, cumulative);
                    result.segments.extend(segments);
                    cumulative = end;
                } else {
                    let seconds = self.meter.measure(&path, timed.audio.len()).await;
                    if fallback {
                        warn!("Chunk {} came back without usable timestamps, measuring its audio", chunk.index);
                        let whole = SentenceBatch { chunk_index: chunk.index, first_sentence: 0, sentences: timed_sentences(&chunk.text) };
                        let (segments, end) = layout_batch(&whole, seconds, cumulative, min_secs);
                        result.segments.extend(segments);
                        cumulative = end.max(cumulative + seconds);
                    } else {
                        cumulative += seconds;
                    }
                }
                result.parts.push(path);
            }

            for (batch, audio) in measured[pos].drain(..) {
                let path = self.save_part(&audio, name, result.parts.len(), extension).await?;
                let seconds = self.meter.measure(&path, audio.len()).await;
                let (segments, end) = layout_batch(&batch, seconds, cumulative, min_secs);
                debug!(chunk = chunk.index, batch_start = batch.first_sentence, seconds, "Measured sentence batch");
                result.segments.extend(segments);
                cumulative = end;
                result.parts.push(path);
            }

            if result.parts.len() == parts_before {
                result.dropped_chunks.push(chunk.index);
            } else if lost_batches[pos] > 0 {
                result.incomplete_chunks.push(chunk.index);
            }
        }

        result.cancelled = self.coordinator.cancel_token().is_cancelled();
        info!(
            "Produced {} audio part(s) with {} timed segment(s) ({:.1}s), {} chunk(s) dropped, {} incomplete",
            result.parts.len(),
            result.segments.len(),
            cumulative,
            result.dropped_chunks.len(),
            result.incomplete_chunks.len()
        );
        Ok(result)
    }

    async fn save_part(&self, audio: &[u8], name: &str, number: usize, extension: &str) -> io::Result<PathBuf> {
        self.store.save(audio, &format!("{}_part{:03}.{}", name, number, extension)).await
    }
}
