//! End-to-end narration of one text: chunk, synthesize, time, combine, persist.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::AudioCombiner;
use crate::error::{CombineError, NarrationError};
use crate::store::{OutputStore, file_name};
use crate::synthesis::{Coordinator, SynthesisSettings};
use crate::text::ChunkingPolicy;
use crate::timing::{DurationMeter, TimedAudioResult, TimingEngine, TimingMetadata, TimingSettings};
use crate::tts::SynthesisBackend;

#[derive(Debug, Clone)]
pub struct NarrationSettings {
    /// Largest chunk handed to the backend, in characters.
    pub chunk_size: usize,
    pub chunking: ChunkingPolicy,
    pub synthesis: SynthesisSettings,
    pub timing: TimingSettings,
    /// Persist `<name>_timing.json` next to the audio.
    pub write_timing_file: bool,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            chunking: ChunkingPolicy::default(),
            synthesis: SynthesisSettings::default(),
            timing: TimingSettings::default(),
            write_timing_file: true,
        }
    }
}

/// Turns text into narrated audio with a read-along transcript.
pub struct Narrator {
    backend: Arc<dyn SynthesisBackend>,
    store: Arc<dyn OutputStore>,
    meter: Arc<DurationMeter>,
    combiner: Option<Arc<dyn AudioCombiner>>,
    settings: NarrationSettings,
    cancel: CancellationToken,
}

impl Narrator {
    /// Create a narrator.
    ///
    /// # Arguments
    /// * `backend` - Synthesis engine shared by every request
    /// * `store` - Where parts, combined audio and timing documents are written
    /// * `meter` - Duration probes used by measurement timing
    /// * `combiner` - Joins parts into one file; `None` keeps only the parts
    /// * `settings` - Chunking, concurrency, retry and timing options
    /// * `cancel` - Cancelling it abandons outstanding synthesis calls
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        store: Arc<dyn OutputStore>,
        meter: DurationMeter,
        combiner: Option<Arc<dyn AudioCombiner>>,
        settings: NarrationSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self { backend, store, meter: Arc::new(meter), combiner, settings, cancel }
    }

    /// Narrate `text`, naming every output after `name`.
    ///
    /// Failed chunks are dropped and reported rather than failing the request;
    /// a missing combiner or an unwritable timing file only degrade the result.
    ///
    /// # Errors
    /// Fails on blank input, when no chunk produced audio, or when a part
    /// cannot be stored.
    pub async fn narrate(&self, text: &str, name: &str) -> Result<TimedAudioResult, NarrationError> {
        if text.trim().is_empty() {
            return Err(NarrationError::EmptyInput);
        }

        let chunks = self.settings.chunking.split(text, self.settings.chunk_size);
        info!(
            "📄 Split {} characters into {} chunk(s) ({:?} policy, max {})",
            text.chars().count(),
            chunks.len(),
            self.settings.chunking,
            self.settings.chunk_size
        );

        // Concurrency and call spacing are scoped to this request
        let coordinator = Coordinator::new(self.backend.clone(), self.settings.synthesis.clone(), self.cancel.clone());
        let engine = TimingEngine::new(coordinator, self.meter.clone(), self.store.clone(), self.settings.timing);
        let timed = engine.generate(&chunks, name).await?;

        if timed.parts.is_empty() {
            if timed.cancelled {
                return Err(NarrationError::Cancelled);
            }
            return Err(NarrationError::NoAudio { attempted: timed.attempted_chunks, dropped: timed.dropped_chunks.len() });
        }
        if !timed.dropped_chunks.is_empty() {
            warn!("⚠️  {} chunk(s) produced no audio: {:?}", timed.dropped_chunks.len(), timed.dropped_chunks);
        }
        if !timed.incomplete_chunks.is_empty() {
            warn!("⚠️  {} chunk(s) are missing sentences: {:?}", timed.incomplete_chunks.len(), timed.incomplete_chunks);
        }

        let audio_files: Vec<String> = timed.parts.iter().map(|p| file_name(p)).collect();

        let combined_file = match &self.combiner {
            Some(combiner) => match combiner.combine(&timed.parts, name).await {
                Ok(path) => Some(file_name(&path)),
                Err(CombineError::Unavailable(reason)) => {
                    warn!("Combiner {} unavailable ({}), keeping individual parts", combiner.name(), reason);
                    None
                }
                Err(e) => {
                    warn!("Combining with {} failed, keeping individual parts: {}", combiner.name(), e);
                    None
                }
            },
            None => None,
        };

        let timing_data = (!timed.segments.is_empty()).then(|| TimingMetadata::new(timed.segments, audio_files.clone()));
        let timing_file = match &timing_data {
            Some(metadata) if self.settings.write_timing_file => self.write_timing(metadata, name).await,
            _ => None,
        };

        let result = TimedAudioResult {
            audio_files,
            combined_file,
            timing_data,
            timing_file,
            dropped_chunks: timed.dropped_chunks,
            incomplete_chunks: timed.incomplete_chunks,
        };
        info!(
            "✅ Narrated {} part(s){}{}",
            result.audio_files.len(),
            result.combined_file.as_ref().map(|f| format!(", combined into {}", f)).unwrap_or_default(),
            result.timing_data.as_ref().map(|t| format!(", {:.1}s of timed text", t.total_duration())).unwrap_or_default()
        );
        Ok(result)
    }

    async fn write_timing(&self, metadata: &TimingMetadata, name: &str) -> Option<String> {
        let json = match metadata.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize timing metadata: {}", e);
                return None;
            }
        };

        match self.store.save(json.as_bytes(), &format!("{}_timing.json", name)).await {
            Ok(path) => Some(file_name(&path)),
            Err(e) => {
                warn!("Failed to write timing file: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FfmpegCombiner, FfmpegSettings, WavCombiner};
    use crate::store::LocalStore;
    use crate::synthesis::RetryPolicy;
    use crate::tts::fake::ScriptedBackend;
    use std::path::PathBuf;
    use std::time::Duration;

    const CHAPTER: &str = "Chapter One\n\n\
        The lighthouse keeper woke before the sun. He climbed the spiral stairs slowly. \
        The lamp had burned all night without trouble. Outside, the sea was calm and grey.\n\n\
        Later that morning a small boat appeared on the horizon. It carried supplies and a letter. \
        The keeper read the letter twice before folding it away.";

    fn settings() -> NarrationSettings {
        NarrationSettings {
            chunk_size: 200,
            synthesis: SynthesisSettings {
                max_concurrent: 3,
                retry: RetryPolicy { max_retries: 1, base_delay: Duration::from_millis(5), max_delay: Duration::from_millis(10) },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn narrator(backend: ScriptedBackend, dir: &std::path::Path, combiner: bool, settings: NarrationSettings) -> Narrator {
        let store: Arc<dyn OutputStore> = Arc::new(LocalStore::create(dir).await.unwrap());
        let combiner: Option<Arc<dyn AudioCombiner>> = combiner.then(|| Arc::new(WavCombiner::new(store.clone())) as Arc<dyn AudioCombiner>);
        Narrator::new(Arc::new(backend), store, DurationMeter::default(), combiner, settings, CancellationToken::new())
    }

    fn wav_seconds(path: PathBuf) -> f64 {
        let reader = hound::WavReader::open(path).unwrap();
        reader.duration() as f64 / reader.spec().sample_rate as f64
    }

    #[tokio::test]
    async fn test_narrate_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = narrator(ScriptedBackend::new(), dir.path(), true, settings()).await;

        let result = narrator.narrate(CHAPTER, "keeper").await.unwrap();

        assert!(result.has_timing_data());
        assert!(result.dropped_chunks.is_empty());
        assert_eq!(result.audio_files[0], "keeper_part000.wav");
        assert_eq!(result.combined_file.as_deref(), Some("keeper_combined.wav"));
        assert_eq!(result.primary_file(), Some("keeper_combined.wav"));
        assert_eq!(result.timing_file.as_deref(), Some("keeper_timing.json"));

        let timing = result.timing_data.as_ref().unwrap();
        assert_eq!(timing.segments()[0].text, "Chapter One");
        assert_eq!(timing.segments()[0].segment_type, crate::timing::SegmentType::Heading);
        assert_eq!(timing.segments().len(), 8);
        assert_eq!(timing.audio_files(), result.audio_files.as_slice());

        // Offsets stay valid against the combined file.
        let combined = wav_seconds(dir.path().join("keeper_combined.wav"));
        assert!((timing.total_duration() - combined).abs() < 1e-6, "{} vs {}", timing.total_duration(), combined);

        let persisted = std::fs::read_to_string(dir.path().join("keeper_timing.json")).unwrap();
        let loaded = TimingMetadata::from_json(&persisted).unwrap();
        assert_eq!(loaded.segments().len(), 8);
        assert_eq!(loaded.segment_at(0.1).map(|s| s.text.as_str()), Some("Chapter One"));
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = narrator(ScriptedBackend::new(), dir.path(), false, settings()).await;
        assert!(matches!(narrator.narrate("  \n\t ", "blank").await, Err(NarrationError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_no_audio_when_every_chunk_fails() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = narrator(ScriptedBackend::new().fail_fatally(" "), dir.path(), false, settings()).await;

        match narrator.narrate(CHAPTER, "keeper").await {
            Err(NarrationError::NoAudio { attempted, dropped }) => {
                assert!(attempted > 0);
                assert_eq!(attempted, dropped);
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.audio_files)),
        }
    }

    #[tokio::test]
    async fn test_placeholder_only_input_produces_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let narrator = narrator(backend, dir.path(), false, settings()).await;

        let result = narrator.narrate("Error: extraction failed for page 4", "broken").await;
        assert!(matches!(result, Err(NarrationError::NoAudio { attempted: 0, dropped: 0 })));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn OutputStore> = Arc::new(LocalStore::create(dir.path()).await.unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let narrator = Narrator::new(Arc::new(ScriptedBackend::new()), store, DurationMeter::default(), None, settings(), cancel);

        assert!(matches!(narrator.narrate(CHAPTER, "keeper").await, Err(NarrationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_chunk_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = narrator(ScriptedBackend::new().fail_fatally("small boat"), dir.path(), true, settings()).await;

        let result = narrator.narrate(CHAPTER, "keeper").await.unwrap();

        assert_eq!(result.dropped_chunks.len(), 1);
        assert!(result.incomplete_chunks.is_empty());
        let timing = result.timing_data.unwrap();
        assert!(timing.segments().iter().all(|s| !s.text.contains("small boat")));
        assert!(result.combined_file.is_some());
    }

    #[tokio::test]
    async fn test_lost_sentences_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = NarrationSettings { chunk_size: 3000, ..settings() };
        let narrator = narrator(ScriptedBackend::new().fail_fatally("small boat"), dir.path(), false, settings).await;

        let result = narrator.narrate(CHAPTER, "keeper").await.unwrap();

        assert!(result.dropped_chunks.is_empty());
        assert_eq!(result.incomplete_chunks, vec![0]);
        assert_eq!(result.timing_data.unwrap().segments().len(), 5);
    }

    #[tokio::test]
    async fn test_unavailable_combiner_keeps_parts() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn OutputStore> = Arc::new(LocalStore::create(dir.path()).await.unwrap());
        let ffmpeg = FfmpegSettings { binary: PathBuf::from("/nonexistent/ffmpeg"), ..Default::default() };
        let combiner: Arc<dyn AudioCombiner> = Arc::new(FfmpegCombiner::new(ffmpeg, store.clone()));
        let narrator = Narrator::new(Arc::new(ScriptedBackend::new()), store, DurationMeter::default(), Some(combiner), settings(), CancellationToken::new());

        let result = narrator.narrate(CHAPTER, "keeper").await.unwrap();

        assert!(result.combined_file.is_none());
        assert!(!result.audio_files.is_empty());
        assert_eq!(result.primary_file(), Some("keeper_part000.wav"));
        assert!(result.has_timing_data());
    }

    #[tokio::test]
    async fn test_timing_file_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = NarrationSettings { write_timing_file: false, ..settings() };
        let narrator = narrator(ScriptedBackend::new(), dir.path(), false, settings).await;

        let result = narrator.narrate(CHAPTER, "keeper").await.unwrap();

        assert!(result.timing_file.is_none());
        assert!(result.has_timing_data());
        assert!(!dir.path().join("keeper_timing.json").exists());
    }
}
