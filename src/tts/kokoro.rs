//! In-process synthesis with Kokoro models through sherpa-rs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use super::backend::{AudioFormat, BackendProfile, SynthesisBackend};
use crate::audio::encode_pcm16;
use crate::error::BackendError;

/// Kokoro output sample rate.
const SAMPLE_RATE: u32 = 24000;

/// Model location and voice settings.
#[derive(Debug, Clone)]
pub struct KokoroConfig {
    /// Directory containing `kokoro-multi-lang-v1_0/`.
    pub model_dir: PathBuf,
    /// Voice name, used to pick the lexicon or espeak language.
    pub voice: String,
    pub speaker_id: i32,
    pub speed: f32,
    /// ONNX execution provider (`cpu`, `cuda`, `coreml`).
    pub provider: String,
    pub threads: usize,
    pub debug: bool,
}

impl KokoroConfig {
    fn kokoro_dir(&self) -> PathBuf {
        self.model_dir.join("kokoro-multi-lang-v1_0")
    }

    pub fn model_path(&self) -> PathBuf {
        self.kokoro_dir().join("model.onnx")
    }

    pub fn voices_path(&self) -> PathBuf {
        self.kokoro_dir().join("voices.bin")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.kokoro_dir().join("tokens.txt")
    }

    /// Files that must exist before the model can load.
    pub fn required_files(&self) -> [PathBuf; 3] {
        [self.model_path(), self.voices_path(), self.tokens_path()]
    }

    /// Lexicon files for English and Chinese voices; empty for voices that use espeak-ng.
    pub fn lexicon(&self) -> String {
        let dir = self.kokoro_dir();
        match self.voice.get(..2).unwrap_or("af") {
            "af" | "am" => dir.join("lexicon-us-en.txt").to_string_lossy().to_string(),
            "bf" | "bm" => dir.join("lexicon-gb-en.txt").to_string_lossy().to_string(),
            "zf" | "zm" => format!("{},{}", dir.join("lexicon-us-en.txt").to_string_lossy(), dir.join("lexicon-zh.txt").to_string_lossy()),
            _ => String::new(),
        }
    }

    /// espeak-ng language for voices without a lexicon.
    pub fn language(&self) -> &str {
        match self.voice.get(..2).unwrap_or("") {
            "ef" | "em" => "es",
            "ff" => "fr",
            "hf" | "hm" => "hi",
            "if" | "im" => "it",
            "jf" | "jm" => "ja",
            "pf" | "pm" => "pt-br",
            _ => "",
        }
    }
}

/// Kokoro engine; calls are serialized because the engine is not reentrant.
pub struct KokoroBackend {
    tts: Arc<Mutex<KokoroTts>>,
    speaker_id: i32,
    speed: f32,
}

impl KokoroBackend {
    /// Load the Kokoro model.
    ///
    /// # Errors
    /// Returns an error if a model file is missing.
    pub fn new(config: &KokoroConfig) -> Result<Self> {
        for path in config.required_files() {
            if !path.exists() {
                anyhow::bail!("Required model file not found: {}", path.display());
            }
        }

        info!("Initializing Kokoro synthesizer with {} provider", config.provider);
        info!("Voice: {} (speaker ID: {})", config.voice, config.speaker_id);

        let kokoro_dir = config.kokoro_dir();
        let tts_config = KokoroTtsConfig {
            model: config.model_path().to_string_lossy().to_string(),
            voices: config.voices_path().to_string_lossy().to_string(),
            tokens: config.tokens_path().to_string_lossy().to_string(),
            data_dir: kokoro_dir.join("espeak-ng-data").to_string_lossy().to_string(),
            dict_dir: kokoro_dir.join("dict").to_string_lossy().to_string(),
            lexicon: config.lexicon(),
            lang: config.language().to_string(),
            length_scale: 1.0 / config.speed, // inverse of speed
            onnx_config: OnnxConfig { provider: config.provider.clone(), num_threads: config.threads.try_into().unwrap_or(2), debug: config.debug },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
        };

        let tts = KokoroTts::new(tts_config);
        Ok(Self { tts: Arc::new(Mutex::new(tts)), speaker_id: config.speaker_id, speed: config.speed })
    }
}

#[async_trait]
impl SynthesisBackend for KokoroBackend {
    fn name(&self) -> &str {
        "kokoro"
    }

    fn profile(&self) -> BackendProfile {
        BackendProfile::local(AudioFormat::Wav)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        let tts = self.tts.clone();
        let text = text.to_string();
        let (speaker_id, speed) = (self.speaker_id, self.speed);

        let samples = tokio::task::spawn_blocking(move || tts.lock().create(&text, speaker_id, speed).map(|audio| audio.samples))
            .await
            .map_err(|e| BackendError::transient(format!("synthesis task failed: {}", e)))?
            .map_err(|e| BackendError::transient(format!("TTS generation failed: {}", e)))?;

        if samples.is_empty() {
            return Err(BackendError::transient("Kokoro produced no samples"));
        }

        debug!("🎵 Generated speech ({} samples)", samples.len());
        encode_pcm16(&samples, 1, SAMPLE_RATE).map_err(|e| BackendError::fatal(format!("failed to encode WAV: {}", e)))
    }
}
