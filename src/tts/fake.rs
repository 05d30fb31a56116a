//! Scripted in-memory backend for exercising the pipeline without a real engine.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{AudioFormat, BackendProfile, SynthesisBackend, TimedAudio};
use crate::error::BackendError;
use crate::text::{sentence_spans, word_count};
use crate::timing::{SegmentType, TextSegment};

pub const SAMPLE_RATE: u32 = 8000;

/// Encode `seconds` of silence as 16-bit mono WAV.
pub fn wav_bytes(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
    let frames = (seconds * sample_rate as f64).round() as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Backend whose failures, latencies and capabilities are scripted per text.
///
/// Rules match when the synthesized text contains the scripted key. Audio is
/// valid WAV lasting `seconds_per_word` per spoken word.
pub struct ScriptedBackend {
    timestamps: bool,
    seconds_per_word: f64,
    min_interval: Duration,
    failures: Mutex<HashMap<String, u32>>,
    fatal: HashSet<String>,
    latency: HashMap<String, Duration>,
    native_failures: HashSet<String>,
    without_segments: HashSet<String>,
    attempts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            timestamps: false,
            seconds_per_word: 0.25,
            min_interval: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            fatal: HashSet::new(),
            latency: HashMap::new(),
            native_failures: HashSet::new(),
            without_segments: HashSet::new(),
            attempts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Fail transiently `times` times before succeeding.
    pub fn fail_times(self, key: &str, times: u32) -> Self {
        self.failures.lock().insert(key.to_string(), times);
        self
    }

    pub fn fail_fatally(mut self, key: &str) -> Self {
        self.fatal.insert(key.to_string());
        self
    }

    pub fn delay(mut self, key: &str, latency: Duration) -> Self {
        self.latency.insert(key.to_string(), latency);
        self
    }

    /// Make timestamped calls fail for matching text (plain calls still work).
    pub fn fail_native(mut self, key: &str) -> Self {
        self.native_failures.insert(key.to_string());
        self
    }

    /// Return audio but no segments from timestamped calls for matching text.
    pub fn without_segments(mut self, key: &str) -> Self {
        self.without_segments.insert(key.to_string());
        self
    }

    /// Calls made with text containing `key`.
    pub fn attempts(&self, key: &str) -> usize {
        self.attempts.lock().iter().filter(|text| text.contains(key)).count()
    }

    pub fn total_calls(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn matches(keys: &HashSet<String>, text: &str) -> bool {
        keys.iter().any(|key| text.contains(key.as_str()))
    }

    fn seconds_for(&self, text: &str) -> f64 {
        (word_count(text) as f64 * self.seconds_per_word).max(0.1)
    }

    async fn call(&self, text: &str) -> Result<(), BackendError> {
        self.attempts.lock().push(text.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let latency = self.latency.iter().find(|(key, _)| text.contains(key.as_str())).map(|(_, latency)| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if Self::matches(&self.fatal, text) {
            return Err(BackendError::fatal(format!("scripted fatal failure for {:?}", text)));
        }

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.iter_mut().find(|(key, _)| text.contains(key.as_str())).map(|(_, remaining)| remaining)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(BackendError::transient(format!("scripted transient failure for {:?}", text)));
        }
        Ok(())
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn profile(&self) -> BackendProfile {
        BackendProfile { format: AudioFormat::Wav, cloud: false, min_interval: self.min_interval }
    }

    fn supports_timestamps(&self) -> bool {
        self.timestamps
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        self.call(text).await?;
        Ok(wav_bytes(self.seconds_for(text), SAMPLE_RATE))
    }

    async fn synthesize_with_timestamps(&self, text: &str) -> Result<TimedAudio, BackendError> {
        if !self.timestamps {
            return Err(BackendError::fatal("timestamps not scripted"));
        }
        self.call(text).await?;
        if Self::matches(&self.native_failures, text) {
            return Err(BackendError::transient("scripted native timestamp failure"));
        }

        let mut segments = Vec::new();
        let mut start = 0.0;
        for sentence in sentence_spans(text, true) {
            let duration = self.seconds_for(sentence);
            segments.push(TextSegment {
                text: sentence.to_string(),
                start_time: start,
                duration,
                segment_type: SegmentType::Sentence,
                chunk_index: 0,
                sentence_index: segments.len(),
            });
            start += duration;
        }

        let audio = wav_bytes(start.max(0.1), SAMPLE_RATE);
        if Self::matches(&self.without_segments, text) {
            segments.clear();
        }
        Ok(TimedAudio { audio, segments })
    }
}
