//! Timing data returned to callers and persisted for read-along consumers.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Structural role of a timed text segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    #[default]
    Sentence,
    Paragraph,
    Heading,
}

/// A span of text with its position on the audio timeline, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub segment_type: SegmentType,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub sentence_index: usize,
}

impl TextSegment {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether `time` falls inside `[start_time, end_time]`.
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time <= self.end_time()
    }
}

/// Ordered text segments mapped onto the audio produced for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingMetadata {
    total_duration: f64,
    audio_files: Vec<String>,
    text_segments: Vec<TextSegment>,
}

impl TimingMetadata {
    /// Build metadata from segments in any order.
    ///
    /// Segments are sorted by start time and the total duration is the
    /// latest segment end.
    pub fn new(mut segments: Vec<TextSegment>, audio_files: Vec<String>) -> Self {
        segments.sort_by(|a, b| a.start_time.partial_cmp(&b.start_time).unwrap_or(Ordering::Equal));
        let total_duration = segments.iter().map(TextSegment::end_time).fold(0.0, f64::max);
        Self { total_duration, audio_files, text_segments: segments }
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn audio_files(&self) -> &[String] {
        &self.audio_files
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.text_segments
    }

    pub fn is_empty(&self) -> bool {
        self.text_segments.is_empty()
    }

    /// Find the segment playing at `time`.
    ///
    /// Bounds are inclusive, so at the exact boundary between two segments
    /// the later one wins.
    pub fn segment_at(&self, time: f64) -> Option<&TextSegment> {
        self.text_segments.iter().rev().find(|segment| segment.contains(time))
    }

    /// Serialize to the persisted JSON document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Load a persisted JSON document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Everything a narration request hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedAudioResult {
    /// Per-part audio file names in playback order.
    pub audio_files: Vec<String>,
    pub combined_file: Option<String>,
    pub timing_data: Option<TimingMetadata>,
    /// Name of the persisted timing document, when one was written.
    pub timing_file: Option<String>,
    /// Chunks that produced no audio at all.
    pub dropped_chunks: Vec<usize>,
    /// Chunks that kept some audio but lost sentences to failed synthesis.
    pub incomplete_chunks: Vec<usize>,
}

impl TimedAudioResult {
    pub fn has_timing_data(&self) -> bool {
        self.timing_data.as_ref().is_some_and(|timing| !timing.is_empty())
    }

    /// The file a player should load: the combined file if any, else the first part.
    pub fn primary_file(&self) -> Option<&str> {
        self.combined_file.as_deref().or_else(|| self.audio_files.first().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, start_time: f64, duration: f64) -> TextSegment {
        TextSegment { text: text.to_string(), start_time, duration, segment_type: SegmentType::Sentence, chunk_index: 0, sentence_index: 0 }
    }

    fn sample() -> TimingMetadata {
        TimingMetadata::new(
            vec![segment("Second.", 1.5, 2.0), segment("First.", 0.0, 1.5), segment("Third.", 3.5, 0.75)],
            vec!["book_part000.wav".to_string()],
        )
    }

    #[test]
    fn test_new_sorts_and_computes_total() {
        let timing = sample();
        let starts: Vec<f64> = timing.segments().iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![0.0, 1.5, 3.5]);
        assert_eq!(timing.total_duration(), 4.25);
        assert!(!timing.is_empty());
    }

    #[test]
    fn test_empty_metadata() {
        let timing = TimingMetadata::new(Vec::new(), Vec::new());
        assert_eq!(timing.total_duration(), 0.0);
        assert!(timing.segment_at(0.0).is_none());
    }

    #[test]
    fn test_segment_at_inclusive_bounds() {
        let timing = sample();
        assert_eq!(timing.segment_at(0.0).map(|s| s.text.as_str()), Some("First."));
        assert_eq!(timing.segment_at(1.0).map(|s| s.text.as_str()), Some("First."));
        assert_eq!(timing.segment_at(1.5).map(|s| s.text.as_str()), Some("Second."));
        assert_eq!(timing.segment_at(4.25).map(|s| s.text.as_str()), Some("Third."));
        assert!(timing.segment_at(4.26).is_none());
        assert!(timing.segment_at(-0.1).is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let mut timing = sample();
        timing.text_segments[1].segment_type = SegmentType::Heading;
        timing.text_segments[2].chunk_index = 3;
        timing.text_segments[2].sentence_index = 7;

        let json = timing.to_json().unwrap();
        let loaded = TimingMetadata::from_json(&json).unwrap();

        assert!((loaded.total_duration() - timing.total_duration()).abs() < 1e-6);
        assert_eq!(loaded.segments().len(), timing.segments().len());
        for (a, b) in loaded.segments().iter().zip(timing.segments()) {
            assert_eq!(a.text, b.text);
            assert!((a.start_time - b.start_time).abs() < 1e-6);
            assert!((a.duration - b.duration).abs() < 1e-6);
            assert_eq!(a.segment_type, b.segment_type);
            assert_eq!(a.chunk_index, b.chunk_index);
            assert_eq!(a.sentence_index, b.sentence_index);
        }
        assert_eq!(loaded, timing);
    }

    #[test]
    fn test_persisted_field_names() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert!(value.get("total_duration").is_some());
        assert_eq!(value["audio_files"][0], "book_part000.wav");
        let first = &value["text_segments"][0];
        assert_eq!(first["segment_type"], "sentence");
        for field in ["text", "start_time", "duration", "chunk_index", "sentence_index"] {
            assert!(first.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_has_timing_data() {
        let mut result = TimedAudioResult {
            audio_files: vec!["a.wav".to_string()],
            combined_file: None,
            timing_data: None,
            timing_file: None,
            dropped_chunks: Vec::new(),
            incomplete_chunks: Vec::new(),
        };
        assert!(!result.has_timing_data());
        assert_eq!(result.primary_file(), Some("a.wav"));

        result.timing_data = Some(TimingMetadata::new(Vec::new(), Vec::new()));
        assert!(!result.has_timing_data());

        result.timing_data = Some(sample());
        result.combined_file = Some("a_combined.mp3".to_string());
        assert!(result.has_timing_data());
        assert_eq!(result.primary_file(), Some("a_combined.mp3"));
    }
}
