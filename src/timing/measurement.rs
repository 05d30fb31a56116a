//! Measured-duration timing: batch sentences, measure the audio, distribute by word count.

use crate::text::{Sentence, split_into_sentences};

use super::model::TextSegment;

/// Smallest and largest number of sentences synthesized together.
pub const MIN_BATCH: usize = 5;
pub const MAX_BATCH: usize = 15;

/// Batches aimed for per chunk.
const TARGET_BATCHES: usize = 10;

/// Shortest duration any sentence is given, in seconds.
pub const DEFAULT_MIN_SENTENCE_SECS: f64 = 0.3;

/// Sentences synthesized as one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceBatch {
    pub chunk_index: usize,
    /// Index of the first sentence within its chunk.
    pub first_sentence: usize,
    pub sentences: Vec<Sentence>,
}

impl SentenceBatch {
    /// Text sent to the backend.
    pub fn text(&self) -> String {
        self.sentences.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
    }
}

/// Sentences per batch so a chunk yields about ten batches.
pub fn batch_size(sentence_count: usize) -> usize {
    (sentence_count / TARGET_BATCHES).clamp(MIN_BATCH, MAX_BATCH)
}

/// Sentences of a chunk worth timing; markup-only sentences are dropped.
pub fn timed_sentences(text: &str) -> Vec<Sentence> {
    split_into_sentences(text).into_iter().filter(|s| !s.clean_text().is_empty()).collect()
}

/// Split a chunk into synthesis batches.
pub fn plan_batches(chunk_index: usize, text: &str) -> Vec<SentenceBatch> {
    let sentences = timed_sentences(text);
    let size = batch_size(sentences.len());

    sentences
        .chunks(size)
        .enumerate()
        .map(|(batch, sentences)| SentenceBatch { chunk_index, first_sentence: batch * size, sentences: sentences.to_vec() })
        .collect()
}

/// Split `total` seconds across items in proportion to their weights.
///
/// Equal shares when every weight is zero.
pub fn distribute(total: f64, weights: &[usize]) -> Vec<f64> {
    let sum: usize = weights.iter().sum();
    if sum == 0 {
        let share = if weights.is_empty() { 0.0 } else { total / weights.len() as f64 };
        return vec![share; weights.len()];
    }
    weights.iter().map(|&w| total * w as f64 / sum as f64).collect()
}

/// Proportional shares of `total`, each raised to at least `min_secs`.
pub fn allocate(total: f64, sentences: &[Sentence], min_secs: f64) -> Vec<f64> {
    let weights: Vec<usize> = sentences.iter().map(Sentence::word_count).collect();
    distribute(total, &weights).into_iter().map(|d| d.max(min_secs)).collect()
}

/// Lay out a measured batch on the timeline starting at `start`.
///
/// Returns the segments and the end time of the last one.
pub fn layout_batch(batch: &SentenceBatch, measured: f64, start: f64, min_secs: f64) -> (Vec<TextSegment>, f64) {
    let durations = allocate(measured, &batch.sentences, min_secs);
    let mut cursor = start;

    let segments = batch
        .sentences
        .iter()
        .zip(durations)
        .enumerate()
        .map(|(i, (sentence, duration))| {
            let segment = TextSegment {
                text: sentence.clean_text(),
                start_time: cursor,
                duration,
                segment_type: sentence.kind,
                chunk_index: batch.chunk_index,
                sentence_index: batch.first_sentence + i,
            };
            cursor += duration;
            segment
        })
        .collect();

    (segments, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::SegmentType;

    fn sentence(text: &str) -> Sentence {
        Sentence { text: text.to_string(), kind: SegmentType::Sentence }
    }

    #[test]
    fn test_batch_size_bounds() {
        assert_eq!(batch_size(0), 5);
        assert_eq!(batch_size(12), 5);
        assert_eq!(batch_size(80), 8);
        assert_eq!(batch_size(150), 15);
        assert_eq!(batch_size(1000), 15);
    }

    #[test]
    fn test_plan_batches_indexes_sentences() {
        let text = (0..12).map(|i| format!("Sentence number {}.", i)).collect::<Vec<_>>().join(" ");
        let batches = plan_batches(4, &text);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(|b| b.sentences.len()).collect::<Vec<_>>(), vec![5, 5, 2]);
        assert_eq!(batches.iter().map(|b| b.first_sentence).collect::<Vec<_>>(), vec![0, 5, 10]);
        assert!(batches.iter().all(|b| b.chunk_index == 4));
        assert!(batches[2].text().starts_with("Sentence number 10."));
    }

    #[test]
    fn test_markup_only_sentences_are_not_timed() {
        let sentences = timed_sentences("Real words here.\n\n<break time=\"1s\"/>\n\nMore words.");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_distribution_is_proportional() {
        let weights = [1, 3, 0, 4];
        let shares = distribute(8.0, &weights);
        for (share, w) in shares.iter().zip(weights) {
            assert!((share - 8.0 * w as f64 / 8.0).abs() < 1e-12);
        }
        assert!((shares.iter().sum::<f64>() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights_share_equally() {
        assert_eq!(distribute(3.0, &[0, 0, 0]), vec![1.0, 1.0, 1.0]);
        assert!(distribute(3.0, &[]).is_empty());
    }

    #[test]
    fn test_floor_keeps_total_at_least_measured() {
        let sentences = vec![sentence("Ok."), sentence("This one is a considerably longer sentence with many words in it."), sentence("Hi.")];
        let measured = 3.0;
        let durations = allocate(measured, &sentences, 0.3);

        assert!(durations.iter().all(|d| *d >= 0.3));
        assert!(durations.iter().sum::<f64>() >= measured);
        assert!((durations[1] - measured * 12.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_layout_is_contiguous() {
        let batch = SentenceBatch {
            chunk_index: 2,
            first_sentence: 5,
            sentences: vec![sentence("<emphasis>One</emphasis> two."), sentence("Three four five six.")],
        };
        let (segments, end) = layout_batch(&batch, 6.0, 10.0, 0.3);

        assert_eq!(segments[0].text, "One two.");
        assert_eq!(segments[0].start_time, 10.0);
        assert!((segments[0].duration - 2.0).abs() < 1e-12);
        assert!((segments[1].start_time - segments[0].end_time()).abs() < 1e-12);
        assert_eq!(segments[1].sentence_index, 6);
        assert_eq!(segments[1].chunk_index, 2);
        assert!((end - 16.0).abs() < 1e-12);
    }
}
