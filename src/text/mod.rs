//! Text preparation for synthesis.
//!
//! Provides chunk splitting for scheduling and sentence analysis for timing.

mod chunker;
mod sentences;

pub use chunker::{ChunkingPolicy, TextChunk};
pub use sentences::{PARAGRAPH_BREAK, Sentence, sentence_ranges, sentence_spans, split_into_sentences, strip_markup, word_count};

/// Split text with the default (sentence-first) policy.
pub fn split(text: &str, max_size: usize) -> Vec<TextChunk> {
    ChunkingPolicy::default().split(text, max_size)
}
