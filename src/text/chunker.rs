//! Splits arbitrary text into bounded, speakable chunks.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::sentences::{PARAGRAPH_BREAK, sentence_ranges};

/// How oversized text is broken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingPolicy {
    /// Pack whole sentences, falling back to words for sentences that do not fit
    #[default]
    Sentence,
    /// Pack words only
    Word,
}

/// An ordered, immutable unit of input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position in the request, starting at 0.
    pub index: usize,
    pub text: String,
}

impl TextChunk {
    /// Length in characters (not bytes).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl ChunkingPolicy {
    /// Split `text` into chunks of at most `max_size` characters.
    ///
    /// Content is never discarded: joining the chunks with single spaces gives
    /// back the input up to whitespace normalization. Blank lines survive
    /// inside a chunk as [`PARAGRAPH_BREAK`]. A single word longer than
    /// `max_size` is cut into `max_size` pieces.
    pub fn split(&self, text: &str, max_size: usize) -> Vec<TextChunk> {
        index_chunks(self.split_text(text, max_size.max(1)))
    }

    /// Split a sequence of upstream chunks, re-indexing the result in order.
    pub fn split_all<S: AsRef<str>>(&self, texts: &[S], max_size: usize) -> Vec<TextChunk> {
        let max_size = max_size.max(1);
        index_chunks(texts.iter().flat_map(|text| self.split_text(text.as_ref(), max_size)).collect())
    }

    fn split_text(&self, text: &str, max_size: usize) -> Vec<String> {
        let text = normalize_whitespace(text);
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(&text) <= max_size {
            return vec![text];
        }

        let mut packer = Packer::new(max_size);
        match self {
            ChunkingPolicy::Sentence => pack_sentences(&mut packer, &text),
            ChunkingPolicy::Word => pack_words(&mut packer, ' ', &text),
        }
        packer.finish()
    }
}

fn index_chunks(texts: Vec<String>) -> Vec<TextChunk> {
    texts.into_iter().enumerate().map(|(index, text)| TextChunk { index, text }).collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == PARAGRAPH_BREAK
}

/// Trim and collapse whitespace runs to one character each.
///
/// A run holding a blank line (or an existing paragraph break) becomes
/// [`PARAGRAPH_BREAK`]; any other run becomes a single space.
fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut newlines = 0;
    let mut paragraph = false;
    let mut in_run = false;

    for c in text.trim().chars() {
        if c.is_whitespace() {
            in_run = true;
            newlines += usize::from(c == '\n');
            paragraph |= c == PARAGRAPH_BREAK;
            continue;
        }
        if in_run {
            normalized.push(if paragraph || newlines >= 2 { PARAGRAPH_BREAK } else { ' ' });
            in_run = false;
            newlines = 0;
            paragraph = false;
        }
        normalized.push(c);
    }
    normalized
}

/// Words of normalized text, each with the separator that preceded it.
fn separated_words(text: &str) -> Vec<(char, &str)> {
    let mut words = Vec::new();
    let mut separator = ' ';
    for piece in text.split_inclusive(is_separator) {
        let word = piece.trim_end_matches(is_separator);
        if !word.is_empty() {
            words.push((separator, word));
        }
        separator = piece.chars().last().filter(|c| is_separator(*c)).unwrap_or(' ');
    }
    words
}

/// Greedy buffer that joins pieces with their separators up to a size limit.
struct Packer {
    max_size: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_size: usize) -> Self {
        Self { max_size, chunks: Vec::new(), current: String::new(), current_len: 0 }
    }

    /// Append `piece`, starting a new chunk when it does not fit.
    ///
    /// `separator` is only written between pieces of the same chunk.
    fn push(&mut self, separator: char, piece: &str) {
        let len = char_len(piece);
        if self.current_len > 0 && self.current_len + 1 + len > self.max_size {
            self.flush();
        }
        if self.current_len > 0 {
            self.current.push(separator);
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if self.current_len > 0 {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

fn pack_sentences(packer: &mut Packer, text: &str) {
    for range in sentence_ranges(text, false) {
        let separator = text[..range.start].chars().next_back().filter(|c| is_separator(*c)).unwrap_or(' ');
        let sentence = &text[range];
        if char_len(sentence) <= packer.max_size {
            packer.push(separator, sentence);
        } else {
            // Oversized sentences start a chunk; their tail may share one with what follows
            packer.flush();
            pack_words(packer, separator, sentence);
        }
    }
}

/// Push the words of `text`; `leading` is the separator before the first word.
fn pack_words(packer: &mut Packer, leading: char, text: &str) {
    for (i, (separator, word)) in separated_words(text).into_iter().enumerate() {
        let separator = if i == 0 { leading } else { separator };
        if char_len(word) <= packer.max_size {
            packer.push(separator, word);
            continue;
        }

        let chars: Vec<char> = word.chars().collect();
        for (j, piece) in chars.chunks(packer.max_size).enumerate() {
            packer.push(if j == 0 { separator } else { ' ' }, &piece.iter().collect::<String>());
        }
    }
}
