//! Sentence segmentation and markup-aware word counting.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::timing::SegmentType;

/// Characters that terminate a sentence.
const TERMINATORS: &[char] = &['.', '!', '?', '…'];

/// Closing quotes and brackets allowed between a terminator and the following whitespace.
const CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '»'];

/// Abbreviations that end in a period without ending the sentence (lowercase, no period).
const ABBREVIATIONS: &[&str] = &["dr", "mr", "mrs", "ms", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "cf", "fig", "no", "vol"];

/// Marks a paragraph break in normalized text (U+2029 PARAGRAPH SEPARATOR).
pub const PARAGRAPH_BREAK: char = '\u{2029}';

/// Longest block (in words) that can still be classified as a heading.
const MAX_HEADING_WORDS: usize = 12;

/// A sentence ready for synthesis and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    /// Original text, markup included (this is what gets synthesized).
    pub text: String,
    pub kind: SegmentType,
}

impl Sentence {
    /// Text with markup removed and whitespace collapsed, for display.
    pub fn clean_text(&self) -> String {
        strip_markup(&self.text)
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }
}

fn markup_regex() -> Option<&'static Regex> {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<[^>]+>").ok()).as_ref()
}

fn paragraph_regex() -> Option<&'static Regex> {
    static PARAGRAPH: OnceLock<Option<Regex>> = OnceLock::new();
    PARAGRAPH.get_or_init(|| Regex::new(r"\n[ \t\r]*\n|\x{2029}").ok()).as_ref()
}

/// Remove SSML/XML tags and collapse whitespace.
pub fn strip_markup(text: &str) -> String {
    let without_tags = match markup_regex() {
        Some(re) => re.replace_all(text, ""),
        None => text.into(),
    };
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of spoken words once markup is removed.
pub fn word_count(text: &str) -> usize {
    strip_markup(text).split_whitespace().count()
}

/// Split text on terminal punctuation followed by whitespace.
///
/// Returned slices are trimmed and never empty. Whitespace inside a sentence
/// is preserved as-is. With `protect_abbreviations`, periods after common
/// abbreviations and single-letter initials do not end a sentence.
pub fn sentence_spans(text: &str, protect_abbreviations: bool) -> Vec<&str> {
    sentence_ranges(text, protect_abbreviations).into_iter().map(|range| &text[range]).collect()
}

/// Byte ranges of the spans returned by [`sentence_spans`].
pub fn sentence_ranges(text: &str, protect_abbreviations: bool) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }

        let mut end = idx + c.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if TERMINATORS.contains(&next) || CLOSERS.contains(&next) {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let followed_by_space = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if !followed_by_space {
            continue;
        }
        if protect_abbreviations && c == '.' && ends_with_abbreviation(&text[start..idx]) {
            continue;
        }

        let end = absorb_stray_closers(text, end);
        while chars.peek().is_some_and(|&(next_idx, _)| next_idx < end) {
            chars.next();
        }

        push_span(&mut spans, text, start..end);
        start = end;
    }

    push_span(&mut spans, text, start..text.len());
    spans
}

/// Extend a sentence over following words made only of closing quotes or brackets.
fn absorb_stray_closers(text: &str, mut end: usize) -> usize {
    loop {
        let rest = &text[end..];
        let trimmed = rest.trim_start();
        let word = &trimmed[..trimmed.find(char::is_whitespace).unwrap_or(trimmed.len())];
        if word.is_empty() || !word.chars().all(|c| CLOSERS.contains(&c)) {
            return end;
        }
        end += rest.len() - trimmed.len() + word.len();
    }
}

fn push_span(spans: &mut Vec<Range<usize>>, text: &str, range: Range<usize>) {
    let span = &text[range.clone()];
    let trimmed = span.trim_start();
    let start = range.start + (span.len() - trimmed.len());
    let end = start + trimmed.trim_end().len();
    if end > start {
        spans.push(start..end);
    }
}

/// Check whether the word right before a period is an abbreviation or an initial.
fn ends_with_abbreviation(before_period: &str) -> bool {
    let word = before_period.rsplit(char::is_whitespace).next().unwrap_or_default();
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    if word.is_empty() {
        return false;
    }

    let mut letters = word.chars();
    let is_initial = matches!((letters.next(), letters.next()), (Some(first), None) if first.is_uppercase());
    is_initial || ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Split text into sentences for timing.
///
/// Blank lines are hard boundaries. A short block without terminal
/// punctuation is treated as a heading.
pub fn split_into_sentences(text: &str) -> Vec<Sentence> {
    let blocks: Vec<&str> = match paragraph_regex() {
        Some(re) => re.split(text).collect(),
        None => vec![text],
    };

    let mut sentences = Vec::new();
    for block in blocks {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        if is_heading(block) {
            sentences.push(Sentence { text: block.to_string(), kind: SegmentType::Heading });
            continue;
        }

        sentences.extend(sentence_spans(block, true).into_iter().map(|s| Sentence { text: s.to_string(), kind: SegmentType::Sentence }));
    }
    sentences
}

fn is_heading(block: &str) -> bool {
    let clean = strip_markup(block);
    let words = clean.split_whitespace().count();
    if words == 0 || words > MAX_HEADING_WORDS {
        return false;
    }

    let last = clean.trim_end_matches(CLOSERS).chars().last();
    !matches!(last, Some(c) if TERMINATORS.contains(&c) || matches!(c, ',' | ';' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup() {
        let ssml = "<speak>Hello <break time=\"300ms\"/>   <emphasis>world</emphasis>.</speak>";
        assert_eq!(strip_markup(ssml), "Hello world.");
        assert_eq!(word_count(ssml), 2);
        assert_eq!(word_count("<break/>"), 0);
    }

    #[test]
    fn test_sentence_spans_basic() {
        let spans = sentence_spans("One two. Three!  Four?\nFive", false);
        assert_eq!(spans, vec!["One two.", "Three!", "Four?", "Five"]);
    }

    #[test]
    fn test_sentence_spans_requires_whitespace_after_terminator() {
        let spans = sentence_spans("Version 2.5 is out. See www.example.com today.", false);
        assert_eq!(spans, vec!["Version 2.5 is out.", "See www.example.com today."]);
    }

    #[test]
    fn test_sentence_spans_keeps_closing_quotes() {
        let spans = sentence_spans("He said \"stop.\" Then he left.", false);
        assert_eq!(spans, vec!["He said \"stop.\"", "Then he left."]);
    }

    #[test]
    fn test_stray_closers_stay_with_their_sentence() {
        let spans = sentence_spans("He stopped. \" ) Then he left.", false);
        assert_eq!(spans, vec!["He stopped. \" )", "Then he left."]);
    }

    #[test]
    fn test_abbreviations_are_protected() {
        let spans = sentence_spans("Dr. Smith met J. Doe, e.g. at noon. Then lunch.", true);
        assert_eq!(spans, vec!["Dr. Smith met J. Doe, e.g. at noon.", "Then lunch."]);

        let unprotected = sentence_spans("Dr. Smith arrived.", false);
        assert_eq!(unprotected, vec!["Dr.", "Smith arrived."]);
    }

    #[test]
    fn test_split_into_sentences_detects_headings() {
        let text = "Chapter One\n\nIt was a dark night. The wind howled.\n\nA closing remark, with a comma,";
        let sentences = split_into_sentences(text);

        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0].kind, SegmentType::Heading);
        assert_eq!(sentences[0].text, "Chapter One");
        assert_eq!(sentences[1].kind, SegmentType::Sentence);
        assert_eq!(sentences[2].text, "The wind howled.");
        assert_eq!(sentences[3].kind, SegmentType::Sentence);
    }

    #[test]
    fn test_paragraph_break_separates_blocks() {
        let text = format!("Part Two{}It began to rain. Everyone ran.", PARAGRAPH_BREAK);
        let sentences = split_into_sentences(&text);

        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].kind, SegmentType::Heading);
        assert_eq!(sentences[0].text, "Part Two");
        assert_eq!(sentences[1].text, "It began to rain.");
    }

    #[test]
    fn test_sentence_ranges_point_into_text() {
        let text = "  One.  Two!\tThree ";
        let ranges = sentence_ranges(text, false);
        assert_eq!(ranges, vec![2..6, 8..12, 13..18]);
        assert_eq!(&text[ranges[2].clone()], "Three");
    }

    #[test]
    fn test_split_into_sentences_empty() {
        assert!(split_into_sentences("   \n\n  ").is_empty());
    }
}
