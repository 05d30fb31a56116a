//! Native-timestamp timing: clean up backend segments and place them on the request timeline.

use std::cmp::Ordering;

use crate::text::strip_markup;

use super::model::TextSegment;

/// Make backend segments for one chunk usable.
///
/// Sorts by start, drops segments with no duration or no text, pushes starts
/// forward so segments never overlap, and renumbers them within the chunk.
pub fn normalize_native(mut segments: Vec<TextSegment>, chunk_index: usize) -> Vec<TextSegment> {
    segments.retain(|s| s.start_time.is_finite() && s.duration.is_finite() && s.duration > 0.0);
    segments.sort_by(|a, b| a.start_time.partial_cmp(&b.start_time).unwrap_or(Ordering::Equal));

    let mut previous_end = 0.0_f64;
    let mut normalized = Vec::with_capacity(segments.len());
    for mut segment in segments {
        segment.text = strip_markup(&segment.text);
        if segment.text.is_empty() {
            continue;
        }

        segment.start_time = segment.start_time.max(previous_end);
        segment.chunk_index = chunk_index;
        segment.sentence_index = normalized.len();
        previous_end = segment.end_time();
        normalized.push(segment);
    }
    normalized
}

/// Shift chunk-relative segments by `offset`.
///
/// Returns the shifted segments and the new cumulative time, which is the
/// latest shifted end (or `offset` when there are no segments).
pub fn place(segments: Vec<TextSegment>, offset: f64) -> (Vec<TextSegment>, f64) {
    let shifted: Vec<TextSegment> = segments.into_iter().map(|s| TextSegment { start_time: s.start_time + offset, ..s }).collect();
    let end = shifted.iter().map(TextSegment::end_time).fold(offset, f64::max);
    (shifted, end)
}
