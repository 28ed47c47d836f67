//! Applying LLM-proposed segment merges.

use crate::transcription::{TranscriptSegment, TranscriptWord};
use serde::{Deserialize, Serialize};

/// Marker text for segments the cleanup model wants dropped.
pub const REMOVED_MARKER: &str = "[REMOVE]";

fn is_false(value: &bool) -> bool {
    !*value
}

/// The LLM-exchange form of a segment: a flat speaker string plus an
/// optional merge flag.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CleanedSegment {
    pub text: String,
    #[serde(default)]
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub merge_with_next: bool,
}

impl CleanedSegment {
    /// Convert a transcript segment into the exchange form.
    pub fn from_segment(segment: &TranscriptSegment) -> Self {
        Self {
            text: segment.text.clone(),
            speaker: segment.speaker.clone().unwrap_or_default(),
            start: segment.start,
            end: segment.end,
            merge_with_next: false,
        }
    }
}

/// Apply removal markers and merge chains to cleaned segments.
///
/// Consecutive segments flagged `merge_with_next` collapse into one segment
/// spanning the first segment's start to the last segment's end, attributed
/// to the first segment's speaker. `joiner` separates the concatenated
/// texts; empty is correct for CJK scripts.
pub fn apply_merges(cleaned: &[CleanedSegment], joiner: &str) -> Vec<TranscriptSegment> {
    let mut result = Vec::with_capacity(cleaned.len());
    let mut i = 0;

    while i < cleaned.len() {
        if cleaned[i].text == REMOVED_MARKER {
            i += 1;
            continue;
        }

        let mut chain_end = i;
        while chain_end < cleaned.len() - 1 && cleaned[chain_end].merge_with_next {
            chain_end += 1;
        }

        if chain_end > i {
            if let Some(segment) = merge_range(cleaned, i, chain_end, joiner) {
                result.push(segment);
            }
            i = chain_end + 1;
        } else {
            let segment = &cleaned[i];
            result.push(TranscriptSegment {
                start: segment.start,
                end: segment.end,
                text: segment.text.clone(),
                speaker: (!segment.speaker.is_empty()).then(|| segment.speaker.clone()),
                language: None,
            });
            i += 1;
        }
    }

    result
}

/// Merge the chain `start_idx..=end_idx` into one segment.
fn merge_range(
    segments: &[CleanedSegment],
    start_idx: usize,
    end_idx: usize,
    joiner: &str,
) -> Option<TranscriptSegment> {
    let texts: Vec<&str> = segments[start_idx..=end_idx]
        .iter()
        .filter(|s| s.text != REMOVED_MARKER)
        .map(|s| s.text.as_str())
        .collect();

    if texts.is_empty() {
        return None;
    }

    let first = &segments[start_idx];
    Some(TranscriptSegment {
        start: first.start,
        end: segments[end_idx].end,
        text: texts.join(joiner),
        speaker: (!first.speaker.is_empty()).then(|| first.speaker.clone()),
        language: None,
    })
}

/// Re-attribute word-level speakers after a merge: each word adopts the
/// speaker of the merged segment whose interval contains it, and keeps its
/// own speaker otherwise.
pub fn merge_word_segments(
    words: &[TranscriptWord],
    merged_segments: &[TranscriptSegment],
) -> Vec<TranscriptWord> {
    if words.is_empty() || merged_segments.is_empty() {
        return words.to_vec();
    }

    words
        .iter()
        .map(|word| {
            let mut word = word.clone();
            if let Some(segment) = merged_segments
                .iter()
                .find(|s| word.start >= s.start && word.end <= s.end)
            {
                word.speaker = segment.speaker.clone();
            }
            word
        })
        .collect()
}

/// Rebuild the full transcript text from merged segments.
pub fn rebuild_full_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.is_empty() && s.text != REMOVED_MARKER)
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaned(text: &str, speaker: &str, start: f64, end: f64, merge: bool) -> CleanedSegment {
        CleanedSegment {
            text: text.to_string(),
            speaker: speaker.to_string(),
            start,
            end,
            merge_with_next: merge,
        }
    }

    #[test]
    fn test_apply_merges_empty() {
        assert!(apply_merges(&[], "").is_empty());
    }

    #[test]
    fn test_apply_merges_no_flags() {
        let segments = vec![
            cleaned("Hello", "A", 0.0, 1.0, false),
            cleaned("World", "A", 1.0, 2.0, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "Hello");
        assert_eq!(result[1].text, "World");
    }

    #[test]
    fn test_apply_merges_simple_chain() {
        let segments = vec![
            cleaned("我", "A", 0.0, 0.5, true),
            cleaned("今日", "A", 0.5, 1.0, true),
            cleaned("去咗", "A", 1.0, 1.5, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "我今日去咗");
        assert_eq!(result[0].start, 0.0);
        assert_eq!(result[0].end, 1.5);
        assert_eq!(result[0].speaker.as_deref(), Some("A"));
    }

    #[test]
    fn test_apply_merges_multiple_chains() {
        let segments = vec![
            cleaned("Hello", "A", 0.0, 1.0, true),
            cleaned("World", "A", 1.0, 2.0, false),
            cleaned("Good", "B", 3.0, 4.0, true),
            cleaned("Morning", "B", 4.0, 5.0, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "HelloWorld");
        assert_eq!((result[0].start, result[0].end), (0.0, 2.0));
        assert_eq!(result[1].text, "GoodMorning");
        assert_eq!((result[1].start, result[1].end), (3.0, 5.0));
        assert_eq!(result[1].speaker.as_deref(), Some("B"));
    }

    #[test]
    fn test_apply_merges_joiner_for_whitespace_languages() {
        let segments = vec![
            cleaned("Hello", "A", 0.0, 1.0, true),
            cleaned("World", "A", 1.0, 2.0, false),
        ];

        let result = apply_merges(&segments, " ");
        assert_eq!(result[0].text, "Hello World");
    }

    #[test]
    fn test_apply_merges_drops_removed_segments() {
        let segments = vec![
            cleaned("Hello", "A", 0.0, 1.0, false),
            cleaned(REMOVED_MARKER, "A", 1.0, 2.0, false),
            cleaned("World", "A", 2.0, 3.0, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "Hello");
        assert_eq!(result[1].text, "World");
    }

    #[test]
    fn test_apply_merges_removed_inside_chain() {
        let segments = vec![
            cleaned("Hello", "A", 0.0, 1.0, true),
            cleaned(REMOVED_MARKER, "A", 1.0, 2.0, true),
            cleaned("World", "A", 2.0, 3.0, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "HelloWorld");
        assert_eq!((result[0].start, result[0].end), (0.0, 3.0));
    }

    #[test]
    fn test_apply_merges_long_fragment_chain() {
        let segments = vec![
            cleaned("我", "A", 0.0, 0.2, true),
            cleaned("今", "A", 0.2, 0.4, true),
            cleaned("日", "A", 0.4, 0.6, true),
            cleaned("好", "A", 0.6, 0.8, true),
            cleaned("開心。", "A", 0.8, 1.5, false),
        ];

        let result = apply_merges(&segments, "");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "我今日好開心。");
        assert_eq!((result[0].start, result[0].end), (0.0, 1.5));
    }

    #[test]
    fn test_merge_preserves_batch_envelope() {
        let segments = vec![
            cleaned("a", "A", 12.5, 13.0, true),
            cleaned("b", "A", 13.0, 14.0, true),
            cleaned("c", "A", 14.0, 17.25, false),
        ];

        let result = apply_merges(&segments, "");
        let min_start = result.iter().map(|s| s.start).fold(f64::INFINITY, f64::min);
        let max_end = result.iter().map(|s| s.end).fold(0.0, f64::max);
        assert_eq!(min_start, 12.5);
        assert_eq!(max_end, 17.25);
    }

    #[test]
    fn test_merge_word_segments_reattributes_speakers() {
        let words = vec![
            TranscriptWord::new(0.0, 0.5, "hello"),
            TranscriptWord::new(0.5, 1.0, "world"),
            TranscriptWord::new(5.0, 5.5, "stray"),
        ];
        let merged = vec![TranscriptSegment::new(0.0, 1.0, "hello world").with_speaker("A")];

        let result = merge_word_segments(&words, &merged);
        assert_eq!(result[0].speaker.as_deref(), Some("A"));
        assert_eq!(result[1].speaker.as_deref(), Some("A"));
        // Outside every merged interval: keeps its original (absent) speaker.
        assert_eq!(result[2].speaker, None);
    }

    #[test]
    fn test_rebuild_full_text_skips_removed_and_empty() {
        let segments = vec![
            TranscriptSegment::new(0.0, 1.0, "Hello,"),
            TranscriptSegment::new(1.0, 2.0, "world!"),
            TranscriptSegment::new(2.0, 3.0, REMOVED_MARKER),
            TranscriptSegment::new(3.0, 4.0, ""),
            TranscriptSegment::new(4.0, 5.0, "How are you?"),
        ];

        assert_eq!(rebuild_full_text(&segments), "Hello, world! How are you?");
        assert_eq!(rebuild_full_text(&[]), "");
    }

    #[test]
    fn test_cleaned_segment_serde_shape() {
        let segment = cleaned("hi", "A", 0.0, 1.0, false);
        let json = serde_json::to_string(&segment).unwrap();
        // merge_with_next is omitted when false.
        assert!(!json.contains("merge_with_next"));

        let parsed: CleanedSegment =
            serde_json::from_str(r#"{"text":"hi","speaker":"A","start":0.0,"end":1.0}"#).unwrap();
        assert!(!parsed.merge_with_next);
    }
}
