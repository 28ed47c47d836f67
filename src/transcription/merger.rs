//! Merging per-chunk transcription results into one timeline.

use super::models::{TranscriptResult, TranscriptSegment, TranscriptWord};
use crate::audio::ChunkInfo;
use std::time::Duration;

/// Combine transcript results from multiple chunks.
///
/// Each result's timestamps are shifted by its chunk's start offset, which
/// yields a continuous timeline because chunk offsets are contiguous by
/// construction. Speaker labels pass through unchanged when references kept
/// identity consistent across chunks (`speaker_refs_used`); otherwise each
/// label is prefixed with its chunk index so cross-chunk collisions stay
/// unambiguous.
///
/// Returns None for empty input; a single result is returned unchanged.
pub fn merge_results(
    results: &[TranscriptResult],
    chunks: &[ChunkInfo],
    speaker_refs_used: bool,
) -> Option<TranscriptResult> {
    if results.is_empty() {
        return None;
    }
    if results.len() == 1 {
        return Some(results[0].clone());
    }

    let mut merged = TranscriptResult::default();
    let mut text_parts: Vec<String> = Vec::with_capacity(results.len());
    let mut total_processing_time = Duration::ZERO;
    let mut confidence_sum = 0.0;
    let mut confidence_count = 0usize;

    for (index, result) in results.iter().enumerate() {
        let time_offset = chunks.get(index).map(|c| c.start_time).unwrap_or(0.0);

        if !result.text.is_empty() {
            text_parts.push(result.text.trim().to_string());
        }

        for segment in &result.segments {
            merged.segments.push(TranscriptSegment {
                start: segment.start + time_offset,
                end: segment.end + time_offset,
                text: segment.text.clone(),
                speaker: adjust_speaker_label(
                    segment.speaker.as_deref(),
                    index,
                    results.len(),
                    speaker_refs_used,
                ),
                language: segment.language.clone(),
            });
        }

        for word in &result.word_segments {
            merged.word_segments.push(TranscriptWord {
                start: word.start + time_offset,
                end: word.end + time_offset,
                word: word.word.clone(),
                score: word.score,
                speaker: adjust_speaker_label(
                    word.speaker.as_deref(),
                    index,
                    results.len(),
                    speaker_refs_used,
                ),
            });
        }

        total_processing_time += result.processing_time;
        if let Some(confidence) = result.confidence {
            confidence_sum += confidence;
            confidence_count += 1;
        }

        if merged.language.is_none() {
            merged.language = result.language.clone();
        }
        if merged.model_used.is_empty() {
            merged.model_used = result.model_used.clone();
        }

        for (key, value) in &result.metadata {
            merged.metadata.insert(key.clone(), value.clone());
        }
    }

    merged.text = text_parts.join(" ");
    merged.processing_time = total_processing_time;
    if confidence_count > 0 {
        merged.confidence = Some(confidence_sum / confidence_count as f64);
    }

    merged
        .metadata
        .insert("chunks_processed".to_string(), results.len().to_string());
    if speaker_refs_used {
        merged
            .metadata
            .insert("speaker_references_used".to_string(), "true".to_string());
    }

    Some(merged)
}

/// Reconcile one speaker label for the merged timeline.
///
/// With speaker references, labels already mean the same voice in every
/// chunk. Without them, each chunk's namespace is local, so labels become
/// `"{chunk_index}-{label}"` (any `"Speaker "` prefix stripped first).
fn adjust_speaker_label(
    speaker: Option<&str>,
    chunk_index: usize,
    total_chunks: usize,
    speaker_refs_used: bool,
) -> Option<String> {
    let label = speaker?;
    if label.is_empty() || speaker_refs_used || total_chunks <= 1 {
        return Some(label.to_string());
    }

    let stripped = label.strip_prefix("Speaker ").unwrap_or(label);
    Some(format!("{}-{}", chunk_index, stripped))
}
