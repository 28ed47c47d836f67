//! Speaker reference-sample extraction.
//!
//! Diarized output labels speakers locally per request: the same voice can
//! be "A" in one chunk and "B" in the next. To keep labels coherent, a
//! short reference clip is cut for each speaker found in the first chunk's
//! result and passed along with every later chunk, biasing the service
//! toward consistent labeling.

use super::probe::run_tool;
use crate::error::{Result, TolkError};
use crate::transcription::{SpeakerReference, TranscriptResult, TranscriptSegment};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum useful reference-clip duration in seconds.
pub const MIN_SAMPLE_SECONDS: f64 = 2.0;

/// Maximum reference-clip duration in seconds.
pub const MAX_SAMPLE_SECONDS: f64 = 10.0;

/// Largest gap bridged when concatenating short segments.
const MAX_GAP_SECONDS: f64 = 1.0;

/// Data URLs past this size risk rejection by the service.
const DATA_URL_WARN_BYTES: usize = 1_000_000;

/// An extracted reference clip for one speaker.
#[derive(Debug, Clone)]
pub struct SpeakerSample {
    /// Speaker label (e.g. "A").
    pub speaker: String,
    /// Clip start in the source chunk's timeline, seconds.
    pub start_time: f64,
    /// Clip end, seconds.
    pub end_time: f64,
    /// Path of the extracted clip on disk.
    pub path: PathBuf,
    /// Clip bytes as a `data:audio/mp3;base64,...` URL.
    pub data_url: String,
}

/// Extract one reference clip per distinct speaker in `result`.
///
/// Clips are cut from `audio_path` into
/// `<output_dir>/speaker_samples/speaker_<label>.mp3`. Speakers without a
/// usable span, and per-speaker extraction failures, are skipped with a
/// warning; only cancellation aborts the whole extraction.
pub async fn extract_speaker_samples(
    ctx: &CancellationToken,
    result: &TranscriptResult,
    audio_path: &Path,
    output_dir: &Path,
) -> Result<Vec<SpeakerSample>> {
    if result.segments.is_empty() {
        return Ok(Vec::new());
    }

    let speaker_segments = group_segments_by_speaker(&result.segments);
    if speaker_segments.is_empty() {
        debug!("No speaker segments found for extraction");
        return Ok(Vec::new());
    }

    let sample_dir = output_dir.join("speaker_samples");
    tokio::fs::create_dir_all(&sample_dir).await?;

    let mut samples = Vec::new();
    for (speaker, segments) in &speaker_segments {
        let Some((start, end)) = select_best_span(segments) else {
            debug!(speaker = %speaker, "No usable span for speaker sample");
            continue;
        };

        match extract_sample(ctx, speaker, start, end, audio_path, &sample_dir).await {
            Ok(sample) => samples.push(sample),
            Err(TolkError::Cancelled) => return Err(TolkError::Cancelled),
            Err(e) => warn!(speaker = %speaker, error = %e, "Failed to extract speaker sample"),
        }
    }

    info!(
        count = samples.len(),
        speakers = speaker_segments.len(),
        "Extracted speaker samples"
    );
    Ok(samples)
}

/// Convert samples into the adapter's wire form.
pub fn to_speaker_references(samples: &[SpeakerSample]) -> Vec<SpeakerReference> {
    samples
        .iter()
        .map(|s| SpeakerReference {
            speaker: s.speaker.clone(),
            reference_audio: s.data_url.clone(),
        })
        .collect()
}

/// Delete extracted clip files. Idempotent.
pub async fn cleanup_speaker_samples(samples: &[SpeakerSample]) {
    for sample in samples {
        if let Err(e) = tokio::fs::remove_file(&sample.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %sample.path.display(), error = %e, "Failed to cleanup speaker sample");
            }
        }
    }
}

/// Group segments by non-empty speaker label. BTreeMap keeps reference
/// ordering deterministic across runs.
fn group_segments_by_speaker(
    segments: &[TranscriptSegment],
) -> BTreeMap<String, Vec<&TranscriptSegment>> {
    let mut grouped: BTreeMap<String, Vec<&TranscriptSegment>> = BTreeMap::new();
    for segment in segments {
        let Some(speaker) = segment.speaker.as_deref() else {
            continue;
        };
        if speaker.is_empty() {
            continue;
        }
        grouped.entry(speaker.to_string()).or_default().push(segment);
    }
    grouped
}

/// Choose the best `(start, end)` interval for a speaker's reference clip.
///
/// Prefers a single segment between 2 and 10 seconds; falls back to the
/// longest segment trimmed to 10 seconds; then to concatenating consecutive
/// segments. Returns None when nothing reaches the 2-second minimum.
fn select_best_span(segments: &[&TranscriptSegment]) -> Option<(f64, f64)> {
    if segments.is_empty() {
        return None;
    }

    let mut by_duration: Vec<&TranscriptSegment> = segments.to_vec();
    by_duration.sort_by(|a, b| {
        b.duration()
            .partial_cmp(&a.duration())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for segment in &by_duration {
        let duration = segment.duration();
        if (MIN_SAMPLE_SECONDS..=MAX_SAMPLE_SECONDS).contains(&duration) {
            return Some((segment.start, segment.end));
        }
    }

    let longest = by_duration[0];
    if longest.duration() >= MIN_SAMPLE_SECONDS {
        let end = longest.end.min(longest.start + MAX_SAMPLE_SECONDS);
        return Some((longest.start, end));
    }

    concatenate_spans(segments)
}

/// Concatenate consecutive segments (gaps up to 1 second) until the running
/// span reaches the minimum, trimming at the maximum. Larger gaps reset the
/// span.
fn concatenate_spans(segments: &[&TranscriptSegment]) -> Option<(f64, f64)> {
    if segments.is_empty() {
        return None;
    }

    let mut by_start: Vec<&TranscriptSegment> = segments.to_vec();
    by_start.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut start = by_start[0].start;
    let mut end = by_start[0].end;

    for segment in &by_start[1..] {
        let gap = segment.start - end;
        if gap <= MAX_GAP_SECONDS {
            end = segment.end;
            if end - start >= MIN_SAMPLE_SECONDS {
                return Some((start, end.min(start + MAX_SAMPLE_SECONDS)));
            }
        } else {
            start = segment.start;
            end = segment.end;
        }
    }

    if end - start >= MIN_SAMPLE_SECONDS {
        return Some((start, end.min(start + MAX_SAMPLE_SECONDS)));
    }

    None
}

/// Cut the chosen interval out of the source audio and encode it.
async fn extract_sample(
    ctx: &CancellationToken,
    speaker: &str,
    start: f64,
    end: f64,
    audio_path: &Path,
    sample_dir: &Path,
) -> Result<SpeakerSample> {
    let output_path = sample_dir.join(format!("speaker_{}.mp3", speaker));

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-i").arg(audio_path)
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-t").arg(format!("{:.3}", end - start))
        .arg("-ar").arg("16000")
        .arg("-ac").arg("1")
        .arg("-c:a").arg("libmp3lame")
        .arg("-b:a").arg("64k")
        .arg(&output_path);

    let output = run_tool(ctx, "ffmpeg", &mut cmd).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TolkError::ToolFailed(format!(
            "ffmpeg sample extraction failed: {}",
            stderr.trim()
        )));
    }

    let data_url = encode_as_data_url(&output_path).await?;
    if data_url.len() > DATA_URL_WARN_BYTES {
        warn!(
            speaker,
            bytes = data_url.len(),
            "Speaker reference data URL is very large, service may reject it"
        );
    }

    Ok(SpeakerSample {
        speaker: speaker.to_string(),
        start_time: start,
        end_time: end,
        path: output_path,
        data_url,
    })
}

/// Encode an audio file as a base64 data URL.
async fn encode_as_data_url(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    Ok(format!("data:audio/mp3;base64,{}", STANDARD.encode(data)))
}
