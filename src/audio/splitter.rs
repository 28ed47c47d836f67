//! Audio chunk splitting.
//!
//! The remote transcription service caps requests at 25 MB / 25 minutes of
//! audio, and the diarize family truncates well below that. The splitter
//! cuts oversized inputs into re-encoded chunks with clean frame boundaries
//! and assigns each chunk its absolute time offset in the original.

use super::probe::{probe_duration, run_tool};
use crate::error::{Result, TolkError};
use crate::transcription::AudioInput;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Maximum file size before splitting (25 MB, the service ceiling).
pub const MAX_FILE_SIZE_BYTES: u64 = 25 * 1024 * 1024;

/// Chunks shorter than this are dropped: the service rejects trailing
/// slivers as "audio corrupted/unsupported".
pub const MIN_CHUNK_SECONDS: f64 = 1.0;

/// Target chunk duration in minutes before bitrate adjustment.
const CHUNK_TARGET_MINUTES: u32 = 5;

/// Per-chunk byte target, deliberately under the 25 MB service ceiling.
const TARGET_CHUNK_BYTES: f64 = 20.0 * 1024.0 * 1024.0;

/// One output of the splitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    /// Path to the chunk file.
    pub path: PathBuf,
    /// Start time in seconds relative to the original audio.
    pub start_time: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Index in the chunk sequence.
    pub original_index: usize,
}

/// The result of splitting an audio file.
#[derive(Debug, Clone)]
pub struct SplitResult {
    /// Chunks in timeline order. When `needs_split` is false this is exactly
    /// one chunk whose path equals the original and whose offset is 0.
    pub chunks: Vec<ChunkInfo>,
    /// Path of the original input.
    pub original_path: PathBuf,
    /// Whether the input was actually cut.
    pub needs_split: bool,
}

/// Splits large audio files into chunks under the service limits.
pub struct AudioSplitter {
    temp_dir: PathBuf,
}

impl AudioSplitter {
    /// Create a splitter writing chunk files under `temp_dir`.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    /// Whether the input exceeds the size or duration limit for the model.
    pub fn needs_splitting(&self, input: &AudioInput, max_minutes: u32) -> bool {
        if input.size_bytes > MAX_FILE_SIZE_BYTES {
            info!(
                size_mb = input.size_bytes as f64 / (1024.0 * 1024.0),
                limit_mb = MAX_FILE_SIZE_BYTES as f64 / (1024.0 * 1024.0),
                "Audio file exceeds size limit"
            );
            return true;
        }

        let duration_minutes = input.duration_seconds / 60.0;
        if duration_minutes > max_minutes as f64 {
            info!(
                duration_min = duration_minutes,
                limit_min = max_minutes,
                "Audio file exceeds duration limit"
            );
            return true;
        }

        false
    }

    /// Split an audio file into chunks.
    ///
    /// Inputs under both limits come back as a single-chunk result pointing
    /// at the original file. Chunk files land under
    /// `<temp_dir>/<job_id>/chunks/chunk_NNN.mp3`.
    #[instrument(skip(self, ctx, input), fields(file = %input.path.display()))]
    pub async fn split(
        &self,
        ctx: &CancellationToken,
        input: &AudioInput,
        job_id: &str,
        max_minutes: u32,
    ) -> Result<SplitResult> {
        if !self.needs_splitting(input, max_minutes) {
            return Ok(SplitResult {
                chunks: vec![ChunkInfo {
                    path: input.path.clone(),
                    start_time: 0.0,
                    duration: input.duration_seconds,
                    original_index: 0,
                }],
                original_path: input.path.clone(),
                needs_split: false,
            });
        }

        info!(
            size_mb = input.size_bytes as f64 / (1024.0 * 1024.0),
            duration_min = input.duration_seconds / 60.0,
            "Splitting audio file"
        );

        let chunk_dir = self.temp_dir.join(job_id).join("chunks");
        tokio::fs::create_dir_all(&chunk_dir).await?;

        let chunk_duration = chunk_duration_for(input);
        let output_pattern = chunk_dir.join("chunk_%03d.mp3");

        // Re-encode instead of stream-copying: copied frames break at
        // non-frame boundaries on compressed sources and the service then
        // spends an order of magnitude longer decoding them.
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i").arg(&input.path)
            .arg("-f").arg("segment")
            .arg("-segment_time").arg(format!("{:.0}", chunk_duration))
            .arg("-ar").arg("16000")
            .arg("-ac").arg("1")
            .arg("-c:a").arg("libmp3lame")
            .arg("-b:a").arg("64k")
            .arg("-reset_timestamps").arg("1")
            .arg("-map").arg("0:a")
            .arg(&output_pattern);

        let output = run_tool(ctx, "ffmpeg", &mut cmd).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TolkError::Split(format!(
                "ffmpeg segmentation failed: {}",
                stderr.trim()
            )));
        }

        let mut chunks = collect_chunks(&chunk_dir).await?;
        if chunks.is_empty() {
            return Err(TolkError::Split("no chunks were created".to_string()));
        }

        if let Err(e) = populate_durations(ctx, &mut chunks).await {
            if matches!(e, TolkError::Cancelled) {
                return Err(e);
            }
            warn!(error = %e, "Failed to probe chunk durations, estimating");
            estimate_durations(&mut chunks, input.duration_seconds, chunk_duration);
        }

        let chunks = filter_degenerate(chunks).await;
        if chunks.is_empty() {
            return Err(TolkError::Split(
                "all chunks were shorter than the minimum duration".to_string(),
            ));
        }

        info!(
            chunks = chunks.len(),
            chunk_duration_sec = chunk_duration,
            "Audio split complete"
        );

        Ok(SplitResult {
            chunks,
            original_path: input.path.clone(),
            needs_split: true,
        })
    }

    /// Remove chunk files and their directory. Idempotent; the original
    /// input file is never touched.
    pub async fn cleanup(&self, result: &SplitResult) {
        if !result.needs_split {
            return;
        }

        for chunk in &result.chunks {
            if chunk.path != result.original_path {
                if let Err(e) = tokio::fs::remove_file(&chunk.path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(file = %chunk.path.display(), error = %e, "Failed to cleanup chunk");
                    }
                }
            }
        }

        if let Some(chunk) = result.chunks.first() {
            if let Some(chunk_dir) = chunk.path.parent() {
                // Not-empty errors are fine; another job never shares this dir.
                let _ = tokio::fs::remove_dir(chunk_dir).await;
            }
        }
    }
}

/// Target chunk duration in seconds for an input.
///
/// Starts from the default target, lowers it so projected bytes per chunk
/// stay at or under 20 MB when the bitrate is known, and clamps to
/// [60, 300] seconds.
fn chunk_duration_for(input: &AudioInput) -> f64 {
    let mut chunk_duration = f64::from(CHUNK_TARGET_MINUTES * 60);

    if let Some(bitrate) = input.bitrate() {
        let bytes_per_second = bitrate / 8.0;
        let calculated = TARGET_CHUNK_BYTES / bytes_per_second;
        if calculated < chunk_duration {
            chunk_duration = calculated;
        }
    }

    chunk_duration.clamp(60.0, 300.0)
}

/// Parse the numeric index out of a `chunk_NNN.mp3` file name.
fn parse_chunk_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("chunk_")?
        .strip_suffix(".mp3")?
        .parse()
        .ok()
}

/// Enumerate chunk files in the output directory, sorted by index. Files
/// that don't match the output pattern are ignored.
async fn collect_chunks(chunk_dir: &Path) -> Result<Vec<ChunkInfo>> {
    let mut chunks = Vec::new();
    let mut entries = tokio::fs::read_dir(chunk_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(parse_chunk_index) else {
            continue;
        };
        chunks.push(ChunkInfo {
            path: entry.path(),
            start_time: 0.0,
            duration: 0.0,
            original_index: index,
        });
    }

    chunks.sort_by_key(|c| c.original_index);
    Ok(chunks)
}

/// Probe actual chunk durations and accumulate start offsets.
async fn populate_durations(ctx: &CancellationToken, chunks: &mut [ChunkInfo]) -> Result<()> {
    let mut cumulative_start = 0.0;

    for chunk in chunks.iter_mut() {
        let duration = probe_duration(ctx, &chunk.path).await?;
        chunk.start_time = cumulative_start;
        chunk.duration = duration;
        cumulative_start += duration;
    }

    Ok(())
}

/// Estimate durations when probing fails: every chunk gets the requested
/// segment length except the last, which gets the remainder.
fn estimate_durations(chunks: &mut [ChunkInfo], total_duration: f64, chunk_duration: f64) {
    let mut cumulative_start = 0.0;

    for chunk in chunks.iter_mut() {
        chunk.start_time = cumulative_start;

        let remaining = total_duration - cumulative_start;
        chunk.duration = if remaining < chunk_duration {
            remaining
        } else {
            chunk_duration
        };

        cumulative_start += chunk.duration;
    }
}

/// Drop sub-second chunks and delete their files, then re-densify indexes.
/// Only the trailing sliver is ever degenerate in practice (e.g. 300.024 s
/// of audio cut at 300 s).
async fn filter_degenerate(chunks: Vec<ChunkInfo>) -> Vec<ChunkInfo> {
    let mut kept = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.duration < MIN_CHUNK_SECONDS {
            warn!(
                file = %chunk.path.display(),
                duration = chunk.duration,
                "Dropping sub-second chunk"
            );
            let _ = tokio::fs::remove_file(&chunk.path).await;
        } else {
            kept.push(chunk);
        }
    }

    for (index, chunk) in kept.iter_mut().enumerate() {
        chunk.original_index = index;
    }
    kept
}
