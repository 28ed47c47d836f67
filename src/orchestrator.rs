//! Pipeline orchestrator for Tolk.
//!
//! Coordinates the whole job: split, two-pass chunk transcription with
//! speaker references, merge, optional AI cleanup, and temp-file cleanup on
//! every exit path.

use crate::audio::{
    cleanup_speaker_samples, extract_speaker_samples, to_speaker_references, AudioSplitter,
    ChunkInfo, SpeakerSample, SplitResult,
};
use crate::config::Settings;
use crate::error::{Result, TolkError};
use crate::postprocess::AiPostprocessor;
use crate::transcription::{
    merge_results, AudioInput, OpenAiTranscriber, ProcessingContext, TranscribeOptions,
    TranscriptResult, TranscriptionAdapter,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// The main orchestrator for the transcription pipeline.
pub struct Pipeline {
    splitter: AudioSplitter,
    adapter: Arc<dyn TranscriptionAdapter>,
    postprocessor: AiPostprocessor,
    concurrency: usize,
}

impl Pipeline {
    /// Create a pipeline from settings, wiring the default remote adapter
    /// and the AI postprocessor.
    ///
    /// Fails fast when ffmpeg/ffprobe are missing: splitting a two-hour
    /// file only to discover the probe is absent wastes an upload.
    pub fn new(settings: &Settings) -> Result<Self> {
        crate::audio::check_tools()?;

        let api_key = settings.transcription.resolved_api_key().unwrap_or_default();
        let adapter = Arc::new(OpenAiTranscriber::new(api_key, &settings.transcription)?);
        let postprocessor =
            AiPostprocessor::from_settings(&settings.postprocess, settings.prompts.clone());

        Ok(Self::with_components(
            AudioSplitter::new(settings.temp_dir()),
            adapter,
            postprocessor,
            settings.transcription.concurrency(),
        ))
    }

    /// Create a pipeline with custom components.
    pub fn with_components(
        splitter: AudioSplitter,
        adapter: Arc<dyn TranscriptionAdapter>,
        postprocessor: AiPostprocessor,
        concurrency: usize,
    ) -> Self {
        Self {
            splitter,
            adapter,
            postprocessor,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the full pipeline for one input.
    ///
    /// Chunk files and speaker samples are removed whether or not the job
    /// succeeds. Chunk-level failures abort the whole job: a silent gap in
    /// the timeline would corrupt everything downstream of it.
    #[instrument(skip_all, fields(job_id = %proc_ctx.job_id, file = %input.path.display()))]
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        input: &AudioInput,
        opts: &TranscribeOptions,
        proc_ctx: &ProcessingContext,
    ) -> Result<TranscriptResult> {
        validate_input(input)?;

        let split = self
            .splitter
            .split(ctx, input, &proc_ctx.job_id, opts.model.max_input_minutes())
            .await?;

        let outcome = self.transcribe_split(ctx, &split, opts, proc_ctx).await;
        self.splitter.cleanup(&split).await;

        let merged = outcome?;
        self.postprocessor.process(ctx, merged).await
    }

    /// Transcribe every chunk of a split and merge the results.
    ///
    /// Chunk 0 always goes first and without references: for diarize models
    /// its result seeds the speaker samples that bias chunks 1..n toward
    /// consistent labels. The later chunks only depend on that data, so they
    /// fan out through the bounded worker pool.
    async fn transcribe_split(
        &self,
        ctx: &CancellationToken,
        split: &SplitResult,
        opts: &TranscribeOptions,
        proc_ctx: &ProcessingContext,
    ) -> Result<TranscriptResult> {
        let Some(first_chunk) = split.chunks.first() else {
            return Err(TolkError::Split("split produced no chunks".to_string()));
        };

        info!(chunks = split.chunks.len(), "Transcribing audio");

        let mut first_opts = opts.clone();
        first_opts.speaker_references.clear();
        let first = self
            .adapter
            .transcribe(ctx, &input_for_chunk(first_chunk), &first_opts, proc_ctx)
            .await
            .map_err(|e| TolkError::for_chunk(0, e))?;

        if split.chunks.len() == 1 {
            return Ok(first);
        }

        let samples = if opts.model.is_diarized() {
            match extract_speaker_samples(ctx, &first, &first_chunk.path, &proc_ctx.output_dir)
                .await
            {
                Ok(samples) => samples,
                Err(TolkError::Cancelled) => return Err(TolkError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "Speaker sample extraction failed, continuing without references");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let outcome = self
            .transcribe_remaining(ctx, split, opts, proc_ctx, &samples, first)
            .await;
        cleanup_speaker_samples(&samples).await;
        outcome
    }

    /// Transcribe chunks 1..n concurrently and merge in chunk order.
    async fn transcribe_remaining(
        &self,
        ctx: &CancellationToken,
        split: &SplitResult,
        opts: &TranscribeOptions,
        proc_ctx: &ProcessingContext,
        samples: &[SpeakerSample],
        first: TranscriptResult,
    ) -> Result<TranscriptResult> {
        let references = to_speaker_references(samples);
        let refs_used = !references.is_empty();
        if refs_used {
            info!(
                references = references.len(),
                "Passing speaker references to remaining chunks"
            );
        }

        let mut rest_opts = opts.clone();
        rest_opts.speaker_references = references;

        let mut collected: Vec<(usize, TranscriptResult)> = Vec::with_capacity(split.chunks.len());
        collected.push((0, first));

        // The merger needs results in chunk order, not completion order.
        let mut results = stream::iter(split.chunks.iter().enumerate().skip(1))
            .map(|(index, chunk)| {
                let adapter = Arc::clone(&self.adapter);
                let chunk_input = input_for_chunk(chunk);
                let chunk_opts = rest_opts.clone();
                async move {
                    let result = adapter
                        .transcribe(ctx, &chunk_input, &chunk_opts, proc_ctx)
                        .await;
                    (index, result)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, result)) = results.next().await {
            match result {
                Ok(result) => collected.push((index, result)),
                Err(e) => return Err(TolkError::for_chunk(index, e)),
            }
        }
        drop(results);

        collected.sort_by_key(|(index, _)| *index);
        let ordered: Vec<TranscriptResult> = collected.into_iter().map(|(_, r)| r).collect();

        merge_results(&ordered, &split.chunks, refs_used)
            .ok_or_else(|| TolkError::Split("no transcription results to merge".to_string()))
    }
}

/// Validate the job input before any expensive work.
fn validate_input(input: &AudioInput) -> Result<()> {
    if !input.path.exists() {
        return Err(TolkError::InvalidInput(format!(
            "audio file does not exist: {}",
            input.path.display()
        )));
    }
    if input.duration_seconds <= 0.0 {
        return Err(TolkError::InvalidInput(
            "audio duration must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Build the adapter input for one chunk.
fn input_for_chunk(chunk: &ChunkInfo) -> AudioInput {
    let size_bytes = std::fs::metadata(&chunk.path).map(|m| m.len()).unwrap_or(0);
    AudioInput::new(chunk.path.clone(), size_bytes, chunk.duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::{SpeakerReference, TranscriptSegment, TranscriptionModel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Adapter stub returning canned results per chunk path and recording
    /// how many speaker references each call carried.
    struct StubAdapter {
        by_path: HashMap<PathBuf, TranscriptResult>,
        calls: Mutex<Vec<(PathBuf, usize)>>,
    }

    impl StubAdapter {
        fn new(by_path: HashMap<PathBuf, TranscriptResult>) -> Self {
            Self {
                by_path,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TranscriptionAdapter for StubAdapter {
        async fn transcribe(
            &self,
            _ctx: &CancellationToken,
            input: &AudioInput,
            opts: &TranscribeOptions,
            _proc_ctx: &ProcessingContext,
        ) -> Result<TranscriptResult> {
            self.calls
                .lock()
                .unwrap()
                .push((input.path.clone(), opts.speaker_references.len()));
            self.by_path.get(&input.path).cloned().ok_or_else(|| {
                TolkError::Transport(format!("no stub result for {}", input.path.display()))
            })
        }
    }

    fn result_with(text: &str, segments: Vec<TranscriptSegment>) -> TranscriptResult {
        TranscriptResult {
            text: text.to_string(),
            segments,
            ..TranscriptResult::default()
        }
    }

    fn chunk(path: &Path, index: usize, start: f64, duration: f64) -> ChunkInfo {
        ChunkInfo {
            path: path.to_path_buf(),
            start_time: start,
            duration,
            original_index: index,
        }
    }

    fn pipeline_with(adapter: StubAdapter, temp_dir: &Path) -> (Pipeline, Arc<StubAdapter>) {
        let adapter = Arc::new(adapter);
        let pipeline = Pipeline::with_components(
            AudioSplitter::new(temp_dir),
            adapter.clone(),
            AiPostprocessor::disabled(),
            2,
        );
        (pipeline, adapter)
    }

    #[tokio::test]
    async fn test_run_under_threshold_skips_split() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("input.mp3");
        std::fs::write(&audio, b"fake audio").unwrap();

        let mut by_path = HashMap::new();
        by_path.insert(
            audio.clone(),
            result_with(
                "hello world",
                vec![
                    TranscriptSegment::new(0.0, 1.5, "hello"),
                    TranscriptSegment::new(1.5, 3.0, "world"),
                ],
            ),
        );

        let (pipeline, adapter) = pipeline_with(StubAdapter::new(by_path), dir.path());
        let input = AudioInput::new(&audio, 10 * 1024 * 1024, 180.0);
        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-1", dir.path().join("out"));

        let result = pipeline
            .run(&ctx, &input, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 2);
        assert!(!result.metadata.contains_key("chunks_processed"));

        // Single adapter call, with no speaker references.
        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, 0);

        // The original input survives cleanup.
        assert!(audio.exists());
    }

    #[tokio::test]
    async fn test_run_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline_with(StubAdapter::new(HashMap::new()), dir.path());

        let input = AudioInput::new("/nonexistent/input.mp3", 1024, 60.0);
        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-1", dir.path().join("out"));

        let err = pipeline
            .run(&ctx, &input, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TolkError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_run_rejects_zero_duration() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("input.mp3");
        std::fs::write(&audio, b"x").unwrap();

        let (pipeline, _) = pipeline_with(StubAdapter::new(HashMap::new()), dir.path());
        let input = AudioInput::new(&audio, 1024, 0.0);
        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-1", dir.path().join("out"));

        let err = pipeline
            .run(&ctx, &input, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TolkError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_chunks_merge_into_continuous_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| dir.path().join(format!("chunk_{:03}.mp3", i)))
            .collect();

        let mut by_path = HashMap::new();
        by_path.insert(
            paths[0].clone(),
            result_with("A", vec![TranscriptSegment::new(0.0, 300.0, "A")]),
        );
        by_path.insert(
            paths[1].clone(),
            result_with("B", vec![TranscriptSegment::new(0.0, 300.0, "B")]),
        );
        by_path.insert(
            paths[2].clone(),
            result_with("C", vec![TranscriptSegment::new(0.0, 120.0, "C")]),
        );

        let (pipeline, _) = pipeline_with(StubAdapter::new(by_path), dir.path());
        let split = SplitResult {
            chunks: vec![
                chunk(&paths[0], 0, 0.0, 300.0),
                chunk(&paths[1], 1, 300.0, 300.0),
                chunk(&paths[2], 2, 600.0, 120.0),
            ],
            original_path: dir.path().join("original.mp3"),
            needs_split: true,
        };

        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-2", dir.path().join("out"));
        let result = pipeline
            .transcribe_split(&ctx, &split, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap();

        assert_eq!(result.text, "A B C");
        assert_eq!(result.segments.len(), 3);
        assert_eq!((result.segments[0].start, result.segments[0].end), (0.0, 300.0));
        assert_eq!((result.segments[1].start, result.segments[1].end), (300.0, 600.0));
        assert_eq!((result.segments[2].start, result.segments[2].end), (600.0, 720.0));
        assert_eq!(result.metadata.get("chunks_processed").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_diarized_without_viable_samples_prefixes_labels() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..2)
            .map(|i| dir.path().join(format!("chunk_{:03}.mp3", i)))
            .collect();

        // Chunk 0: each speaker only has an isolated half-second segment, so
        // no reference clip reaches the 2-second minimum.
        let mut by_path = HashMap::new();
        by_path.insert(
            paths[0].clone(),
            result_with(
                "hi yo",
                vec![
                    TranscriptSegment::new(0.0, 0.5, "hi").with_speaker("A"),
                    TranscriptSegment::new(5.0, 5.5, "yo").with_speaker("B"),
                ],
            ),
        );
        by_path.insert(
            paths[1].clone(),
            result_with(
                "more",
                vec![TranscriptSegment::new(0.0, 1.0, "more").with_speaker("A")],
            ),
        );

        let (pipeline, adapter) = pipeline_with(StubAdapter::new(by_path), dir.path());
        let split = SplitResult {
            chunks: vec![chunk(&paths[0], 0, 0.0, 300.0), chunk(&paths[1], 1, 300.0, 60.0)],
            original_path: dir.path().join("original.mp3"),
            needs_split: true,
        };

        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-3", dir.path().join("out"));
        let opts = TranscribeOptions::with_model(TranscriptionModel::Gpt4oDiarize);
        let result = pipeline
            .transcribe_split(&ctx, &split, &opts, &proc_ctx)
            .await
            .unwrap();

        // Without references, the merger abandons global identity.
        let labels: Vec<&str> = result
            .segments
            .iter()
            .map(|s| s.speaker.as_deref().unwrap())
            .collect();
        assert_eq!(labels, vec!["0-A", "0-B", "1-A"]);
        assert!(!result.metadata.contains_key("speaker_references_used"));

        // No call carried references.
        let calls = adapter.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, refs)| *refs == 0));
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_with_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..2)
            .map(|i| dir.path().join(format!("chunk_{:03}.mp3", i)))
            .collect();

        // Only chunk 0 has a stub result; chunk 1 fails.
        let mut by_path = HashMap::new();
        by_path.insert(
            paths[0].clone(),
            result_with("ok", vec![TranscriptSegment::new(0.0, 300.0, "ok")]),
        );

        let (pipeline, _) = pipeline_with(StubAdapter::new(by_path), dir.path());
        let split = SplitResult {
            chunks: vec![chunk(&paths[0], 0, 0.0, 300.0), chunk(&paths[1], 1, 300.0, 300.0)],
            original_path: dir.path().join("original.mp3"),
            needs_split: true,
        };

        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-4", dir.path().join("out"));
        let err = pipeline
            .transcribe_split(&ctx, &split, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to transcribe chunk 1:"));
    }

    #[tokio::test]
    async fn test_first_chunk_never_carries_references() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("input.mp3");
        std::fs::write(&audio, b"x").unwrap();

        let mut by_path = HashMap::new();
        by_path.insert(
            audio.clone(),
            result_with("hi", vec![TranscriptSegment::new(0.0, 1.0, "hi")]),
        );

        let (pipeline, adapter) = pipeline_with(StubAdapter::new(by_path), dir.path());
        let input = AudioInput::new(&audio, 1024, 60.0);
        let ctx = CancellationToken::new();
        let proc_ctx = ProcessingContext::new("job-5", dir.path().join("out"));

        // Caller-supplied references must not leak into the seeding pass.
        let mut opts = TranscribeOptions::default();
        opts.speaker_references.push(SpeakerReference {
            speaker: "A".to_string(),
            reference_audio: "data:audio/mp3;base64,AAAA".to_string(),
        });

        pipeline.run(&ctx, &input, &opts, &proc_ctx).await.unwrap();

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls[0].1, 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("big.mp3");
        std::fs::write(&audio, b"x").unwrap();

        let (pipeline, _) = pipeline_with(StubAdapter::new(HashMap::new()), dir.path());
        // Oversized, so the splitter must run ffmpeg, and cancellation wins
        // the race before the subprocess produces anything.
        let input = AudioInput::new(&audio, 100 * 1024 * 1024, 3600.0);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let proc_ctx = ProcessingContext::new("job-6", dir.path().join("out"));

        let err = pipeline
            .run(&ctx, &input, &TranscribeOptions::default(), &proc_ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TolkError::Cancelled));
    }
}
