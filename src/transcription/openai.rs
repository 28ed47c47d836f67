//! Remote transcription adapter for the OpenAI audio API.
//!
//! Builds the multipart upload by hand: the typed client builders cannot
//! express the diarized response format, the bracket-indexed
//! `known_speaker_references[i]` fields, or the HTTP/1.1 pinning the
//! service's front-end requires for long uploads.

use super::joblog::JobLog;
use super::models::{
    AudioInput, ProcessingContext, TranscribeOptions, TranscriptResult, TranscriptSegment,
    TranscriptWord, TranscriptionModel,
};
use super::TranscriptionAdapter;
use crate::config::TranscriptionSettings;
use crate::error::{Result, TolkError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Transcription endpoint.
pub const TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Attempts per request, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Speaker-reference data URLs past this size risk rejection.
const DATA_URL_WARN_BYTES: usize = 1_000_000;

/// Network failure messages worth retrying. Anything else, including HTTP
/// status errors, fails fast.
const RETRYABLE_PATTERNS: [&str; 7] = [
    "EOF",
    "connection reset",
    "timeout",
    "connection refused",
    "network is unreachable",
    "broken pipe",
    "connection closed",
];

/// Adapter for the cloud transcription service.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiTranscriber {
    /// Create an adapter with the given credential and transport settings.
    pub fn new(api_key: impl Into<String>, settings: &TranscriptionSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs));

        // The service's front-end terminates HTTP/2 streams prematurely on
        // long-running uploads; pin HTTP/1.1 unless explicitly allowed.
        if !settings.allow_http2 {
            builder = builder.http1_only();
        }

        Ok(Self {
            client: builder.build()?,
            api_key: api_key.into(),
        })
    }

    /// Build the multipart form. Forms are single-use, so retries call this
    /// again to get a fresh body with the file re-read.
    async fn build_form(
        &self,
        input: &AudioInput,
        opts: &TranscribeOptions,
        log: &JobLog,
    ) -> Result<(Form, usize)> {
        let file_bytes = tokio::fs::read(&input.path).await?;
        let upload_bytes = file_bytes.len();

        let file_name = input
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", opts.model.as_str())
            .text("response_format", opts.model.response_format())
            .text("temperature", format!("{:.2}", opts.temperature));

        if opts.model.is_diarized() {
            // The diarize models require an explicit chunking strategy.
            form = form.text("chunking_strategy", "auto");
        }
        if opts.model.supports_word_timestamps() {
            form = form
                .text("timestamp_granularities[]", "word")
                .text("timestamp_granularities[]", "segment");
        }

        if let Some(language) = &opts.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &opts.prompt {
            form = form.text("prompt", prompt.clone());
        }

        // The service expects bracket-indexed names (known_speaker_names[0]),
        // not PHP-style [] repetition.
        for (i, reference) in opts.speaker_references.iter().enumerate() {
            log.append(format!(
                "Speaker reference [{}]: speaker={}, data_url_length={} bytes",
                i,
                reference.speaker,
                reference.reference_audio.len()
            ));
            if reference.reference_audio.len() > DATA_URL_WARN_BYTES {
                log.append(format!(
                    "Warning: speaker reference [{}] data URL is very large ({} bytes), service may reject it",
                    i,
                    reference.reference_audio.len()
                ));
            }
            if !reference.reference_audio.starts_with("data:audio/") {
                log.append(format!(
                    "Warning: speaker reference [{}] does not start with 'data:audio/'",
                    i
                ));
            }

            form = form
                .text(
                    format!("known_speaker_names[{}]", i),
                    reference.speaker.clone(),
                )
                .text(
                    format!("known_speaker_references[{}]", i),
                    reference.reference_audio.clone(),
                );
        }

        Ok((form, upload_bytes))
    }

    /// Send the request, retrying transient network failures with quadratic
    /// backoff. Returns the raw response body.
    async fn execute_with_retry(
        &self,
        ctx: &CancellationToken,
        input: &AudioInput,
        opts: &TranscribeOptions,
        api_key: &str,
        log: &JobLog,
    ) -> Result<String> {
        let mut attempt = 1;

        loop {
            let (form, upload_bytes) = self.build_form(input, opts, log).await?;
            log.append(format!(
                "Attempt {}/{}: sending request ({} bytes)...",
                attempt, MAX_ATTEMPTS, upload_bytes
            ));

            let send = self
                .client
                .post(TRANSCRIPTION_URL)
                .bearer_auth(api_key)
                .multipart(form)
                .send();

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(TolkError::Cancelled),
                result = send => result,
            };

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    log.append(format!(
                        "Attempt {}/{}: response received (status {})",
                        attempt,
                        MAX_ATTEMPTS,
                        status.as_u16()
                    ));

                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        let snippet: String = body.chars().take(512).collect();
                        log.append(format!(
                            "Error: transcription API returned status {}: {}",
                            status.as_u16(),
                            snippet
                        ));
                        return Err(TolkError::Remote {
                            status: status.as_u16(),
                            body: snippet,
                        });
                    }

                    return response.text().await.map_err(|e| {
                        TolkError::Transport(format!("failed to read response body: {e}"))
                    });
                }
                Err(err) => {
                    let message = error_chain(&err);
                    log.append(format!(
                        "Attempt {}/{}: request error: {}",
                        attempt, MAX_ATTEMPTS, message
                    ));

                    if !is_retryable(&message) || attempt == MAX_ATTEMPTS {
                        log.append(format!(
                            "Error: request failed after {} attempt(s): {}",
                            attempt, message
                        ));
                        return Err(TolkError::Transport(format!(
                            "request failed after {} attempt(s): {}",
                            attempt, message
                        )));
                    }

                    let backoff = backoff_duration(attempt);
                    log.append(format!(
                        "Request failed (attempt {}/{}): {}. Retrying in {}s...",
                        attempt,
                        MAX_ATTEMPTS,
                        message,
                        backoff.as_secs()
                    ));

                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => return Err(TolkError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }

                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl TranscriptionAdapter for OpenAiTranscriber {
    #[instrument(skip_all, fields(job_id = %proc_ctx.job_id, file = %input.path.display()))]
    async fn transcribe(
        &self,
        ctx: &CancellationToken,
        input: &AudioInput,
        opts: &TranscribeOptions,
        proc_ctx: &ProcessingContext,
    ) -> Result<TranscriptResult> {
        let started = Instant::now();
        let log = JobLog::new(&proc_ctx.output_dir);

        log.append(format!("Starting transcription for job {}", proc_ctx.job_id));
        log.append(format!("Input file: {}", input.path.display()));

        if !input.path.exists() {
            log.append("Error: audio file does not exist");
            return Err(TolkError::InvalidInput(format!(
                "audio file does not exist: {}",
                input.path.display()
            )));
        }

        let api_key = opts
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.api_key.clone());
        if api_key.is_empty() {
            log.append("Error: transcription API key is required but not provided");
            return Err(TolkError::InvalidInput(
                "transcription API key is required but not provided".to_string(),
            ));
        }

        log.append(format!("Model: {}", opts.model));
        if let Some(language) = &opts.language {
            log.append(format!("Language: {}", language));
        }
        if opts.prompt.is_some() {
            log.append("Prompt provided");
        }
        log.append(format!("Temperature: {:.2}", opts.temperature));

        let body = self
            .execute_with_retry(ctx, input, opts, &api_key, &log)
            .await?;

        let result = parse_response(&body, opts.model, started.elapsed())?;
        log.append(format!(
            "Transcription completed. Segments: {}, words: {}",
            result.segments.len(),
            result.word_segments.len()
        ));

        Ok(result)
    }
}

/// Flatten a reqwest error and its sources into one message, so transport
/// causes like "connection reset by peer" are visible to the retry check.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Whether a transport failure message is worth retrying.
fn is_retryable(message: &str) -> bool {
    RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
}

/// Quadratic backoff: attempt^2 * 5 seconds.
fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt * attempt) * 5)
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Deserialize)]
struct DiarizedResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<DiarizedSegment>,
}

#[derive(Deserialize)]
struct DiarizedSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    speaker: String,
}

#[derive(Deserialize)]
struct VerboseResponse {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

#[derive(Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct PlainResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

/// Parse the response body according to the model's response format.
fn parse_response(
    body: &str,
    model: TranscriptionModel,
    elapsed: Duration,
) -> Result<TranscriptResult> {
    match model.response_format() {
        "diarized_json" => parse_diarized(body, model, elapsed),
        "verbose_json" => parse_verbose(body, model, elapsed),
        _ => parse_plain(body, model, elapsed),
    }
}

fn parse_diarized(
    body: &str,
    model: TranscriptionModel,
    elapsed: Duration,
) -> Result<TranscriptResult> {
    let response: DiarizedResponse = serde_json::from_str(body)
        .map_err(|e| TolkError::Protocol(format!("failed to decode diarized response: {e}")))?;

    let segments = response
        .segments
        .iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.clone(),
            speaker: (!s.speaker.is_empty()).then(|| s.speaker.clone()),
            language: None,
        })
        .collect();

    Ok(TranscriptResult {
        text: response.text,
        language: None,
        segments,
        word_segments: Vec::new(),
        confidence: None,
        model_used: model.as_str().to_string(),
        processing_time: elapsed,
        metadata: HashMap::new(),
    })
}

fn parse_verbose(
    body: &str,
    model: TranscriptionModel,
    elapsed: Duration,
) -> Result<TranscriptResult> {
    let response: VerboseResponse = serde_json::from_str(body)
        .map_err(|e| TolkError::Protocol(format!("failed to decode verbose response: {e}")))?;

    let segments = if !response.segments.is_empty() {
        response
            .segments
            .iter()
            .map(|s| TranscriptSegment::new(s.start, s.end, s.text.clone()))
            .collect()
    } else if !response.text.is_empty() {
        // Some responses omit segments; keep the whole text as one segment.
        vec![TranscriptSegment::new(
            0.0,
            response.duration,
            response.text.clone(),
        )]
    } else {
        Vec::new()
    };

    let word_segments = response
        .words
        .iter()
        .map(|w| TranscriptWord::new(w.start, w.end, w.word.clone()))
        .collect();

    Ok(TranscriptResult {
        text: response.text,
        language: response.language,
        segments,
        word_segments,
        confidence: None,
        model_used: model.as_str().to_string(),
        processing_time: elapsed,
        metadata: HashMap::new(),
    })
}

fn parse_plain(
    body: &str,
    model: TranscriptionModel,
    elapsed: Duration,
) -> Result<TranscriptResult> {
    let response: PlainResponse = serde_json::from_str(body)
        .map_err(|e| TolkError::Protocol(format!("failed to decode response: {e}")))?;

    let segments = if response.text.is_empty() {
        Vec::new()
    } else {
        vec![TranscriptSegment::new(
            0.0,
            response.duration.unwrap_or(0.0),
            response.text.clone(),
        )]
    };

    Ok(TranscriptResult {
        text: response.text,
        language: None,
        segments,
        word_segments: Vec::new(),
        confidence: None,
        model_used: model.as_str().to_string(),
        processing_time: elapsed,
        metadata: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable("unexpected EOF"));
        assert!(is_retryable("read: connection reset by peer"));
        assert!(is_retryable("operation timeout"));
        assert!(is_retryable("connect: connection refused"));
        assert!(is_retryable("network is unreachable"));
        assert!(is_retryable("write: broken pipe"));
        assert!(is_retryable("http2: connection closed"));

        assert!(!is_retryable("invalid request body"));
        assert!(!is_retryable("status 400 Bad Request"));
    }

    #[test]
    fn test_backoff_is_quadratic() {
        assert_eq!(backoff_duration(1), Duration::from_secs(5));
        assert_eq!(backoff_duration(2), Duration::from_secs(20));
        assert_eq!(backoff_duration(3), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_diarized_response() {
        let body = r#"{
            "text": "hello world",
            "segments": [
                {"id": "seg_0", "type": "transcript.text.segment", "start": 0.0, "end": 1.5, "text": "hello", "speaker": "A"},
                {"id": "seg_1", "type": "transcript.text.segment", "start": 1.5, "end": 3.0, "text": "world", "speaker": "B"}
            ],
            "usage": {"total_tokens": 42, "input_tokens": 30}
        }"#;

        let result =
            parse_response(body, TranscriptionModel::Gpt4oDiarize, Duration::ZERO).unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].speaker.as_deref(), Some("A"));
        assert_eq!(result.segments[1].speaker.as_deref(), Some("B"));
        assert!(result.word_segments.is_empty());
        assert_eq!(result.model_used, "gpt-4o-transcribe-diarize");
    }

    #[test]
    fn test_parse_verbose_response_with_words() {
        let body = r#"{
            "task": "transcribe",
            "language": "en",
            "duration": 3.0,
            "text": "hello world",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 1.5, "text": "hello", "tokens": [1], "temperature": 0.0, "avg_logprob": -0.2, "compression_ratio": 1.0, "no_speech_prob": 0.01},
                {"id": 1, "seek": 0, "start": 1.5, "end": 3.0, "text": "world", "tokens": [2], "temperature": 0.0, "avg_logprob": -0.3, "compression_ratio": 1.0, "no_speech_prob": 0.01}
            ],
            "words": [
                {"word": "hello", "start": 0.0, "end": 1.5},
                {"word": "world", "start": 1.5, "end": 3.0}
            ]
        }"#;

        let result = parse_response(body, TranscriptionModel::Whisper, Duration::ZERO).unwrap();

        assert_eq!(result.language.as_deref(), Some("en"));
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.word_segments.len(), 2);
        assert_eq!(result.word_segments[0].word, "hello");
    }

    #[test]
    fn test_parse_verbose_synthesizes_segment_when_missing() {
        let body = r#"{"language": "en", "duration": 12.5, "text": "hello world"}"#;

        let result = parse_response(body, TranscriptionModel::Whisper, Duration::ZERO).unwrap();

        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].start, 0.0);
        assert_eq!(result.segments[0].end, 12.5);
        assert_eq!(result.segments[0].text, "hello world");
    }

    #[test]
    fn test_parse_plain_response() {
        let body = r#"{"text": "hello world"}"#;

        let result =
            parse_response(body, TranscriptionModel::Gpt4oTranscribe, Duration::ZERO).unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].end, 0.0);
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        let err =
            parse_response("not json", TranscriptionModel::Whisper, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TolkError::Protocol(_)));
    }
}
