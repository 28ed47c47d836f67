//! Data model for transcription.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Input Types
// ============================================================================

/// An immutable descriptor of a source audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInput {
    /// Path to the audio file on disk.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Total duration in seconds. Must be positive.
    pub duration_seconds: f64,
    /// Free-form metadata. "bitrate" (bits/sec) drives adaptive chunk sizing.
    pub metadata: HashMap<String, String>,
}

impl AudioInput {
    /// Create a new audio input descriptor.
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, duration_seconds: f64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            duration_seconds,
            metadata: HashMap::new(),
        }
    }

    /// Attach a bitrate hint (bits per second).
    pub fn with_bitrate(mut self, bits_per_second: u64) -> Self {
        self.metadata
            .insert("bitrate".to_string(), bits_per_second.to_string());
        self
    }

    /// The bitrate hint, if present and parseable.
    pub fn bitrate(&self) -> Option<f64> {
        self.metadata
            .get("bitrate")
            .and_then(|b| b.parse::<f64>().ok())
            .filter(|b| *b > 0.0)
    }
}

/// Job identity and diagnostics directory for one pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    /// Job identifier, used for temp directory naming and log lines.
    pub job_id: String,
    /// Directory for per-job artifacts (transcription.log, speaker samples).
    pub output_dir: PathBuf,
}

impl ProcessingContext {
    /// Create a new processing context.
    pub fn new(job_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            output_dir: output_dir.into(),
        }
    }
}

// ============================================================================
// Transcription Models
// ============================================================================

/// Remote transcription model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TranscriptionModel {
    /// Standard Whisper: verbose JSON with segment and word timestamps.
    #[default]
    Whisper,
    /// GPT-4o transcription: plain text, no timestamps.
    Gpt4oTranscribe,
    /// Smaller GPT-4o transcription variant.
    Gpt4oMiniTranscribe,
    /// GPT-4o diarizing transcription: per-segment speaker labels.
    Gpt4oDiarize,
}

impl TranscriptionModel {
    /// The model id sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionModel::Whisper => "whisper-1",
            TranscriptionModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            TranscriptionModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
            TranscriptionModel::Gpt4oDiarize => "gpt-4o-transcribe-diarize",
        }
    }

    /// The response_format form field for this model.
    pub fn response_format(&self) -> &'static str {
        match self {
            TranscriptionModel::Whisper => "verbose_json",
            TranscriptionModel::Gpt4oTranscribe | TranscriptionModel::Gpt4oMiniTranscribe => "json",
            TranscriptionModel::Gpt4oDiarize => "diarized_json",
        }
    }

    /// Whether responses carry per-segment speaker labels.
    pub fn is_diarized(&self) -> bool {
        matches!(self, TranscriptionModel::Gpt4oDiarize)
    }

    /// Whether the model supports timestamp_granularities fields.
    pub fn supports_word_timestamps(&self) -> bool {
        matches!(self, TranscriptionModel::Whisper)
    }

    /// Longest audio accepted without splitting, in minutes.
    ///
    /// The diarize model's 2,000-token response budget truncates output
    /// around 8-10 minutes of speech, so it splits far below the service's
    /// nominal 25-minute ceiling.
    pub fn max_input_minutes(&self) -> u32 {
        match self {
            TranscriptionModel::Gpt4oDiarize => 5,
            _ => 25,
        }
    }
}

impl std::str::FromStr for TranscriptionModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whisper-1" => Ok(TranscriptionModel::Whisper),
            "gpt-4o-transcribe" => Ok(TranscriptionModel::Gpt4oTranscribe),
            "gpt-4o-mini-transcribe" => Ok(TranscriptionModel::Gpt4oMiniTranscribe),
            "gpt-4o-transcribe-diarize" => Ok(TranscriptionModel::Gpt4oDiarize),
            _ => Err(format!("Unknown transcription model: {}", s)),
        }
    }
}

impl std::fmt::Display for TranscriptionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A speaker-identity hint passed to the remote service: a label plus a
/// short reference clip encoded as a data URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakerReference {
    /// Speaker label (e.g. "A").
    pub speaker: String,
    /// Clip bytes as a `data:audio/mp3;base64,...` URL.
    pub reference_audio: String,
}

/// Per-request transcription options.
#[derive(Clone, Default)]
pub struct TranscribeOptions {
    /// Overrides the adapter-level credential when set.
    pub api_key: Option<String>,
    /// Model to transcribe with.
    pub model: TranscriptionModel,
    /// ISO-639-1 language hint.
    pub language: Option<String>,
    /// Context text to bias decoding.
    pub prompt: Option<String>,
    /// Sampling temperature in [0, 1].
    pub temperature: f32,
    /// Cross-chunk speaker-identity hints.
    pub speaker_references: Vec<SpeakerReference>,
}

impl TranscribeOptions {
    /// Options for a model with everything else defaulted.
    pub fn with_model(model: TranscriptionModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }
}

// The API key must never leak into logs, so Debug redacts it.
impl std::fmt::Debug for TranscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscribeOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("language", &self.language)
            .field("prompt", &self.prompt)
            .field("temperature", &self.temperature)
            .field(
                "speaker_references",
                &format_args!("{} reference(s)", self.speaker_references.len()),
            )
            .finish()
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// A single transcript segment, in seconds relative to the containing
/// result's timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// Transcribed text content.
    pub text: String,
    /// Speaker label local to the adapter call that produced it.
    pub speaker: Option<String>,
    /// Segment-level language, when the service reports one.
    pub language: Option<String>,
}

impl TranscriptSegment {
    /// Create a new segment without speaker attribution.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: None,
            language: None,
        }
    }

    /// Attach a speaker label.
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A single word with timing, same timeline semantics as segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptWord {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// The word text.
    pub word: String,
    /// Confidence score, when the service reports one.
    pub score: Option<f64>,
    /// Speaker label.
    pub speaker: Option<String>,
}

impl TranscriptWord {
    pub fn new(start: f64, end: f64, word: impl Into<String>) -> Self {
        Self {
            start,
            end,
            word: word.into(),
            score: None,
            speaker: None,
        }
    }
}

/// The aggregate transcription result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptResult {
    /// Full transcript text.
    pub text: String,
    /// Detected or requested language.
    pub language: Option<String>,
    /// Ordered transcript segments.
    pub segments: Vec<TranscriptSegment>,
    /// Word-level timestamps, when the model provides them.
    pub word_segments: Vec<TranscriptWord>,
    /// Average confidence, when known.
    pub confidence: Option<f64>,
    /// Model id that produced this result.
    pub model_used: String,
    /// Wall-clock processing time.
    pub processing_time: Duration,
    /// Free-form annotations (chunks_processed, ai_postprocessed, ...).
    pub metadata: HashMap<String, String>,
}
