//! Transcription module for Tolk.
//!
//! Contains the data model, the remote transcription adapter, the per-job
//! diagnostic log, and the chunk-result merger.
//!
//! # Speaker labels
//!
//! Each adapter invocation produces speaker labels local to that call.
//! Global identity across chunks is either *asserted* (speaker references
//! passed to the service, labels merged as-is) or *abandoned* (labels
//! prefixed with their chunk index by the merger). There is no in-band
//! similarity matching across chunks.

mod joblog;
mod merger;
mod models;
mod openai;

pub use joblog::JobLog;
pub use merger::merge_results;
pub use models::{
    AudioInput, ProcessingContext, SpeakerReference, TranscribeOptions, TranscriptResult,
    TranscriptSegment, TranscriptWord, TranscriptionModel,
};
pub use openai::{OpenAiTranscriber, TRANSCRIPTION_URL};

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Trait for remote transcription services.
#[async_trait]
pub trait TranscriptionAdapter: Send + Sync {
    /// Transcribe one audio file into a timestamped result.
    ///
    /// `opts.speaker_references` carries cross-chunk speaker-identity hints;
    /// `proc_ctx` names the job and its diagnostics directory. Cancelling
    /// `ctx` aborts in-flight uploads and retry backoffs.
    async fn transcribe(
        &self,
        ctx: &CancellationToken,
        input: &AudioInput,
        opts: &TranscribeOptions,
        proc_ctx: &ProcessingContext,
    ) -> Result<TranscriptResult>;
}
