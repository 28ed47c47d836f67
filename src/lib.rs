//! Tolk - Long-Audio Transcription Pipeline
//!
//! A library for turning arbitrarily long audio files into a single
//! time-aligned, speaker-attributed transcript by orchestrating a bounded
//! remote speech-to-text service across many smaller chunks.
//!
//! The name "Tolk" comes from the Norwegian word for "interpreter."
//!
//! # Overview
//!
//! The remote transcription endpoint accepts at most 25 MB / 25 minutes of
//! audio per request. Tolk works around that ceiling by:
//!
//! - splitting long audio into clean re-encoded chunks with ffmpeg
//! - transcribing every chunk through a retrying multipart adapter
//! - keeping speaker identity coherent across chunks via reference clips
//!   extracted from the first chunk's diarized result
//! - stitching per-chunk results back into one continuous timeline
//! - optionally passing the transcript through an LLM cleanup stage
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `audio` - Probing, chunk splitting, and speaker-sample extraction
//! - `transcription` - The remote adapter, data model, and result merger
//! - `postprocess` - LLM-based transcript cleanup
//! - `orchestrator` - Pipeline coordination
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//! use tolk::config::Settings;
//! use tolk::orchestrator::Pipeline;
//! use tolk::transcription::{ProcessingContext, TranscribeOptions, TranscriptionModel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Pipeline::new(&settings)?;
//!
//!     let ctx = CancellationToken::new();
//!     let input = tolk::audio::probe_input(&ctx, Path::new("meeting.mp3")).await?;
//!     let opts = TranscribeOptions::with_model(TranscriptionModel::Gpt4oDiarize);
//!     let proc_ctx = ProcessingContext::new("job-1", "/tmp/tolk/job-1");
//!
//!     let result = pipeline.run(&ctx, &input, &opts, &proc_ctx).await?;
//!     println!("{}", result.text);
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod openai;
pub mod orchestrator;
pub mod postprocess;
pub mod transcription;

pub use error::{Result, TolkError};
