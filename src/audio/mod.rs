//! Audio probing, chunk splitting, and speaker-sample extraction.
//!
//! All external media work goes through ffmpeg/ffprobe subprocesses; both
//! binaries are expected on PATH (see [`check_tools`]).

mod probe;
mod samples;
mod splitter;

pub use probe::{check_tools, probe_duration, probe_input};
pub use samples::{
    cleanup_speaker_samples, extract_speaker_samples, to_speaker_references, SpeakerSample,
    MAX_SAMPLE_SECONDS, MIN_SAMPLE_SECONDS,
};
pub use splitter::{AudioSplitter, ChunkInfo, SplitResult, MAX_FILE_SIZE_BYTES, MIN_CHUNK_SECONDS};
