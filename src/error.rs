//! Error types for Tolk.

use thiserror::Error;

/// Library-level error type for Tolk operations.
#[derive(Error, Debug)]
pub enum TolkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Audio split failed: {0}")]
    Split(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transcription API error (status {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Post-processing failed: {0}")]
    Postprocess(String),

    #[error("failed to transcribe chunk {index}: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Box<TolkError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TolkError {
    /// Wrap a chunk-level failure with its chunk index so job-level messages
    /// read "failed to transcribe chunk 3: ...". Cancellation passes through
    /// unwrapped.
    pub fn for_chunk(index: usize, source: TolkError) -> TolkError {
        match source {
            TolkError::Cancelled => TolkError::Cancelled,
            other => TolkError::ChunkFailed {
                index,
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for Tolk operations.
pub type Result<T> = std::result::Result<T, TolkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_failure_message() {
        let err = TolkError::for_chunk(3, TolkError::Transport("connection reset".to_string()));
        assert_eq!(
            err.to_string(),
            "failed to transcribe chunk 3: Transport error: connection reset"
        );
    }

    #[test]
    fn test_cancellation_passes_through() {
        let err = TolkError::for_chunk(1, TolkError::Cancelled);
        assert!(matches!(err, TolkError::Cancelled));
    }
}
