//! Per-job diagnostic log.
//!
//! Every job writes attempt-by-attempt transcription detail to
//! `<output_dir>/transcription.log` so upload failures can be diagnosed
//! after the fact. Log-write failures never fail the job.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

/// Appender for a job's transcription.log.
///
/// Callers must never pass credentials into [`JobLog::append`].
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    /// Create a logger writing to `<output_dir>/transcription.log`.
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join("transcription.log"),
        }
    }

    /// Append one timestamped line: `[YYYY-MM-DD HH:MM:SS] <message>`.
    pub fn append(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        );

        let result = self
            .path
            .parent()
            .map(std::fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
            })
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            error!(path = %self.path.display(), error = %e, "Failed to write job log");
        }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writes_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::new(dir.path());

        log.append("Starting transcription for job j1");
        log.append("Attempt 1/3: sending request (1024 bytes)...");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("Starting transcription for job j1"));
        assert!(lines[1].contains("Attempt 1/3"));
    }

    #[test]
    fn test_append_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("jobs").join("j2");
        let log = JobLog::new(&nested);

        log.append("hello");
        assert!(log.path().exists());
    }
}
