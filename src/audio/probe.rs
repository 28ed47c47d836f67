//! Audio probing and external tool plumbing.
//!
//! ffmpeg and ffprobe are treated as black-box subprocesses: quiet on
//! success, loud on failure. A missing binary is an environment error that
//! callers should surface at startup via [`check_tools`].

use crate::error::{Result, TolkError};
use crate::transcription::AudioInput;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run an external tool to completion, honoring cancellation.
///
/// The child is killed if the caller cancels mid-run. Output is captured
/// so callers can surface it on failure.
pub(crate) async fn run_tool(
    ctx: &CancellationToken,
    name: &str,
    cmd: &mut Command,
) -> Result<std::process::Output> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(TolkError::Cancelled),
        result = cmd.output() => match result {
            Ok(output) => Ok(output),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TolkError::ToolNotFound(name.to_string()))
            }
            Err(e) => Err(TolkError::ToolFailed(format!("{name}: {e}"))),
        },
    }
}

/// Query the duration of an audio file in seconds using ffprobe.
pub async fn probe_duration(ctx: &CancellationToken, path: &Path) -> Result<f64> {
    let mut cmd = Command::new("ffprobe");
    cmd.arg("-v").arg("error")
        .arg("-show_entries").arg("format=duration")
        .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
        .arg(path);

    let output = run_tool(ctx, "ffprobe", &mut cmd).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TolkError::ToolFailed(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|_| {
            TolkError::ToolFailed(format!(
                "ffprobe returned unparseable duration for {}",
                path.display()
            ))
        })
}

/// Probe a source file into an [`AudioInput`]: byte size from the
/// filesystem, duration and bitrate from ffprobe.
pub async fn probe_input(ctx: &CancellationToken, path: &Path) -> Result<AudioInput> {
    if !path.exists() {
        return Err(TolkError::InvalidInput(format!(
            "audio file does not exist: {}",
            path.display()
        )));
    }

    let size_bytes = tokio::fs::metadata(path).await?.len();

    let mut cmd = Command::new("ffprobe");
    cmd.arg("-v").arg("error")
        .arg("-show_entries").arg("format=duration,bit_rate")
        .arg("-of").arg("default=noprint_wrappers=1")
        .arg(path);

    let output = run_tool(ctx, "ffprobe", &mut cmd).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TolkError::ToolFailed(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let (duration, bitrate) = parse_format_fields(&String::from_utf8_lossy(&output.stdout));
    let duration = duration.ok_or_else(|| {
        TolkError::ToolFailed(format!(
            "ffprobe reported no duration for {}",
            path.display()
        ))
    })?;
    if duration <= 0.0 {
        return Err(TolkError::InvalidInput(format!(
            "audio file has zero duration: {}",
            path.display()
        )));
    }

    debug!(path = %path.display(), duration, ?bitrate, "Probed audio input");

    let mut input = AudioInput::new(path, size_bytes, duration);
    if let Some(bitrate) = bitrate {
        input = input.with_bitrate(bitrate);
    }
    Ok(input)
}

/// Parse `key=value` lines from ffprobe's default writer.
fn parse_format_fields(output: &str) -> (Option<f64>, Option<u64>) {
    let mut duration = None;
    let mut bitrate = None;

    for line in output.lines() {
        if let Some(value) = line.strip_prefix("duration=") {
            duration = value.trim().parse::<f64>().ok();
        } else if let Some(value) = line.strip_prefix("bit_rate=") {
            bitrate = value.trim().parse::<u64>().ok();
        }
    }

    (duration, bitrate)
}

/// Verify that ffmpeg and ffprobe are on PATH and respond to `-version`.
///
/// Hosts should call this once at startup; splitting a two-hour file only
/// to discover ffprobe is missing wastes an expensive upload.
pub fn check_tools() -> Result<()> {
    for name in ["ffmpeg", "ffprobe"] {
        match std::process::Command::new(name)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(_) => {
                return Err(TolkError::ToolNotFound(format!(
                    "{} is installed but not working correctly",
                    name
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TolkError::ToolNotFound(name.to_string()))
            }
            Err(e) => return Err(TolkError::ToolNotFound(format!("{}: {}", name, e))),
        }
    }
    Ok(())
}
