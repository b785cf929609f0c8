//! FFmpeg command wrapper utilities
//!
//! All operations shell out to the system `ffmpeg`/`ffprobe` binaries
//! (LGPL-safe, no linking). Commands run on Tokio's process driver and can be
//! aborted through a `watch` cancel signal.

use std::ops::Range;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("{0} not found in system PATH")]
    NotInstalled(&'static str),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("FFmpeg cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input_args: Vec<String>,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self {
            input_args: vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string(), "-y".to_string()],
            args: Vec::new(),
        }
    }

    /// Replace the default `error` log level. Filters such as `showinfo`
    /// only report at `info`.
    pub fn log_level(mut self, level: &str) -> Self {
        if let Some(pos) = self.input_args.iter().position(|a| a == "-loglevel") {
            self.input_args[pos + 1] = level.to_string();
        }
        self
    }

    /// Options placed before `-i` (demuxer/decoder options).
    pub fn input_args(mut self, args: &[&str]) -> Self {
        self.input_args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Full argument vector as passed to `ffmpeg`.
    pub fn build_args(&self) -> Vec<String> {
        self.input_args.iter().chain(self.args.iter()).cloned().collect()
    }

    /// Run the command, killing the child process if `cancel` flips to `true`.
    pub async fn execute_cancellable(self, cancel: &mut watch::Receiver<bool>) -> Result<Output, FfmpegError> {
        run_tool("ffmpeg", &self.build_args(), cancel).await
    }
}

async fn run_tool(program: &'static str, args: &[String], cancel: &mut watch::Receiver<bool>) -> Result<Output, FfmpegError> {
    which::which(program).map_err(|_| FfmpegError::NotInstalled(program))?;

    if *cancel.borrow() {
        return Err(FfmpegError::Cancelled);
    }

    debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = cancelled(cancel) => {
            warn!("{} cancelled, killing process", program);
            return Err(FfmpegError::Cancelled);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FfmpegError::ExecutionFailed(stderr.trim().to_string()));
    }

    Ok(output)
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the signal reads `true`. Never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Query the container duration of a media file via `ffprobe`.
pub async fn probe_duration(path: impl AsRef<Path>) -> Result<Duration, FfmpegError> {
    let args = [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(path.as_ref().display().to_string()))
    .collect::<Vec<_>>();

    let (_tx, mut rx) = watch::channel(false);
    let output = run_tool("ffprobe", &args, &mut rx).await?;
    parse_seconds(&String::from_utf8_lossy(&output.stdout))
}

/// Presentation timestamps of the video frames within `window`, ascending.
///
/// The demuxer starts reading at the keyframe before `window.start`, so the
/// list may begin earlier than requested.
pub async fn probe_frame_times(
    path: impl AsRef<Path>,
    window: Range<Duration>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Vec<Duration>, FfmpegError> {
    let output = run_tool("ffprobe", &frame_times_args(path.as_ref(), window), cancel).await?;
    parse_frame_times(&String::from_utf8_lossy(&output.stdout))
}

fn frame_times_args(path: &Path, window: Range<Duration>) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-read_intervals".to_string(),
        format!("{}%{}", format_seconds(window.start), format_seconds(window.end)),
        "-show_entries".to_string(),
        "frame=best_effort_timestamp_time".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        path.display().to_string(),
    ]
}

fn parse_frame_times(stdout: &str) -> Result<Vec<Duration>, FfmpegError> {
    let mut times = Vec::new();
    for line in stdout.lines() {
        let field = line.split(',').next().unwrap_or("").trim();
        if field.is_empty() || field == "N/A" {
            continue;
        }
        times.push(parse_seconds(field)?);
    }
    times.sort();
    times.dedup();
    Ok(times)
}

/// `pts_time` of the first frame reported by a `showinfo` filter.
pub fn parse_showinfo_pts(stderr: &str) -> Option<Duration> {
    stderr
        .lines()
        .filter(|line| line.contains("showinfo"))
        .find_map(|line| {
            let rest = &line[line.find("pts_time:")? + "pts_time:".len()..];
            let value = rest.split_whitespace().next()?;
            parse_seconds(value).ok()
        })
}

fn parse_seconds(text: &str) -> Result<Duration, FfmpegError> {
    let text = text.trim();
    let secs: f64 = text
        .parse()
        .map_err(|_| FfmpegError::InvalidOutput(format!("seconds '{}'", text)))?;

    Duration::try_from_secs_f64(secs).map_err(|_| FfmpegError::InvalidOutput(format!("seconds '{}'", text)))
}

/// Seconds with millisecond precision, the form FFmpeg accepts for `-ss`/`-t`.
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Seconds with microsecond precision, for filter arguments that must land
/// between two frame timestamps.
pub fn format_micros(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}
