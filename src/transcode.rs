//! Video transcoding into the paired-video container

use crate::clip::{MediaClip, TranscodedClip};
use crate::completion::{completion, Completion};
use crate::error::{MediaError, PipelineError};
use crate::ffmpeg::{format_seconds, FfmpegCommand, FfmpegError};
use crate::scratch::ScratchFile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    #[default]
    Highest,
    Medium,
    Passthrough,
}

impl QualityPreset {
    pub fn as_str(&self) -> &str {
        match self {
            QualityPreset::Highest => "highest",
            QualityPreset::Medium => "medium",
            QualityPreset::Passthrough => "passthrough",
        }
    }

    /// Codec arguments for FFmpeg.
    pub fn ffmpeg_args(&self) -> &'static [&'static str] {
        match self {
            QualityPreset::Highest => &[
                "-c:v", "libx264", "-preset", "slow", "-crf", "17", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-b:a", "192k",
            ],
            QualityPreset::Medium => &[
                "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-b:a", "128k",
            ],
            QualityPreset::Passthrough => &["-c", "copy"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub preset: QualityPreset,
    pub start: Duration,
    pub duration: Duration,
    /// Move the index to the front of the container for incremental reads.
    pub optimize_for_streaming: bool,
}

/// Terminal status of an export.
#[derive(Debug)]
pub enum ExportStatus {
    Completed,
    Failed(Option<MediaError>),
    Cancelled,
    Unknown,
}

/// Callback-style export service.
pub trait ExportSession: Send + Sync {
    /// Start exporting and report exactly one status through `done`.
    /// Implementations should stop early once `cancel` reads `true`.
    fn export(&self, request: ExportRequest, cancel: watch::Receiver<bool>, done: Completion<ExportStatus>);
}

/// Exports with the system `ffmpeg` on the Tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct FfmpegExporter;

impl FfmpegExporter {
    pub fn command(request: &ExportRequest) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new()
            .input_args(&["-ss", &format_seconds(request.start)])
            .input(&request.source)
            .args(&["-t", &format_seconds(request.duration)])
            .args(request.preset.ffmpeg_args());

        if request.optimize_for_streaming {
            cmd = cmd.args(&["-movflags", "+faststart"]);
        }

        cmd.args(&["-f", "mov"]).output(&request.output)
    }
}

impl ExportSession for FfmpegExporter {
    fn export(&self, request: ExportRequest, mut cancel: watch::Receiver<bool>, done: Completion<ExportStatus>) {
        tokio::spawn(async move {
            let status = match Self::command(&request).execute_cancellable(&mut cancel).await {
                Ok(_) => ExportStatus::Completed,
                Err(FfmpegError::Cancelled) => ExportStatus::Cancelled,
                Err(e) => ExportStatus::Failed(Some(e.into())),
            };
            done.complete(status);
        });
    }
}

pub struct VideoTranscoder {
    session: Arc<dyn ExportSession>,
    preset: QualityPreset,
    max_duration: Duration,
}

impl VideoTranscoder {
    pub fn new(session: Arc<dyn ExportSession>, preset: QualityPreset, max_duration: Duration) -> Self {
        Self {
            session,
            preset,
            max_duration,
        }
    }

    /// Length of the exported clip for a source of `source_duration`.
    pub fn output_duration(&self, source_duration: Duration) -> Duration {
        source_duration.min(self.max_duration)
    }

    /// Export the clip's leading range into `destination`. On failure the
    /// destination is released before returning.
    pub async fn transcode(
        &self,
        clip: &MediaClip,
        mut destination: ScratchFile,
        cancel: watch::Receiver<bool>,
    ) -> Result<TranscodedClip, PipelineError> {
        let duration = self.output_duration(clip.duration());
        let request = ExportRequest {
            source: clip.source().to_path_buf(),
            output: destination.path().to_path_buf(),
            preset: self.preset,
            start: Duration::ZERO,
            duration,
            optimize_for_streaming: true,
        };

        let (done, pending) = completion();
        self.session.export(request, cancel, done);

        let failure = match pending.wait().await {
            Some(ExportStatus::Completed) => {
                destination.mark_written();
                info!(
                    "Exported {}s paired video ({}) to {}",
                    format_seconds(duration),
                    self.preset.as_str(),
                    destination.path().display()
                );
                return Ok(TranscodedClip { file: destination, duration });
            }
            Some(ExportStatus::Failed(cause)) => cause,
            Some(ExportStatus::Cancelled) => {
                warn!("Export cancelled");
                Some(MediaError::Cancelled)
            }
            Some(ExportStatus::Unknown) => Some(MediaError::ExportStatus("unknown".to_string())),
            None => Some(MediaError::ExportStatus("export dropped without reporting".to_string())),
        };

        destination.release();
        Err(PipelineError::TranscodeFailed(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::{ScratchDir, ScratchKind, ScratchState};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a placeholder file and reports the configured status.
    struct ScriptedSession {
        status: fn() -> ExportStatus,
        seen: Mutex<Vec<ExportRequest>>,
    }

    impl ExportSession for ScriptedSession {
        fn export(&self, request: ExportRequest, _cancel: watch::Receiver<bool>, done: Completion<ExportStatus>) {
            std::fs::write(&request.output, b"mov").unwrap();
            self.seen.lock().unwrap().push(request);
            done.complete((self.status)());
        }
    }

    fn transcoder(status: fn() -> ExportStatus) -> (VideoTranscoder, Arc<ScriptedSession>) {
        let session = Arc::new(ScriptedSession { status, seen: Mutex::new(Vec::new()) });
        (VideoTranscoder::new(session.clone(), QualityPreset::Highest, Duration::from_secs(3)), session)
    }

    #[tokio::test]
    async fn test_long_clip_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(tmp.path(), "t_");
        let (transcoder, session) = transcoder(|| ExportStatus::Completed);
        let clip = MediaClip::new("/clips/long.mov", Duration::from_secs(10), Duration::ZERO);
        let (_tx, rx) = watch::channel(false);

        let out = transcoder.transcode(&clip, scratch.allocate(ScratchKind::Video), rx).await.unwrap();
        assert_eq!(out.duration, Duration::from_secs(3));
        assert_eq!(out.file.state(), ScratchState::Written);

        let seen = session.seen.lock().unwrap();
        assert_eq!(seen[0].start, Duration::ZERO);
        assert_eq!(seen[0].duration, Duration::from_secs(3));
        assert!(seen[0].optimize_for_streaming);
    }

    #[tokio::test]
    async fn test_short_clip_keeps_length() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(tmp.path(), "t_");
        let (transcoder, _) = transcoder(|| ExportStatus::Completed);
        let clip = MediaClip::new("/clips/short.mov", Duration::from_millis(1500), Duration::ZERO);
        let (_tx, rx) = watch::channel(false);

        let out = transcoder.transcode(&clip, scratch.allocate(ScratchKind::Video), rx).await.unwrap();
        assert_eq!(out.duration, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_non_completed_statuses_fail_and_release() {
        let statuses: [fn() -> ExportStatus; 3] =
            [|| ExportStatus::Failed(None), || ExportStatus::Cancelled, || ExportStatus::Unknown];

        for status in statuses {
            let tmp = TempDir::new().unwrap();
            let scratch = ScratchDir::new(tmp.path(), "t_");
            let (transcoder, _) = transcoder(status);
            let clip = MediaClip::new("/clips/a.mov", Duration::from_secs(2), Duration::ZERO);
            let (_tx, rx) = watch::channel(false);

            let err = transcoder.transcode(&clip, scratch.allocate(ScratchKind::Video), rx).await.err().unwrap();
            assert!(matches!(err, PipelineError::TranscodeFailed(_)));
            assert_eq!(scratch.stats().outstanding(), 0);
            assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_ffmpeg_export_args() {
        let request = ExportRequest {
            source: PathBuf::from("/clips/in.mp4"),
            output: PathBuf::from("/tmp/out.mov"),
            preset: QualityPreset::Highest,
            start: Duration::ZERO,
            duration: Duration::from_secs(3),
            optimize_for_streaming: true,
        };
        let args = FfmpegExporter::command(&request).build_args();

        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "3.000");
        assert!(args.windows(2).any(|w| w[0] == "-movflags" && w[1] == "+faststart"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "mov"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mov");
    }
}
