//! Key frame extraction
//!
//! Sampling is exact: the frame on screen at the requested timestamp, with the
//! track's display orientation applied. A source that can only deliver a
//! neighbouring frame is treated as a failure rather than snapped.

use crate::clip::{ExtractedFrame, MediaClip};
use crate::error::{MediaError, PipelineError};
use crate::ffmpeg::{format_micros, format_seconds, parse_showinfo_pts, probe_frame_times, FfmpegCommand, FfmpegError};
use crate::scratch::ScratchFile;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Read access to decoded video frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Decode the upright frame on screen at `at`, reporting its real
    /// presentation interval. Gives up with [`MediaError::Cancelled`] once
    /// `cancel` reads `true`.
    async fn sample(&self, source: &Path, at: Duration, cancel: watch::Receiver<bool>) -> Result<ExtractedFrame, MediaError>;
}

/// Frame timestamps are listed around the key frame within this distance.
const PROBE_WINDOW: Duration = Duration::from_secs(1);

/// `showinfo` prints six significant digits.
const PTS_TOLERANCE: Duration = Duration::from_millis(1);

/// Decodes frames with the system `ffmpeg`.
///
/// The frame list from `ffprobe` decides which frame is on screen at the key
/// frame time; `ffmpeg` then decodes from that frame's timestamp and reports
/// what it actually produced through `showinfo`.
#[derive(Debug, Default, Clone)]
pub struct FfmpegFrameSource;

impl FfmpegFrameSource {
    /// Decode the first frame at or after `pts` as PNG on stdout.
    pub fn command(source: &Path, pts: Duration) -> FfmpegCommand {
        let start = pts.saturating_sub(PTS_TOLERANCE / 2);
        let filter = format!("trim=start={},showinfo", format_micros(start));
        FfmpegCommand::new()
            .log_level("info")
            .input_args(&["-autorotate", "-copyts"])
            .input(source)
            .args(&[
                "-an",
                "-vf",
                filter.as_str(),
                "-fps_mode",
                "passthrough",
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-c:v",
                "png",
            ])
            .output("-")
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn sample(&self, source: &Path, at: Duration, mut cancel: watch::Receiver<bool>) -> Result<ExtractedFrame, MediaError> {
        let window = at.saturating_sub(PROBE_WINDOW)..at + PROBE_WINDOW;
        let times = probe_frame_times(source, window, &mut cancel).await.map_err(ffmpeg_error)?;

        let (pts, _) = presented_at(&times, at).ok_or_else(|| {
            MediaError::ProcessingError(format!("no frame is on screen at {}s", format_seconds(at)))
        })?;

        let output = Self::command(source, pts)
            .execute_cancellable(&mut cancel)
            .await
            .map_err(ffmpeg_error)?;

        if output.stdout.is_empty() {
            return Err(MediaError::ProcessingError(format!(
                "no frame decoded at {}s",
                format_micros(pts)
            )));
        }

        let decoded = parse_showinfo_pts(&String::from_utf8_lossy(&output.stderr))
            .ok_or_else(|| MediaError::ProcessingError("decoder did not report a frame timestamp".to_string()))?;

        // Map the decoded pts back onto the probed list to recover its interval.
        let (timestamp, shown_until) = presented_at(&times, decoded + PTS_TOLERANCE).ok_or_else(|| {
            MediaError::ProcessingError(format!("decoded frame at {}s is not in the stream", format_micros(decoded)))
        })?;

        let image = image::load_from_memory(&output.stdout)?;
        Ok(ExtractedFrame { image, timestamp, shown_until })
    }
}

fn ffmpeg_error(e: FfmpegError) -> MediaError {
    match e {
        FfmpegError::Cancelled => MediaError::Cancelled,
        other => MediaError::Ffmpeg(other),
    }
}

/// The last frame starting at or before `at`, and the start of the one after it.
fn presented_at(times: &[Duration], at: Duration) -> Option<(Duration, Option<Duration>)> {
    let next = times.partition_point(|t| *t <= at);
    let current = *times.get(next.checked_sub(1)?)?;
    Some((current, times.get(next).copied()))
}

pub struct FrameExtractor {
    source: Arc<dyn FrameSource>,
    jpeg_quality: u8,
}

impl FrameExtractor {
    pub fn new(source: Arc<dyn FrameSource>, jpeg_quality: u8) -> Self {
        Self {
            source,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub async fn extract_frame(&self, clip: &MediaClip, cancel: watch::Receiver<bool>) -> Result<ExtractedFrame, PipelineError> {
        let at = clip.key_frame();
        if at >= clip.duration() {
            return Err(PipelineError::FrameExtractionFailed(MediaError::InvalidInput(format!(
                "key frame {}s is outside a {}s clip",
                format_seconds(at),
                format_seconds(clip.duration())
            ))));
        }

        if *cancel.borrow() {
            return Err(PipelineError::FrameExtractionFailed(MediaError::Cancelled));
        }

        let frame = self
            .source
            .sample(clip.source(), at, cancel)
            .await
            .map_err(PipelineError::FrameExtractionFailed)?;

        if !frame.is_shown_at(at) {
            return Err(PipelineError::FrameExtractionFailed(MediaError::ProcessingError(format!(
                "requested frame at {}s, source produced the frame at {}s",
                format_micros(at),
                format_micros(frame.timestamp)
            ))));
        }

        debug!(
            "Sampled {}x{} frame at {}s for key frame {}s",
            frame.image.width(),
            frame.image.height(),
            format_micros(frame.timestamp),
            format_seconds(at)
        );
        Ok(frame)
    }

    /// Encode `frame` as JPEG into the image scratch file.
    pub async fn write_still(&self, frame: ExtractedFrame, file: &mut ScratchFile) -> Result<(), PipelineError> {
        let path = file.path().to_path_buf();
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || -> Result<(), MediaError> {
            let rgb = frame.image.to_rgb8();
            let writer = BufWriter::new(File::create(&path)?);
            let mut encoder = JpegEncoder::new_with_quality(writer, quality);
            encoder.encode_image(&rgb)?;
            Ok(())
        })
        .await
        .map_err(|e| PipelineError::FrameExtractionFailed(MediaError::ProcessingError(e.to_string())))?
        .map_err(PipelineError::FrameExtractionFailed)?;

        file.mark_written();
        info!("Key frame written to {}", file.path().display());
        Ok(())
    }
}
