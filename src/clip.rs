//! Media values passed between pipeline stages

use crate::ffmpeg::{probe_duration, FfmpegError};
use crate::scratch::ScratchFile;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Source video plus the timestamp of the still to sample from it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClip {
    source: PathBuf,
    duration: Duration,
    key_frame: Duration,
}

impl MediaClip {
    pub fn new(source: impl Into<PathBuf>, duration: Duration, key_frame: Duration) -> Self {
        Self {
            source: source.into(),
            duration,
            key_frame,
        }
    }

    /// Probe `source` for its duration. The key frame defaults to the first frame.
    pub async fn open(source: impl AsRef<Path>, key_frame: Option<Duration>) -> Result<Self, FfmpegError> {
        let duration = probe_duration(source.as_ref()).await?;
        Ok(Self::new(source.as_ref(), duration, key_frame.unwrap_or(Duration::ZERO)))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn key_frame(&self) -> Duration {
        self.key_frame
    }
}

/// A decoded frame and the interval during which it is on screen.
pub struct ExtractedFrame {
    pub image: DynamicImage,
    /// Presentation timestamp of the decoded frame.
    pub timestamp: Duration,
    /// Presentation timestamp of the frame that replaces it; `None` for the
    /// last frame of the stream.
    pub shown_until: Option<Duration>,
}

impl ExtractedFrame {
    /// Whether this frame is the one on screen at `at`.
    pub fn is_shown_at(&self, at: Duration) -> bool {
        self.timestamp <= at && self.shown_until.map_or(true, |end| at < end)
    }
}

/// Output of the transcode stage: the video scratch file and its length.
#[derive(Debug)]
pub struct TranscodedClip {
    pub file: ScratchFile,
    pub duration: Duration,
}
