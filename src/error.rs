use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leaf causes attached to pipeline failures for diagnostics.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Processing failed: {0}")]
    ProcessingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Export ended with status: {0}")]
    ExportStatus(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Photo store rejected change: {0}")]
    StoreRejected(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] crate::ffmpeg::FfmpegError),
}

/// Terminal failure of one pipeline invocation.
///
/// Each kind is raised by exactly one stage. The display text is meant to be
/// shown to the user as-is.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No permission to access the photo library")]
    PermissionDenied,

    #[error("Key frame extraction failed: {0}")]
    FrameExtractionFailed(#[source] MediaError),

    #[error("Video export failed")]
    TranscodeFailed(#[source] Option<MediaError>),

    #[error("Saving to the photo library failed: {0}")]
    PublishFailed(#[source] MediaError),
}

/// Serializable tag for a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    FrameExtractionFailed,
    TranscodeFailed,
    PublishFailed,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::PermissionDenied => FailureKind::PermissionDenied,
            PipelineError::FrameExtractionFailed(_) => FailureKind::FrameExtractionFailed,
            PipelineError::TranscodeFailed(_) => FailureKind::TranscodeFailed,
            PipelineError::PublishFailed(_) => FailureKind::PublishFailed,
        }
    }

    /// Underlying cause, if the stage reported one.
    pub fn cause(&self) -> Option<&MediaError> {
        match self {
            PipelineError::PermissionDenied => None,
            PipelineError::FrameExtractionFailed(cause) | PipelineError::PublishFailed(cause) => Some(cause),
            PipelineError::TranscodeFailed(cause) => cause.as_ref(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
