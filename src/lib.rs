//! live_photo - turn a short video clip into a paired still + video asset
//!
//! A key frame is sampled from the clip, the clip is re-encoded into a short
//! streaming-friendly container, and both are committed to a photo store as a
//! single atomic change. Decoding and export shell out to system `ffmpeg`
//! (LGPL-safe, no linking); the photo store is a trait so the pipeline can
//! target any backend.

pub mod clip;
pub mod completion;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod library;
pub mod metrics;
pub mod permission;
pub mod pipeline;
pub mod publish;
pub mod scratch;
pub mod transcode;

pub use clip::{ExtractedFrame, MediaClip, TranscodedClip};
pub use completion::{completion, Completion, Pending};
pub use config::PipelineConfig;
pub use error::{FailureKind, MediaError, PipelineError};
pub use ffmpeg::{FfmpegCommand, FfmpegError};
pub use frame::{FfmpegFrameSource, FrameExtractor, FrameSource};
pub use library::FsPhotoLibrary;
pub use permission::{Authorization, AuthorizationStatus, PermissionGate};
pub use pipeline::{CancelHandle, Pipeline, PipelineStateKind};
pub use publish::{AssetCreationRequest, AssetId, AssetPublisher, AssetResource, PhotoStore, PublishRequest, ResourceRole};
pub use scratch::{ScratchDir, ScratchFile, ScratchKind, ScratchState};
pub use transcode::{ExportRequest, ExportSession, ExportStatus, FfmpegExporter, QualityPreset, VideoTranscoder};

pub type Result<T> = std::result::Result<T, PipelineError>;
