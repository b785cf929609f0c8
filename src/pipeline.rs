//! Paired-asset export pipeline
//!
//! One invocation walks a linear state machine:
//!
//! ```text
//! Idle → Authorizing → ExtractingFrame → Transcoding → Publishing → CleaningUp → Succeeded | Failed
//! ```
//!
//! A failing stage jumps straight to `CleaningUp` and ends in `Failed`.
//!
//! Scratch files live inside the state that needs them, so a stage can only
//! run once its inputs exist (there is no `Publishing` without a still and a
//! transcoded clip). Every path to a terminal state passes through
//! `CleaningUp`, which releases whatever the invocation still owns. If the
//! invocation future is dropped mid-flight the files are released by
//! [`ScratchFile`]'s `Drop`.

use crate::clip::{MediaClip, TranscodedClip};
use crate::config::PipelineConfig;
use crate::error::{MediaError, PipelineError, Result};
use crate::frame::{FfmpegFrameSource, FrameExtractor, FrameSource};
use crate::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::permission::{Authorization, PermissionGate};
use crate::publish::{AssetId, AssetPublisher, PhotoStore, PublishRequest};
use crate::scratch::{ScratchDir, ScratchFile, ScratchKind, ScratchStats};
use crate::transcode::{ExportSession, FfmpegExporter, VideoTranscoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStateKind {
    Idle,
    Authorizing,
    ExtractingFrame,
    Transcoding,
    Publishing,
    CleaningUp,
    Succeeded,
    Failed,
}

enum PipelineState {
    Idle,
    Authorizing,
    ExtractingFrame,
    Transcoding { still: ScratchFile },
    Publishing { still: ScratchFile, video: TranscodedClip },
    CleaningUp { scratch: Vec<ScratchFile>, result: Result<AssetId> },
    Succeeded(AssetId),
    Failed(PipelineError),
}

impl PipelineState {
    fn kind(&self) -> PipelineStateKind {
        match self {
            PipelineState::Idle => PipelineStateKind::Idle,
            PipelineState::Authorizing => PipelineStateKind::Authorizing,
            PipelineState::ExtractingFrame => PipelineStateKind::ExtractingFrame,
            PipelineState::Transcoding { .. } => PipelineStateKind::Transcoding,
            PipelineState::Publishing { .. } => PipelineStateKind::Publishing,
            PipelineState::CleaningUp { .. } => PipelineStateKind::CleaningUp,
            PipelineState::Succeeded(_) => PipelineStateKind::Succeeded,
            PipelineState::Failed(_) => PipelineStateKind::Failed,
        }
    }

    fn fail(scratch: Vec<ScratchFile>, error: PipelineError) -> Self {
        PipelineState::CleaningUp { scratch, result: Err(error) }
    }
}

/// Cancel signal for one or more invocations. Cancelling aborts the in-flight
/// frame decode or export. A cancelled decode fails with
/// `FrameExtractionFailed`, a cancelled export with `TranscodeFailed`; both
/// carry [`MediaError::Cancelled`] as the cause.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Pipeline {
    gate: PermissionGate,
    extractor: FrameExtractor,
    transcoder: VideoTranscoder,
    publisher: AssetPublisher,
    scratch: ScratchDir,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        frames: Arc<dyn FrameSource>,
        exporter: Arc<dyn ExportSession>,
        store: Arc<dyn PhotoStore>,
    ) -> std::result::Result<Self, MediaError> {
        config.validate()?;
        Ok(Self {
            gate: PermissionGate::new(Arc::clone(&store)),
            extractor: FrameExtractor::new(frames, config.jpeg_quality),
            transcoder: VideoTranscoder::new(exporter, config.quality_preset, config.max_duration()?),
            publisher: AssetPublisher::new(store),
            scratch: ScratchDir::new(&config.scratch_dir, config.scratch_prefix.clone()),
            metrics: Metrics::new(),
        })
    }

    /// Pipeline backed by the system `ffmpeg` for decoding and export.
    pub fn with_ffmpeg(config: &PipelineConfig, store: Arc<dyn PhotoStore>) -> std::result::Result<Self, MediaError> {
        Self::new(config, Arc::new(FfmpegFrameSource), Arc::new(FfmpegExporter), store)
    }

    pub fn scratch_stats(&self) -> Arc<ScratchStats> {
        self.scratch.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.scratch.stats())
    }

    pub async fn run(&self, clip: &MediaClip, cancel: &CancelHandle) -> Result<AssetId> {
        self.run_observed(clip, cancel, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting every state entered to `observe`.
    pub async fn run_observed<F>(&self, clip: &MediaClip, cancel: &CancelHandle, mut observe: F) -> Result<AssetId>
    where
        F: FnMut(PipelineStateKind),
    {
        let timer = Timer::new();
        info!("Exporting paired asset from {}", clip.source().display());

        let mut state = PipelineState::Idle;
        observe(state.kind());

        loop {
            state = self.step(state, clip, cancel).await;
            debug!("Pipeline entered {:?}", state.kind());
            observe(state.kind());

            match state {
                PipelineState::Succeeded(id) => {
                    self.metrics.record(Ok(()), timer.elapsed_ms());
                    info!("Paired asset {} saved in {}ms", id, timer.elapsed_ms());
                    return Ok(id);
                }
                PipelineState::Failed(error) => {
                    self.metrics.record(Err(error.kind()), timer.elapsed_ms());
                    warn!("Paired asset export failed: {}", error);
                    return Err(error);
                }
                _ => {}
            }
        }
    }

    async fn step(&self, state: PipelineState, clip: &MediaClip, cancel: &CancelHandle) -> PipelineState {
        match state {
            PipelineState::Idle => PipelineState::Authorizing,

            PipelineState::Authorizing => match self.gate.authorize().await {
                Authorization::Granted => PipelineState::ExtractingFrame,
                Authorization::Denied => PipelineState::fail(Vec::new(), PipelineError::PermissionDenied),
            },

            PipelineState::ExtractingFrame => {
                let frame = match self.extractor.extract_frame(clip, cancel.subscribe()).await {
                    Ok(frame) => frame,
                    Err(e) => return PipelineState::fail(Vec::new(), e),
                };

                let mut still = self.scratch.allocate(ScratchKind::Image);
                match self.extractor.write_still(frame, &mut still).await {
                    Ok(()) => PipelineState::Transcoding { still },
                    Err(e) => PipelineState::fail(vec![still], e),
                }
            }

            PipelineState::Transcoding { still } => {
                let destination = self.scratch.allocate(ScratchKind::Video);
                match self.transcoder.transcode(clip, destination, cancel.subscribe()).await {
                    Ok(video) => PipelineState::Publishing { still, video },
                    Err(e) => PipelineState::fail(vec![still], e),
                }
            }

            PipelineState::Publishing { still, video } => {
                let result = self.publisher.publish(PublishRequest::new(&still, &video)).await;
                PipelineState::CleaningUp {
                    scratch: vec![still, video.file],
                    result,
                }
            }

            PipelineState::CleaningUp { scratch, result } => {
                for file in scratch {
                    file.release();
                }
                match result {
                    Ok(id) => PipelineState::Succeeded(id),
                    Err(e) => PipelineState::Failed(e),
                }
            }

            terminal @ (PipelineState::Succeeded(_) | PipelineState::Failed(_)) => terminal,
        }
    }

    /// Run one invocation on the Tokio runtime and hand its outcome to
    /// `completion`, which is called exactly once, after cleanup.
    pub fn export_live_photo<F>(self: &Arc<Self>, clip: MediaClip, cancel: CancelHandle, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<AssetId>) + Send + 'static,
    {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let result = pipeline.run(&clip, &cancel).await;
            completion(result);
        })
    }
}
