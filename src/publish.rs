//! Atomic publication of a still + paired video into the photo store

use crate::clip::TranscodedClip;
use crate::completion::{completion, Completion};
use crate::error::{MediaError, PipelineError};
use crate::permission::AuthorizationStatus;
use crate::scratch::ScratchFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Identifier the store assigns to a committed asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    Photo,
    PairedVideo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetResource {
    pub role: ResourceRole,
    pub path: PathBuf,
}

/// One store transaction: every resource is persisted or none is.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetCreationRequest {
    pub resources: Vec<AssetResource>,
}

/// Photo store collaborator. Both operations report through a single-fire
/// [`Completion`].
pub trait PhotoStore: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Show the interactive permission prompt.
    fn request_authorization(&self, done: Completion<AuthorizationStatus>);

    /// Apply `request` atomically. Resources are copied, never moved.
    fn perform_changes(&self, request: AssetCreationRequest, done: Completion<Result<AssetId, MediaError>>);
}

/// The still image and paired video of one invocation. Can only be built with
/// both halves present.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    image: PathBuf,
    video: PathBuf,
}

impl PublishRequest {
    pub fn new(still: &ScratchFile, video: &TranscodedClip) -> Self {
        Self {
            image: still.path().to_path_buf(),
            video: video.file.path().to_path_buf(),
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn video(&self) -> &Path {
        &self.video
    }

    fn into_creation_request(self) -> AssetCreationRequest {
        AssetCreationRequest {
            resources: vec![
                AssetResource { role: ResourceRole::Photo, path: self.image },
                AssetResource { role: ResourceRole::PairedVideo, path: self.video },
            ],
        }
    }
}

pub struct AssetPublisher {
    store: Arc<dyn PhotoStore>,
}

impl AssetPublisher {
    pub fn new(store: Arc<dyn PhotoStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<AssetId, PipelineError> {
        let (done, pending) = completion();
        self.store.perform_changes(request.into_creation_request(), done);

        let id = pending
            .wait()
            .await
            .unwrap_or_else(|| Err(MediaError::StoreRejected("change request dropped without reply".to_string())))
            .map_err(PipelineError::PublishFailed)?;

        info!("Published paired asset {}", id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::{ScratchDir, ScratchKind};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        reject: bool,
        requests: Mutex<Vec<AssetCreationRequest>>,
    }

    impl PhotoStore for RecordingStore {
        fn authorization_status(&self) -> AuthorizationStatus {
            AuthorizationStatus::Authorized
        }

        fn request_authorization(&self, done: Completion<AuthorizationStatus>) {
            done.complete(AuthorizationStatus::Authorized);
        }

        fn perform_changes(&self, request: AssetCreationRequest, done: Completion<Result<AssetId, MediaError>>) {
            self.requests.lock().unwrap().push(request);
            if self.reject {
                done.complete(Err(MediaError::StoreRejected("quota exceeded".into())));
            } else {
                done.complete(Ok(AssetId("asset-1".into())));
            }
        }
    }

    fn request(scratch: &ScratchDir) -> (PublishRequest, ScratchFile, TranscodedClip) {
        let still = scratch.allocate(ScratchKind::Image);
        let video = TranscodedClip { file: scratch.allocate(ScratchKind::Video), duration: Duration::from_secs(1) };
        (PublishRequest::new(&still, &video), still, video)
    }

    #[tokio::test]
    async fn test_publish_sends_both_resources() {
        let scratch = ScratchDir::new(std::env::temp_dir(), "pub_");
        let store = Arc::new(RecordingStore::default());
        let publisher = AssetPublisher::new(store.clone());
        let (req, _still, _video) = request(&scratch);

        let id = publisher.publish(req.clone()).await.unwrap();
        assert_eq!(id, AssetId("asset-1".into()));

        let sent = store.requests.lock().unwrap();
        let roles: Vec<_> = sent[0].resources.iter().map(|r| r.role).collect();
        assert_eq!(roles, vec![ResourceRole::Photo, ResourceRole::PairedVideo]);
        assert_eq!(sent[0].resources[0].path, req.image());
        assert_eq!(sent[0].resources[1].path, req.video());
    }

    #[tokio::test]
    async fn test_rejection_maps_to_publish_failed() {
        let scratch = ScratchDir::new(std::env::temp_dir(), "pub_");
        let store = Arc::new(RecordingStore { reject: true, ..Default::default() });
        let publisher = AssetPublisher::new(store);
        let (req, _still, _video) = request(&scratch);

        let err = publisher.publish(req).await.err().unwrap();
        assert!(matches!(err, PipelineError::PublishFailed(MediaError::StoreRejected(_))));
    }
}
