//! Filesystem-backed photo store
//!
//! Each asset is a directory `<root>/<asset-id>/` holding its resources and a
//! `manifest.json`. Resources are staged in a hidden sibling directory and
//! published with a single `rename`, so readers see the whole pair or nothing.

use crate::completion::Completion;
use crate::error::MediaError;
use crate::permission::AuthorizationStatus;
use crate::publish::{AssetCreationRequest, AssetId, PhotoStore, ResourceRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_PREFIX: &str = ".staging-";
const MANIFEST: &str = "manifest.json";

/// Interactive permission prompt; runs on a blocking thread.
pub type PromptFn = Arc<dyn Fn() -> AuthorizationStatus + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub resources: Vec<ManifestResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestResource {
    pub role: ResourceRole,
    pub file_name: String,
    pub original_name: Option<String>,
}

pub struct FsPhotoLibrary {
    root: PathBuf,
    status: Arc<Mutex<AuthorizationStatus>>,
    prompt: Option<PromptFn>,
    max_assets: Option<usize>,
}

impl FsPhotoLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            status: Arc::new(Mutex::new(AuthorizationStatus::Authorized)),
            prompt: None,
            max_assets: None,
        }
    }

    pub fn with_authorization(self, status: AuthorizationStatus) -> Self {
        self.set_status(status);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Reject commits once the library holds `max_assets` assets.
    pub fn with_quota(mut self, max_assets: usize) -> Self {
        self.max_assets = Some(max_assets);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn set_status(&self, status: AuthorizationStatus) {
        match self.status.lock() {
            Ok(mut current) => *current = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Committed assets, excluding in-flight staging directories.
    pub async fn list_assets(&self) -> std::io::Result<Vec<AssetId>> {
        list_assets(&self.root).await
    }

    pub fn manifest(&self, id: &AssetId) -> Result<AssetManifest, MediaError> {
        let bytes = std::fs::read(self.root.join(&id.0).join(MANIFEST))?;
        serde_json::from_slice(&bytes).map_err(|e| MediaError::ProcessingError(format!("manifest: {}", e)))
    }
}

impl PhotoStore for FsPhotoLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        match self.status.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn request_authorization(&self, done: Completion<AuthorizationStatus>) {
        let current = self.authorization_status();
        let Some(prompt) = self.prompt.clone() else {
            done.complete(current);
            return;
        };

        let status = Arc::clone(&self.status);
        tokio::task::spawn_blocking(move || {
            let answer = prompt();
            match status.lock() {
                Ok(mut s) => *s = answer,
                Err(poisoned) => *poisoned.into_inner() = answer,
            }
            done.complete(answer);
        });
    }

    fn perform_changes(&self, request: AssetCreationRequest, done: Completion<Result<AssetId, MediaError>>) {
        let root = self.root.clone();
        let max_assets = self.max_assets;
        let status = self.authorization_status();

        tokio::spawn(async move {
            let result = if !status.is_granted() {
                Err(MediaError::StoreRejected("photo library access revoked".to_string()))
            } else {
                commit(&root, request, max_assets).await
            };
            done.complete(result);
        });
    }
}

async fn list_assets(root: &Path) -> std::io::Result<Vec<AssetId>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().await?.is_dir() && !name.starts_with('.') {
            ids.push(AssetId(name));
        }
    }
    ids.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ids)
}

async fn commit(root: &Path, request: AssetCreationRequest, max_assets: Option<usize>) -> Result<AssetId, MediaError> {
    let roles: Vec<_> = request.resources.iter().map(|r| r.role).collect();
    if roles.len() != 2 || !roles.contains(&ResourceRole::Photo) || !roles.contains(&ResourceRole::PairedVideo) {
        return Err(MediaError::StoreRejected("a paired asset needs exactly one photo and one paired video".to_string()));
    }

    // Concurrent commits can each pass this check before either renames into
    // place, so the quota is a soft limit under concurrency.
    if let Some(max) = max_assets {
        if list_assets(root).await?.len() >= max {
            return Err(MediaError::StoreRejected("storage quota exceeded".to_string()));
        }
    }

    let id = Uuid::new_v4().to_string();
    fs::create_dir_all(root).await?;
    let staging = root.join(format!("{}{}", STAGING_PREFIX, id));
    fs::create_dir(&staging).await?;

    match stage(&staging, &id, &request).await {
        Ok(()) => {}
        Err(e) => {
            discard(&staging).await;
            return Err(e);
        }
    }

    if let Err(e) = fs::rename(&staging, root.join(&id)).await {
        discard(&staging).await;
        return Err(e.into());
    }

    debug!("Committed asset {} under {}", id, root.display());
    Ok(AssetId(id))
}

async fn stage(staging: &Path, id: &str, request: &AssetCreationRequest) -> Result<(), MediaError> {
    let mut resources = Vec::with_capacity(request.resources.len());

    for resource in &request.resources {
        let stem = match resource.role {
            ResourceRole::Photo => "photo",
            ResourceRole::PairedVideo => "paired_video",
        };
        let file_name = match resource.path.extension() {
            Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
            None => stem.to_string(),
        };

        fs::copy(&resource.path, staging.join(&file_name)).await?;
        resources.push(ManifestResource {
            role: resource.role,
            file_name,
            original_name: resource.path.file_name().map(|n| n.to_string_lossy().to_string()),
        });
    }

    let manifest = AssetManifest {
        id: id.to_string(),
        created_at: Utc::now(),
        resources,
    };
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| MediaError::ProcessingError(e.to_string()))?;
    fs::write(staging.join(MANIFEST), bytes).await?;
    Ok(())
}

async fn discard(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging).await {
        warn!("Failed to discard staging directory {}: {}", staging.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion;
    use crate::publish::AssetResource;
    use tempfile::TempDir;

    fn pair(dir: &Path) -> AssetCreationRequest {
        let image = dir.join("still.jpg");
        let video = dir.join("clip.mov");
        std::fs::write(&image, b"jpg").unwrap();
        std::fs::write(&video, b"mov").unwrap();
        AssetCreationRequest {
            resources: vec![
                AssetResource { role: ResourceRole::Photo, path: image },
                AssetResource { role: ResourceRole::PairedVideo, path: video },
            ],
        }
    }

    async fn perform(library: &FsPhotoLibrary, request: AssetCreationRequest) -> Result<AssetId, MediaError> {
        let (done, pending) = completion();
        library.perform_changes(request, done);
        pending.wait().await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_writes_pair_and_manifest() {
        let src = TempDir::new().unwrap();
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path());

        let id = perform(&library, pair(src.path())).await.unwrap();

        assert_eq!(library.list_assets().await.unwrap(), vec![id.clone()]);
        let dir = lib.path().join(&id.0);
        assert!(dir.join("photo.jpg").exists());
        assert!(dir.join("paired_video.mov").exists());

        let manifest = library.manifest(&id).unwrap();
        assert_eq!(manifest.id, id.0);
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resources[0].original_name.as_deref(), Some("still.jpg"));

        // Sources are copied, not moved.
        assert!(src.path().join("still.jpg").exists());
    }

    #[tokio::test]
    async fn test_missing_resource_leaves_nothing_behind() {
        let src = TempDir::new().unwrap();
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path());

        let mut request = pair(src.path());
        std::fs::remove_file(&request.resources[1].path).unwrap();
        request.resources[1].path = src.path().join("gone.mov");

        assert!(perform(&library, request).await.is_err());
        assert_eq!(std::fs::read_dir(lib.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_single_resource_is_rejected() {
        let src = TempDir::new().unwrap();
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path());

        let mut request = pair(src.path());
        request.resources.pop();

        let err = perform(&library, request).await.err().unwrap();
        assert!(matches!(err, MediaError::StoreRejected(_)));
        assert!(library.list_assets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_and_revoked_access() {
        let src = TempDir::new().unwrap();
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path()).with_quota(1);

        perform(&library, pair(src.path())).await.unwrap();
        assert!(matches!(perform(&library, pair(src.path())).await, Err(MediaError::StoreRejected(_))));

        let revoked = FsPhotoLibrary::new(lib.path()).with_authorization(AuthorizationStatus::Denied);
        assert!(matches!(perform(&revoked, pair(src.path())).await, Err(MediaError::StoreRejected(_))));
        assert_eq!(library.list_assets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_ignores_staging_dirs() {
        let src = TempDir::new().unwrap();
        let lib = TempDir::new().unwrap();
        std::fs::create_dir(lib.path().join(format!("{}abandoned", STAGING_PREFIX))).unwrap();
        std::fs::write(lib.path().join("notes.txt"), b"not an asset").unwrap();
        let library = FsPhotoLibrary::new(lib.path()).with_quota(2);

        perform(&library, pair(src.path())).await.unwrap();
        perform(&library, pair(src.path())).await.unwrap();
        assert!(matches!(perform(&library, pair(src.path())).await, Err(MediaError::StoreRejected(_))));
        assert_eq!(library.list_assets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_assets_of_missing_root_is_empty() {
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path().join("not-created"));
        assert!(library.list_assets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_updates_status() {
        let lib = TempDir::new().unwrap();
        let library = FsPhotoLibrary::new(lib.path())
            .with_authorization(AuthorizationStatus::NotDetermined)
            .with_prompt(Arc::new(|| AuthorizationStatus::Limited));

        let (done, pending) = completion();
        library.request_authorization(done);
        assert_eq!(pending.wait().await, Some(AuthorizationStatus::Limited));
        assert_eq!(library.authorization_status(), AuthorizationStatus::Limited);
    }
}
