//! Scratch file lifecycle
//!
//! Every [`ScratchFile`] is released exactly once: explicitly through
//! [`ScratchFile::release`], or by its `Drop` impl when the owning invocation
//! unwinds early (stage failure, cancellation, a dropped future).

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchKind {
    Image,
    Video,
}

impl ScratchKind {
    pub fn extension(&self) -> &str {
        match self {
            ScratchKind::Image => "jpg",
            ScratchKind::Video => "mov",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchState {
    Allocated,
    Written,
    Released,
}

/// Allocation/release counters shared by every file from one [`ScratchDir`].
#[derive(Debug, Default)]
pub struct ScratchStats {
    allocated: AtomicU64,
    released: AtomicU64,
}

impl ScratchStats {
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Files allocated but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }
}

/// Allocator for uniquely named scratch paths in one process-writable directory.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    dir: PathBuf,
    prefix: String,
    stats: Arc<ScratchStats>,
}

impl ScratchDir {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            stats: Arc::new(ScratchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ScratchStats> {
        Arc::clone(&self.stats)
    }

    /// Reserve a collision-free path. Nothing is created on disk.
    pub fn allocate(&self, kind: ScratchKind) -> ScratchFile {
        let name = format!("{}{}.{}", self.prefix, Uuid::new_v4(), kind.extension());
        let path = self.dir.join(name);

        self.stats.allocated.fetch_add(1, Ordering::SeqCst);
        debug!("Allocated {:?} scratch file {}", kind, path.display());

        ScratchFile {
            path,
            kind,
            state: ScratchState::Allocated,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    kind: ScratchKind,
    state: ScratchState,
    stats: Arc<ScratchStats>,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ScratchKind {
        self.kind
    }

    pub fn state(&self) -> ScratchState {
        self.state
    }

    pub fn mark_written(&mut self) {
        if self.state == ScratchState::Allocated {
            self.state = ScratchState::Written;
        }
    }

    /// Delete the file. A file that was never written is not an error.
    pub fn release(mut self) {
        self.release_in_place();
    }

    fn release_in_place(&mut self) {
        if self.state == ScratchState::Released {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released scratch file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove scratch file {}: {}", self.path.display(), e),
        }

        self.state = ScratchState::Released;
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release_in_place();
    }
}
