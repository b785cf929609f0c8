//! Metrics and observability for the export pipeline

use crate::error::FailureKind;
use crate::scratch::ScratchStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide pipeline counters.
#[derive(Default)]
pub struct Metrics {
    pub total_invocations: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-kind failure counters
    pub permission_denied: AtomicU64,
    pub frame_extraction_failed: AtomicU64,
    pub transcode_failed: AtomicU64,
    pub publish_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, outcome: Result<(), FailureKind>, latency_ms: u64) {
        self.total_invocations.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let kind = match outcome {
            Ok(()) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(kind) => kind,
        };

        self.failed.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            FailureKind::PermissionDenied => &self.permission_denied,
            FailureKind::FrameExtractionFailed => &self.frame_extraction_failed,
            FailureKind::TranscodeFailed => &self.transcode_failed,
            FailureKind::PublishFailed => &self.publish_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, scratch: &ScratchStats) -> MetricsSnapshot {
        let total = self.total_invocations.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_invocations: total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            failures: FailureMetrics {
                permission_denied: self.permission_denied.load(Ordering::Relaxed),
                frame_extraction_failed: self.frame_extraction_failed.load(Ordering::Relaxed),
                transcode_failed: self.transcode_failed.load(Ordering::Relaxed),
                publish_failed: self.publish_failed.load(Ordering::Relaxed),
            },
            scratch_allocated: scratch.allocated(),
            scratch_released: scratch.released(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_invocations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub failures: FailureMetrics,
    pub scratch_allocated: u64,
    pub scratch_released: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMetrics {
    pub permission_denied: u64,
    pub frame_extraction_failed: u64,
    pub transcode_failed: u64,
    pub publish_failed: u64,
}

/// Timer for tracking invocation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record(Ok(()), 40);
        metrics.record(Err(FailureKind::TranscodeFailed), 20);

        let snap = metrics.snapshot(&ScratchStats::default());
        assert_eq!(snap.total_invocations, 2);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failures.transcode_failed, 1);
        assert_eq!(snap.failures.publish_failed, 0);
        assert_eq!(snap.avg_latency_ms, 30);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);
    }
}
