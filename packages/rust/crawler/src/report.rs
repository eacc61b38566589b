//! Run summary and progress callbacks.

use std::path::Path;

use assetmirror_shared::NamespacePath;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    /// What failed: a namespace, an asset id or a local path.
    pub subject: String,
    /// Rendered error.
    pub message: String,
}

/// Structured outcome of a mirror run.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Namespaces enumerated successfully.
    pub namespaces_visited: usize,
    /// Namespaces whose enumeration or output directory failed.
    pub namespaces_failed: usize,
    /// Assets retrieved and persisted.
    pub assets_fetched: usize,
    /// Of those, assets whose content came from the fallback view.
    pub assets_via_fallback: usize,
    /// Assets skipped because every retrieval or the snapshot write failed.
    pub assets_failed: usize,
    /// Records without an id or display name.
    pub records_skipped: usize,
    /// Assets or namespaces already seen in this run.
    pub duplicates_skipped: usize,
    /// Subtrees not entered because of the depth limit.
    pub depth_limited: usize,
    /// Snapshot files created or replaced.
    pub snapshots_written: usize,
    /// Snapshot files already holding identical bytes.
    pub snapshots_unchanged: usize,
    pub errors: Vec<ReportError>,
    /// The run stopped early on cancellation or the run deadline.
    pub cancelled: bool,
}

impl MirrorReport {
    /// Empty report stamped with the current time.
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            namespaces_visited: 0,
            namespaces_failed: 0,
            assets_fetched: 0,
            assets_via_fallback: 0,
            assets_failed: 0,
            records_skipped: 0,
            duplicates_skipped: 0,
            depth_limited: 0,
            snapshots_written: 0,
            snapshots_unchanged: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    /// Record a failure against `subject`.
    pub fn record_error(&mut self, subject: impl Into<String>, message: impl ToString) {
        self.errors.push(ReportError {
            subject: subject.into(),
            message: message.to_string(),
        });
    }

    /// Failed namespaces plus failed assets.
    pub fn failures(&self) -> usize {
        self.namespaces_failed + self.assets_failed
    }

    /// Nothing failed and the run was not cut short.
    pub fn is_complete(&self) -> bool {
        self.failures() == 0 && !self.cancelled
    }

    /// Wall-clock duration, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Progress callback for the mirror run.
///
/// Implement this to show progress in the CLI; [`SilentProgress`] ignores everything.
pub trait ProgressReporter: Send + Sync {
    /// Called when a namespace is about to be enumerated.
    fn namespace_started(&self, namespace: &NamespacePath);
    /// Called after an asset's snapshots are persisted.
    fn asset_mirrored(&self, id: &str, local_path: &Path, fetched: usize);
    /// Called once when the run finishes.
    fn done(&self, report: &MirrorReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn namespace_started(&self, _namespace: &NamespacePath) {}
    fn asset_mirrored(&self, _id: &str, _local_path: &Path, _fetched: usize) {}
    fn done(&self, _report: &MirrorReport) {}
}
