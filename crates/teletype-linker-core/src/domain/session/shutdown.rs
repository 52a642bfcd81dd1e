//! Teardown of collaboration state
//!
//! Deactivation runs in a fixed order:
//!
//! 1. Mark the coordinator inactive (pending retries stop rescheduling)
//! 2. Stop watching the host binding
//! 3. Release every tracked lock, best-effort
//! 4. Detach destroy observers from tracked editors
//!
//! Nothing here fails: problems end up in [`DeactivationReport::warnings`].

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::locking::{LockStore, ReleaseReport, UnlockError};
use crate::domain::registry::EditorRegistry;

/// What deactivation did
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeactivationReport {
    /// Files whose locks were removed
    pub released: Vec<PathBuf>,

    /// Files whose locks could not be removed, with the reason
    pub failed: Vec<(PathBuf, String)>,

    /// Editors that were still tracked
    pub editors_untracked: usize,

    /// Whether a host-binding subscription was disposed
    pub stopped_watching: bool,

    /// Non-fatal problems, human readable
    pub warnings: Vec<String>,
}

impl DeactivationReport {
    pub(crate) fn record_release(&mut self, report: ReleaseReport) {
        self.released.extend(report.released);
        for (file, error) in report.failed {
            self.record_failure(file, &error);
        }
    }

    fn record_failure(&mut self, file: PathBuf, error: &UnlockError) {
        let warning = format!("Failed to release lock on {}: {}", file.display(), error);
        warn!("{}", warning);
        self.warnings.push(warning);
        self.failed.push((file, error.to_string()));
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.released.is_empty() {
            parts.push(format!("{} locks released", self.released.len()));
        }
        if !self.failed.is_empty() {
            parts.push(format!("{} locks could not be released", self.failed.len()));
        }
        if self.editors_untracked > 0 {
            parts.push(format!("{} editors untracked", self.editors_untracked));
        }

        if parts.is_empty() {
            "Deactivated (nothing to clean up)".to_string()
        } else {
            parts.join("; ")
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Steps 3 and 4 of teardown
pub(crate) async fn sweep(locks: &LockStore, registry: &EditorRegistry) -> DeactivationReport {
    let mut report = DeactivationReport::default();

    report.record_release(locks.release_all().await);
    report.editors_untracked = registry.clear().await;
    debug!(editors = report.editors_untracked, "Editor observers detached");

    info!(summary = %report.summary(), "Teardown completed");
    report
}
