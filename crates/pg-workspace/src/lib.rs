//! Version-control capability set for pg.
//!
//! [`Workspace`] hides whether snapshots live in git stashes ([`GitWorkspace`]) or in a
//! private content-addressed store under `.pg/workspace` ([`SnapshotWorkspace`]).

pub mod diff;
pub mod errors;
pub mod git;
pub mod snapshot;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use errors::*;
pub use git::GitWorkspace;
pub use snapshot::{SnapshotManifest, SnapshotWorkspace};

/// pg's own state directory under the repository root. Never part of a snapshot.
pub const STATE_DIR: &str = ".pg";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub label: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Number of files captured, when the backend knows it.
    pub files: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Created(SnapshotInfo),
    /// Nothing to capture: the working tree has no changes.
    Clean,
}

pub trait Workspace: Send + Sync {
    fn root(&self) -> &Path;

    fn is_vcs_backed(&self) -> bool;

    fn kind(&self) -> &'static str {
        if self.is_vcs_backed() { "git" } else { "snapshot" }
    }

    /// Unified diff of `path` (repository-relative) against the last recorded state.
    fn diff(&self, path: &str) -> WorkspaceResult<String>;

    fn snapshot(&self, label: &str) -> WorkspaceResult<SnapshotOutcome>;

    fn restore(&self, label: &str) -> WorkspaceResult<()>;

    fn list_snapshots(&self) -> WorkspaceResult<Vec<SnapshotInfo>>;
}

/// Picks the git backend when `dir` is inside a git work tree, else the snapshot store.
pub fn open_workspace(dir: &Path) -> Box<dyn Workspace> {
    match git::discover_toplevel(dir) {
        Some(root) => Box::new(GitWorkspace::new(root)),
        None => Box::new(SnapshotWorkspace::new(dir)),
    }
}

pub(crate) fn validate_label(label: &str) -> WorkspaceResult<()> {
    if label.trim().is_empty() {
        return Err(WorkspaceError::InvalidLabel(
            "snapshot label is required".to_string(),
        ));
    }
    if label.starts_with('.') || label.contains(['/', '\\', '\n']) {
        return Err(WorkspaceError::InvalidLabel(format!(
            "snapshot label '{label}' must not start with '.' or contain path separators"
        )));
    }
    Ok(())
}
