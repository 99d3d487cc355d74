use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::errors::{WorkspaceError, WorkspaceResult};
use crate::{STATE_DIR, SnapshotInfo, SnapshotOutcome, Workspace, validate_label};

const SNAPSHOT_PREFIX: &str = "pg-snapshot: ";
const FIELD_SEPARATOR: char = '\u{1f}';

/// Workspace backed by the host git: diffs come from `git diff`, snapshots are stashes
/// whose message embeds the label.
#[derive(Clone, Debug)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn git(&self, args: &[&str]) -> WorkspaceResult<String> {
        run_git(&self.root, args)
    }

    fn stash_entries(&self) -> WorkspaceResult<Vec<StashEntry>> {
        let format = format!("--format=%gd{FIELD_SEPARATOR}%ct{FIELD_SEPARATOR}%s");
        let raw = self.git(&["stash", "list", &format])?;
        Ok(raw.lines().filter_map(StashEntry::parse).collect())
    }
}

#[derive(Debug)]
struct StashEntry {
    reference: String,
    created_at: Option<DateTime<Utc>>,
    subject: String,
}

impl StashEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split(FIELD_SEPARATOR);
        let reference = fields.next()?.trim().to_string();
        let created_at = fields
            .next()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        let subject = fields.next().unwrap_or_default().to_string();
        (!reference.is_empty()).then_some(Self {
            reference,
            created_at,
            subject,
        })
    }

    /// Text after the `pg-snapshot: ` marker, if this stash was created by pg.
    fn label(&self) -> Option<&str> {
        self.subject
            .find(SNAPSHOT_PREFIX)
            .map(|index| self.subject[index + SNAPSHOT_PREFIX.len()..].trim())
    }
}

impl Workspace for GitWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_vcs_backed(&self) -> bool {
        true
    }

    fn diff(&self, path: &str) -> WorkspaceResult<String> {
        self.git(&["diff", "--", path])
    }

    fn snapshot(&self, label: &str) -> WorkspaceResult<SnapshotOutcome> {
        validate_label(label)?;
        let exclude_state = format!(":(exclude){STATE_DIR}");
        let status = self.git(&["status", "--porcelain", "--", ".", &exclude_state])?;
        if status.trim().is_empty() {
            debug!(label, "working tree clean, no stash created");
            return Ok(SnapshotOutcome::Clean);
        }

        let files = status.lines().filter(|line| !line.trim().is_empty()).count();
        let message = format!("{SNAPSHOT_PREFIX}{label}");
        self.git(&[
            "stash",
            "push",
            "--include-untracked",
            "-m",
            &message,
            "--",
            ".",
            &exclude_state,
        ])?;
        info!(label, files, "created git stash snapshot");
        Ok(SnapshotOutcome::Created(SnapshotInfo {
            label: label.to_string(),
            created_at: Some(Utc::now()),
            files: Some(files),
        }))
    }

    fn restore(&self, label: &str) -> WorkspaceResult<()> {
        validate_label(label)?;
        let needle = format!("{SNAPSHOT_PREFIX}{label}");
        let entries = self.stash_entries()?;
        // An exact label wins over a substring hit, so `v1` never pops `v10`.
        let entry = entries
            .iter()
            .find(|entry| entry.label() == Some(label))
            .or_else(|| entries.iter().find(|entry| entry.subject.contains(&needle)))
            .ok_or_else(|| WorkspaceError::SnapshotNotFound(label.to_string()))?;

        self.git(&["stash", "pop", &entry.reference])?;
        info!(label, reference = %entry.reference, "restored git stash snapshot");
        Ok(())
    }

    fn list_snapshots(&self) -> WorkspaceResult<Vec<SnapshotInfo>> {
        Ok(self
            .stash_entries()?
            .iter()
            .filter_map(|entry| {
                entry.label().map(|label| SnapshotInfo {
                    label: label.to_string(),
                    created_at: entry.created_at,
                    files: None,
                })
            })
            .collect())
    }
}

/// Top-level directory of the git work tree containing `dir`, if any.
pub fn discover_toplevel(dir: &Path) -> Option<PathBuf> {
    run_git(dir, &["rev-parse", "--show-toplevel"])
        .ok()
        .map(|out| PathBuf::from(out.trim()))
        .filter(|root| !root.as_os_str().is_empty())
}

fn run_git(dir: &Path, args: &[&str]) -> WorkspaceResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|err| WorkspaceError::Git {
            command: args.join(" "),
            message: format!("could not run git: {err}"),
        })?;

    if !output.status.success() {
        return Err(WorkspaceError::Git {
            command: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
