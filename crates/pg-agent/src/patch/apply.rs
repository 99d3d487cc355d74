use super::hunk::{PatchHunkLine, parse_unified_diff};
use super::validate::{file_lines, resolve_target, validate_patch};
use crate::{BatchError, PatchError};
use pg_session::Patch;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// A backend's report of a failed application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendFailure {
    pub message: String,
    pub output: String,
}

impl BackendFailure {
    fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
        }
    }
}

/// Writes a validated diff into the working tree. `diff_file` holds the same text as
/// `patch.unified_diff`. Returns the tool output on success.
pub trait PatchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        repo_root: &Path,
        diff_file: &Path,
        patch: &Patch,
    ) -> Result<String, BackendFailure>;
}

const PATCH_PROGRAM: &str = "patch";

/// The system `patch` program.
#[derive(Clone, Debug, Default)]
pub struct HostPatchCommand;

impl PatchBackend for HostPatchCommand {
    fn name(&self) -> &'static str {
        "host"
    }

    fn apply(
        &self,
        repo_root: &Path,
        diff_file: &Path,
        patch: &Patch,
    ) -> Result<String, BackendFailure> {
        let strip = parse_unified_diff(&patch.unified_diff)
            .map(|parsed| parsed.strip_level())
            .unwrap_or(0);
        // The explicit target makes `patch` ignore the header paths.
        let output = Command::new(PATCH_PROGRAM)
            .arg(format!("-p{strip}"))
            .args(["-t", "-N", "-i"])
            .arg(diff_file)
            .arg(&patch.file_path)
            .current_dir(repo_root)
            .output()
            .map_err(|error| {
                BackendFailure::new(format!("failed to run {PATCH_PROGRAM}: {error}"), "")
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(combined)
        } else {
            Err(BackendFailure::new(
                format!("{PATCH_PROGRAM} exited with {}", output.status),
                combined,
            ))
        }
    }
}

/// Applies hunks directly, for hosts without a `patch` binary. Hunks must match at
/// their stated positions.
#[derive(Clone, Debug, Default)]
pub struct InProcessPatcher;

impl PatchBackend for InProcessPatcher {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn apply(
        &self,
        repo_root: &Path,
        _diff_file: &Path,
        patch: &Patch,
    ) -> Result<String, BackendFailure> {
        let parsed = parse_unified_diff(&patch.unified_diff)
            .map_err(|error| BackendFailure::new(error.to_string(), ""))?;
        let target = resolve_target(repo_root, &patch.file_path)
            .map_err(|error| BackendFailure::new(error.to_string(), ""))?;

        let original = if parsed.is_creation() {
            if target.exists() {
                return Err(BackendFailure::new(
                    format!("refusing to create existing file {}", patch.file_path),
                    "",
                ));
            }
            String::new()
        } else {
            let bytes = fs::read(&target).map_err(|error| {
                BackendFailure::new(format!("cannot read {}: {error}", patch.file_path), "")
            })?;
            String::from_utf8_lossy(&bytes).into_owned()
        };

        let updated = apply_hunks(&original, &parsed.hunks)
            .map_err(|message| BackendFailure::new(message, ""))?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                BackendFailure::new(format!("cannot create {}: {error}", parent.display()), "")
            })?;
        }
        fs::write(&target, updated).map_err(|error| {
            BackendFailure::new(format!("cannot write {}: {error}", patch.file_path), "")
        })?;
        Ok(format!(
            "patched {} ({} hunk(s))",
            patch.file_path,
            parsed.hunks.len()
        ))
    }
}

fn apply_hunks(original: &str, hunks: &[super::PatchHunk]) -> Result<String, String> {
    let lines = file_lines(original);
    let mut trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut output: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;

    for (index, hunk) in hunks.iter().enumerate() {
        let start = hunk.old_start.saturating_sub(1);
        // A pure insertion's old_start names the line it follows.
        let start = if hunk.old_count == 0 { hunk.old_start } else { start };
        if start < cursor || start > lines.len() {
            return Err(format!(
                "hunk {} starts at line {} outside the file",
                index + 1,
                hunk.old_start
            ));
        }
        output.extend_from_slice(&lines[cursor..start]);
        cursor = start;

        let mut previous: Option<&PatchHunkLine> = None;
        for line in &hunk.lines {
            match line {
                PatchHunkLine::Context(text) | PatchHunkLine::Delete(text) => {
                    if lines.get(cursor).copied() != Some(text.as_str()) {
                        return Err(format!(
                            "hunk {} does not match at line {}",
                            index + 1,
                            cursor + 1
                        ));
                    }
                    if matches!(line, PatchHunkLine::Context(_)) {
                        output.push(text.as_str());
                    }
                    cursor += 1;
                }
                PatchHunkLine::Add(text) => output.push(text.as_str()),
                PatchHunkLine::NoNewline => match previous {
                    Some(PatchHunkLine::Delete(_)) => trailing_newline = true,
                    Some(_) => trailing_newline = false,
                    None => {}
                },
            }
            previous = Some(line);
        }
    }
    output.extend_from_slice(&lines[cursor..]);

    let mut updated = output.join("\n");
    if trailing_newline && !output.is_empty() {
        updated.push('\n');
    }
    Ok(updated)
}

/// Sole writer of repository files on behalf of the agent.
#[derive(Clone)]
pub struct PatchApplicator {
    repo_root: PathBuf,
    backend: Arc<dyn PatchBackend>,
}

impl PatchApplicator {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self::with_backend(repo_root, Arc::new(HostPatchCommand::default()))
    }

    pub fn with_backend(repo_root: impl Into<PathBuf>, backend: Arc<dyn PatchBackend>) -> Self {
        Self {
            repo_root: repo_root.into(),
            backend,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validates, backs up the target, and runs the backend. On failure the target is
    /// put back exactly as it was, or removed if the patch was creating it.
    pub fn apply(&self, patch: &Patch) -> Result<(), PatchError> {
        validate_patch(&self.repo_root, patch)?;
        let target = resolve_target(&self.repo_root, &patch.file_path)?;
        let backup = if target.exists() {
            Some(create_backup(&target)?)
        } else {
            None
        };

        let diff_file = match write_diff_file(&patch.unified_diff) {
            Ok(file) => file,
            Err(error) => {
                discard_backup(backup.as_deref());
                return Err(error);
            }
        };
        let artifacts = ArtifactGuard::record(&target);

        match self
            .backend
            .apply(&self.repo_root, diff_file.path(), patch)
        {
            Ok(output) => {
                discard_backup(backup.as_deref());
                artifacts.cleanup();
                tracing::info!(
                    file = %patch.file_path,
                    backend = self.backend.name(),
                    "patch applied"
                );
                tracing::debug!(output = %output.trim_end(), "patch backend output");
                Ok(())
            }
            Err(failure) => {
                tracing::warn!(
                    file = %patch.file_path,
                    error = %failure.message,
                    "patch failed; restoring target"
                );
                let restored = match &backup {
                    Some(backup) => fs::rename(backup, &target),
                    None if target.exists() => fs::remove_file(&target),
                    None => Ok(()),
                };
                artifacts.cleanup();
                if let Err(restore_error) = restored {
                    return Err(PatchError::BackupRestoreFailure {
                        path: patch.file_path.clone(),
                        apply_error: failure.message,
                        restore_error: restore_error.to_string(),
                    });
                }
                Err(PatchError::Apply {
                    message: failure.message,
                    output: failure.output,
                })
            }
        }
    }

    /// Applies in order and stops at the first failure. Earlier patches stay applied.
    pub fn apply_batch(&self, patches: &[Patch]) -> Result<usize, BatchError> {
        for (applied, patch) in patches.iter().enumerate() {
            if let Err(source) = self.apply(patch) {
                return Err(BatchError {
                    applied,
                    total: patches.len(),
                    file_path: patch.file_path.clone(),
                    source,
                });
            }
        }
        Ok(patches.len())
    }
}

fn create_backup(target: &Path) -> Result<PathBuf, PatchError> {
    let mut backup = sibling(target, ".backup");
    let mut attempt = 1usize;
    while backup.exists() {
        backup = sibling(target, &format!(".backup.{attempt}"));
        attempt += 1;
    }
    fs::copy(target, &backup).map_err(|error| {
        PatchError::io(format!("failed to create backup {}", backup.display()), error)
    })?;
    Ok(backup)
}

fn discard_backup(backup: Option<&Path>) {
    if let Some(backup) = backup {
        if let Err(error) = fs::remove_file(backup) {
            tracing::warn!(path = %backup.display(), %error, "failed to remove patch backup");
        }
    }
}

fn write_diff_file(diff: &str) -> Result<tempfile::NamedTempFile, PatchError> {
    let mut file = tempfile::Builder::new()
        .prefix("pg-patch-")
        .suffix(".diff")
        .tempfile()
        .map_err(|error| PatchError::io("failed to create temp diff file", error))?;
    file.write_all(diff.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|error| PatchError::io("failed to write temp diff file", error))?;
    Ok(file)
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// `.orig`/`.rej` files the host tool may leave next to the target. Only files that
/// did not exist before the run are removed.
struct ArtifactGuard {
    fresh: Vec<PathBuf>,
}

impl ArtifactGuard {
    fn record(target: &Path) -> Self {
        let fresh = [".orig", ".rej"]
            .iter()
            .map(|suffix| sibling(target, suffix))
            .filter(|path| !path.exists())
            .collect();
        Self { fresh }
    }

    fn cleanup(self) {
        for path in self.fresh.iter().filter(|path| path.exists()) {
            if let Err(error) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), %error, "failed to remove patch artifact");
            }
        }
    }
}
