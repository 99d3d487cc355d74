use super::hunk::{NULL_DEVICE, PatchHunk, PatchHunkLine, parse_unified_diff};
use crate::ValidationError;
use pg_session::Patch;
use std::path::{Component, Path, PathBuf};

const END_OF_FILE: &str = "<end of file>";

/// Checks that `patch` is well formed and that its context and deletion lines still
/// match the target file. Reads only.
pub fn validate_patch(repo_root: &Path, patch: &Patch) -> Result<(), ValidationError> {
    let target = resolve_target(repo_root, &patch.file_path)?;
    let diff = &patch.unified_diff;
    let creation = is_creation(diff);

    if !creation && !target.is_file() {
        return Err(ValidationError::TargetMissing(patch.file_path.clone()));
    }
    if !has_headers(diff) {
        return Err(ValidationError::MissingHeaders);
    }

    let parsed = parse_unified_diff(diff)?;
    if parsed.hunks.is_empty() {
        return Err(ValidationError::NoHunks);
    }
    if creation {
        return Ok(());
    }

    let content = std::fs::read(&target).map_err(|error| ValidationError::Unreadable {
        path: patch.file_path.clone(),
        message: error.to_string(),
    })?;
    let content = String::from_utf8_lossy(&content);
    check_context(&file_lines(&content), &parsed.hunks)
}

/// Repository-relative, no `..`, no absolute paths.
pub fn resolve_target(repo_root: &Path, file_path: &str) -> Result<PathBuf, ValidationError> {
    let invalid = || ValidationError::InvalidPath(file_path.to_string());
    let relative = Path::new(file_path);
    if file_path.trim().is_empty() {
        return Err(invalid());
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid());
            }
        }
    }
    Ok(repo_root.join(relative))
}

pub(crate) fn is_creation(diff: &str) -> bool {
    diff.lines().any(|line| {
        line.strip_prefix("--- ")
            .is_some_and(|rest| rest.trim_start().starts_with(NULL_DEVICE))
    })
}

fn has_headers(diff: &str) -> bool {
    let mut old = false;
    let mut new = false;
    for line in diff.lines() {
        old |= line.starts_with("---");
        new |= line.starts_with("+++");
    }
    old && new
}

pub(crate) fn file_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    if content.ends_with('\n') || content.is_empty() {
        lines.pop();
    }
    lines
}

fn check_context(lines: &[&str], hunks: &[PatchHunk]) -> Result<(), ValidationError> {
    for hunk in hunks {
        let mut cursor = hunk.old_start.saturating_sub(1);
        for line in &hunk.lines {
            let expected = match line {
                PatchHunkLine::Context(text) | PatchHunkLine::Delete(text) => text,
                PatchHunkLine::Add(_) | PatchHunkLine::NoNewline => continue,
            };
            let actual = lines.get(cursor).copied().unwrap_or(END_OF_FILE);
            if cursor >= lines.len() || actual != expected.as_str() {
                return Err(ValidationError::ContextMismatch {
                    line: cursor + 1,
                    expected: expected.clone(),
                    actual: actual.to_string(),
                });
            }
            cursor += 1;
        }
    }
    Ok(())
}
