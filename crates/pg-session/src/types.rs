use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{SessionError, SessionResult};

/// A change proposed by the model, held until the operator applies or discards it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Relative to the repository root.
    pub file_path: String,
    pub unified_diff: String,
    pub created_at: DateTime<Utc>,
}

impl Patch {
    pub fn new(file_path: impl Into<String>, unified_diff: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            unified_diff: unified_diff.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn success(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: Some(result.into()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Session state. Identity and repository path are fixed at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    repo: PathBuf,
    goal: String,
    #[serde(default)]
    context_summary: String,
    #[serde(default)]
    pending_patches: Vec<Patch>,
    #[serde(default)]
    tool_history: Vec<ToolCallRecord>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        repo: impl Into<PathBuf>,
        goal: impl Into<String>,
    ) -> SessionResult<Self> {
        let session = Self {
            id: id.into(),
            repo: repo.into(),
            goal: goal.into(),
            context_summary: String::new(),
            pending_patches: Vec::new(),
            tool_history: Vec::new(),
            created_at: Utc::now(),
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> SessionResult<()> {
        validate_session_id(&self.id)?;
        if self.repo.as_os_str().is_empty() {
            return Err(SessionError::InvalidSession(
                "repository path is required".to_string(),
            ));
        }
        if !self.repo.is_absolute() {
            return Err(SessionError::InvalidSession(format!(
                "repository path must be absolute: {}",
                self.repo.display()
            )));
        }
        if self.goal.trim().is_empty() {
            return Err(SessionError::InvalidSession("goal is required".to_string()));
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn context_summary(&self) -> &str {
        &self.context_summary
    }

    pub fn set_context_summary(&mut self, summary: impl Into<String>) {
        self.context_summary = summary.into();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pending_patches(&self) -> &[Patch] {
        &self.pending_patches
    }

    pub fn push_patch(&mut self, patch: Patch) {
        self.pending_patches.push(patch);
    }

    /// Drops the first `count` pending patches, keeping the rest in order.
    pub fn remove_applied_patches(&mut self, count: usize) {
        let count = count.min(self.pending_patches.len());
        self.pending_patches.drain(..count);
    }

    pub fn clear_pending_patches(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.pending_patches)
    }

    pub fn tool_history(&self) -> &[ToolCallRecord] {
        &self.tool_history
    }

    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_history.push(record);
    }
}

/// Session ids double as file names, so they must be a single plain path component.
pub fn validate_session_id(id: &str) -> SessionResult<()> {
    if id.trim().is_empty() {
        return Err(SessionError::InvalidSession("session id is required".to_string()));
    }
    let valid = id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        && !id.starts_with('.');
    if !valid {
        return Err(SessionError::InvalidSession(format!(
            "session id '{id}' may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> PathBuf {
        std::env::temp_dir().join("repo")
    }

    #[test]
    fn new_session_requires_goal_and_absolute_repo() {
        let error = Session::new("pg-1", repo(), "  ").expect_err("blank goal should fail");
        assert!(error.to_string().contains("goal is required"));

        let error = Session::new("pg-1", "relative/repo", "goal")
            .expect_err("relative repo should fail");
        assert!(error.to_string().contains("must be absolute"));

        let session = Session::new("pg-1", repo(), "add tests").expect("session should build");
        assert_eq!(session.id(), "pg-1");
        assert!(session.pending_patches().is_empty());
    }

    #[test]
    fn session_ids_cannot_escape_the_sessions_directory() {
        for id in ["../evil", "a/b", ".hidden", ""] {
            assert!(validate_session_id(id).is_err(), "id {id:?} should be rejected");
        }
        validate_session_id("pg-12").expect("sequential id should be valid");
    }

    #[test]
    fn remove_applied_patches_keeps_remaining_order() {
        let mut session = Session::new("pg-1", repo(), "goal").expect("session should build");
        for name in ["a.rs", "b.rs", "c.rs"] {
            session.push_patch(Patch::new(name, "--- a\n+++ a\n"));
        }
        session.remove_applied_patches(2);
        assert_eq!(session.pending_patches().len(), 1);
        assert_eq!(session.pending_patches()[0].file_path, "c.rs");

        session.remove_applied_patches(5);
        assert!(session.pending_patches().is_empty());
    }

    #[test]
    fn tool_record_serializes_only_populated_outcome() {
        let record = ToolCallRecord::failure("read_file", Map::new(), "missing");
        let value = serde_json::to_value(&record).expect("record should serialize");
        assert_eq!(value["error"], "missing");
        assert!(value.get("result").is_none());
        assert!(record.is_error());
    }
}
