use crate::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    fn from_output(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Read-only view of the repository plus process execution, scoped to one root.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    fn working_directory(&self) -> &Path;

    async fn read_file(&self, path: &str) -> Result<String, ToolError>;

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, ToolError>;

    async fn exec_command(&self, program: &str, args: &[&str]) -> Result<ExecResult, ToolError>;

    async fn exec_shell(&self, command: &str) -> Result<ExecResult, ToolError>;
}

#[derive(Clone, Debug)]
pub struct LocalExecutionEnvironment {
    working_directory: PathBuf,
}

impl LocalExecutionEnvironment {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        resolve_in_repo(&self.working_directory, relative)
    }

    async fn run(&self, mut command: Command, display: &str) -> Result<ExecResult, ToolError> {
        let command_line = display;
        tracing::debug!(command = command_line, "executing command");
        let output = command
            .current_dir(&self.working_directory)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| ToolError::Execution(format!("failed to run {display}: {error}")))?;
        Ok(ExecResult::from_output(output))
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    async fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path)?;
        match tokio::fs::read(&resolved).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(ToolError::Execution(format!("file not found: {path}")))
            }
            Err(error) => Err(ToolError::Execution(format!(
                "failed to read file {path}: {error}"
            ))),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, ToolError> {
        let resolved = self.resolve(path)?;
        let mut reader = match tokio::fs::read_dir(&resolved).await {
            Ok(reader) => reader,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::Execution(format!("directory not found: {path}")));
            }
            Err(error) => {
                return Err(ToolError::Execution(format!(
                    "failed to read directory {path}: {error}"
                )));
            }
        };

        let mut entries = Vec::new();
        loop {
            let entry = reader.next_entry().await.map_err(|error| {
                ToolError::Execution(format!("failed to read directory {path}: {error}"))
            })?;
            let Some(entry) = entry else {
                break;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            // Entries that vanish or cannot be stat'ed are skipped.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            entries.push(DirEntry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exec_command(&self, program: &str, args: &[&str]) -> Result<ExecResult, ToolError> {
        let mut command = Command::new(program);
        command.args(args);
        let display = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.run(command, &display).await
    }

    async fn exec_shell(&self, command: &str) -> Result<ExecResult, ToolError> {
        let mut shell = if cfg!(windows) {
            let mut shell = Command::new("cmd");
            shell.arg("/C");
            shell
        } else {
            let mut shell = Command::new("sh");
            shell.arg("-c");
            shell
        };
        shell.arg(command);
        self.run(shell, command).await
    }
}

/// Joins `relative` onto `root` and refuses anything that lands outside it, lexically
/// or through a symlink.
pub fn resolve_in_repo(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let outside = || ToolError::OutsideRepository(relative.to_string());
    let root = normalize_lexically(root).ok_or_else(outside)?;
    let candidate = Path::new(relative);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let normalized = normalize_lexically(&joined).ok_or_else(outside)?;
    if !normalized.starts_with(&root) {
        return Err(outside());
    }

    if let (Ok(real_root), Ok(real_path)) = (root.canonicalize(), normalized.canonicalize()) {
        if !real_path.starts_with(&real_root) {
            return Err(outside());
        }
    }
    Ok(normalized)
}

/// Folds `.` and `..` without touching the filesystem; `None` when `..` climbs past the
/// first component.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Some(normalized)
}
