use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("`git {command}` failed: {message}")]
    Git { command: String, message: String },
    #[error("invalid snapshot label: {0}")]
    InvalidLabel(String),
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),
    #[error("snapshot object missing: {0}")]
    ObjectMissing(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("path is outside the workspace: {0}")]
    OutsideWorkspace(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot manifest serialization failed: {0}")]
    Serialization(String),
}

impl WorkspaceError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
