use thiserror::Error;

/// Top-level error type for an agent loop run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("agent exceeded maximum iterations ({max})")]
    IterationLimitExceeded { max: usize },
    #[error("event consumer failed: {0}")]
    Emitter(String),
    #[error(transparent)]
    Provider(#[from] pg_llm::ProviderError),
    #[error(transparent)]
    Session(#[from] pg_session::SessionError),
}

/// A tool call that could not be carried out. Reported back to the model as a
/// tool-result message, never fatal to the loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("missing required argument '{argument}' for tool '{tool}'")]
    MissingArgument { tool: String, argument: String },
    #[error("argument '{argument}' {message}")]
    InvalidArgument { argument: String, message: String },
    #[error("path is outside repository bounds: {0}")]
    OutsideRepository(String),
    #[error("command rejected by operator")]
    Rejected,
    #[error("patch rejected: {0}")]
    InvalidPatch(#[from] ValidationError),
    #[error("{0}")]
    Execution(String),
}

/// Why a diff was refused before anything was written.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid target path: {0}")]
    InvalidPath(String),
    #[error("target file does not exist: {0}")]
    TargetMissing(String),
    #[error("invalid patch format: missing '---' or '+++' header")]
    MissingHeaders,
    #[error("invalid hunk header on diff line {line}: {header}")]
    MalformedHunk { line: usize, header: String },
    #[error("patch has no hunks")]
    NoHunks,
    #[error("context line {line} doesn't match: expected {expected:?}, got {actual:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        actual: String,
    },
    #[error("cannot read {path}: {message}")]
    Unreadable { path: String, message: String },
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("patch application failed: {message}\nOutput: {output}")]
    Apply { message: String, output: String },
    #[error(
        "patch failed and backup restoration failed for {path}: {restore_error} \
         (apply error: {apply_error}); repository state is suspect"
    )]
    BackupRestoreFailure {
        path: String,
        apply_error: String,
        restore_error: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_restore_failure(&self) -> bool {
        matches!(self, Self::BackupRestoreFailure { .. })
    }
}

/// A multi-patch apply that stopped at its first failing patch.
#[derive(Debug, Error)]
#[error("applied {applied} of {total} patches before failure on {file_path}: {source}")]
pub struct BatchError {
    pub applied: usize,
    pub total: usize,
    pub file_path: String,
    #[source]
    pub source: PatchError,
}
