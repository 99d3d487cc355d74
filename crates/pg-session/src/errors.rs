use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session {session_id} is locked by another process ({holder})")]
    LockConflict { session_id: String, holder: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session serialization failed: {0}")]
    Serialization(String),
}

impl SessionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
