use thiserror::Error;

/// Failure talking to a model provider. Never retried automatically.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    Configuration(String),
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    #[error("provider stream failed: {0}")]
    Stream(String),
    #[error("local model process failed: {0}")]
    Process(String),
    #[error("provider call timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Transport(format!("request timed out: {error}"));
        }
        Self::Transport(error.to_string())
    }
}
