//! Provider capability contract and explicit construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::providers::{LocalProvider, LocalProviderOptions, OpenAiCompatibleProvider};
use crate::stream::FragmentStream;
use crate::types::{Request, Response};

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether tool calls come back as structured data. When false, callers must
    /// extract tool calls from the response text.
    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError>;

    async fn stream(&self, request: Request) -> Result<FragmentStream, ProviderError>;
}

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenAi {
        base_url: String,
        model: String,
        api_key: String,
        request_timeout_secs: u64,
    },
    Local {
        binary: PathBuf,
        model_path: PathBuf,
        timeout_secs: u64,
    },
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Local { .. } => "local",
        }
    }
}

pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::OpenAi {
            base_url,
            model,
            api_key,
            request_timeout_secs,
        } => {
            if api_key.trim().is_empty() {
                return Err(ProviderError::Configuration(
                    "openai provider requires an api key".to_string(),
                ));
            }
            let provider = OpenAiCompatibleProvider::new(
                base_url.clone(),
                model.clone(),
                api_key.clone(),
                Duration::from_secs(*request_timeout_secs),
            )?;
            Ok(Arc::new(provider))
        }
        ProviderConfig::Local {
            binary,
            model_path,
            timeout_secs,
        } => {
            if model_path.as_os_str().is_empty() {
                return Err(ProviderError::Configuration(
                    "local provider requires a model path".to_string(),
                ));
            }
            Ok(Arc::new(LocalProvider::new(LocalProviderOptions {
                binary: binary.clone(),
                model_path: model_path.clone(),
                timeout: Duration::from_secs(*timeout_secs),
                ..LocalProviderOptions::default()
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_provider_rejects_missing_credentials() {
        let config = ProviderConfig::OpenAi {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            api_key: "  ".to_string(),
            request_timeout_secs: 5,
        };
        let error = build_provider(&config).err().expect("empty key should be rejected");
        assert!(matches!(error, ProviderError::Configuration(_)));
    }

    #[test]
    fn build_provider_local_reports_no_native_tools() {
        let config = ProviderConfig::Local {
            binary: PathBuf::from("llama-cli"),
            model_path: PathBuf::from("/models/tiny.gguf"),
            timeout_secs: 10,
        };
        let provider = build_provider(&config).expect("local provider should build");
        assert_eq!(provider.name(), "local");
        assert!(!provider.supports_native_tools());
        assert_eq!(config.kind(), "local");
    }
}
