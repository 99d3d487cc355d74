//! `pg.toml` loading: the user file under the platform config directory, overlaid by
//! the repository's `.pg/config.toml`.

use pg_agent::{AgentConfig, AgentMode, PatchBackendKind};
use pg_llm::{
    DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, DEFAULT_REQUEST_TIMEOUT_SECS, ProviderConfig,
};
use pg_session::STATE_DIR_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "pg";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_LOCAL_BINARY: &str = "llama-cli";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("write {path}: {message}")]
    Write { path: String, message: String },
    #[error("no provider configured (run 'pg setup')")]
    NoProvider,
    #[error("provider needs an api key: set {0} in the environment or .env")]
    MissingApiKey(String),
    #[error("local provider needs provider.model_path")]
    MissingModelPath,
    #[error("agent.max_iterations must be at least 1")]
    ZeroIterations,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Local,
}

/// Every field is optional so a repository file can override single keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Name of the environment variable holding the key, never the key itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<PatchBackendKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgConfig {
    pub provider: ProviderSection,
    pub agent: AgentSection,
    pub patch: PatchSection,
}

impl PgConfig {
    /// Configuration written by `pg setup`: an OpenAI-compatible endpoint, or a local
    /// model when `model_path` is given.
    pub fn starter(model_path: Option<PathBuf>) -> Self {
        let provider = match model_path {
            Some(model_path) => ProviderSection {
                kind: Some(ProviderKind::Local),
                binary: Some(PathBuf::from(DEFAULT_LOCAL_BINARY)),
                model_path: Some(model_path),
                request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
                ..ProviderSection::default()
            },
            None => ProviderSection {
                kind: Some(ProviderKind::OpenAi),
                base_url: Some(DEFAULT_OPENAI_BASE_URL.to_string()),
                model: Some(DEFAULT_OPENAI_MODEL.to_string()),
                api_key_env: Some(DEFAULT_API_KEY_ENV.to_string()),
                request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
                ..ProviderSection::default()
            },
        };
        Self {
            provider,
            agent: AgentSection {
                max_iterations: Some(AgentConfig::default().max_iterations),
            },
            patch: PatchSection {
                backend: Some(PatchBackendKind::default()),
            },
        }
    }

    /// Keys set in `other` replace ours.
    pub fn overlay(self, other: PgConfig) -> Self {
        let (base, top) = (self.provider, other.provider);
        Self {
            provider: ProviderSection {
                kind: top.kind.or(base.kind),
                base_url: top.base_url.or(base.base_url),
                model: top.model.or(base.model),
                api_key_env: top.api_key_env.or(base.api_key_env),
                model_path: top.model_path.or(base.model_path),
                binary: top.binary.or(base.binary),
                request_timeout_secs: top.request_timeout_secs.or(base.request_timeout_secs),
            },
            agent: AgentSection {
                max_iterations: other.agent.max_iterations.or(self.agent.max_iterations),
            },
            patch: PatchSection {
                backend: other.patch.backend.or(self.patch.backend),
            },
        }
    }

    /// `lookup` resolves environment variables; the binary passes `std::env::var`.
    pub fn provider_config<F>(&self, lookup: F) -> Result<ProviderConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &self.provider;
        let timeout = section
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        match section.kind.ok_or(ConfigError::NoProvider)? {
            ProviderKind::OpenAi => {
                let key_env = section
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
                let api_key = lookup(&key_env)
                    .filter(|key| !key.trim().is_empty())
                    .ok_or(ConfigError::MissingApiKey(key_env))?;
                Ok(ProviderConfig::OpenAi {
                    base_url: section
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                    model: section
                        .model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    api_key,
                    request_timeout_secs: timeout,
                })
            }
            ProviderKind::Local => Ok(ProviderConfig::Local {
                binary: section
                    .binary
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_BINARY)),
                model_path: section
                    .model_path
                    .clone()
                    .ok_or(ConfigError::MissingModelPath)?,
                timeout_secs: timeout,
            }),
        }
    }

    pub fn agent_config(&self, mode: AgentMode) -> Result<AgentConfig, ConfigError> {
        let mut config = AgentConfig::with_mode(mode);
        if let Some(max_iterations) = self.agent.max_iterations {
            if max_iterations == 0 {
                return Err(ConfigError::ZeroIterations);
            }
            config.max_iterations = max_iterations;
        }
        Ok(config)
    }

    pub fn patch_backend(&self) -> PatchBackendKind {
        self.patch.backend.unwrap_or_default()
    }
}

/// `<config_dir>/pg/config.toml`, when the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Missing files contribute nothing.
pub fn load_file(path: &Path) -> Result<PgConfig, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PgConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    toml::from_str(&raw).map_err(|error| ConfigError::Parse {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub fn load(user_path: Option<&Path>, repo_root: &Path) -> Result<PgConfig, ConfigError> {
    let user = match user_path {
        Some(path) => load_file(path)?,
        None => PgConfig::default(),
    };
    let repo = load_file(&repo_config_path(repo_root))?;
    tracing::debug!(user = ?user_path, "configuration loaded");
    Ok(user.overlay(repo))
}

pub fn write_file(path: &Path, config: &PgConfig) -> Result<(), ConfigError> {
    let write_error = |message: String| ConfigError::Write {
        path: path.display().to_string(),
        message,
    };
    let mut raw = toml::to_string_pretty(config).map_err(|error| write_error(error.to_string()))?;
    raw.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| write_error(error.to_string()))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, raw).map_err(|error| write_error(error.to_string()))?;
    fs::rename(&tmp, path).map_err(|error| write_error(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_files_returns_default() {
        let dir = tempdir().expect("tempdir should be created");
        let config = load(Some(&dir.path().join("absent.toml")), dir.path()).expect("load");
        assert_eq!(config, PgConfig::default());
        assert!(matches!(
            config.provider_config(|_| None),
            Err(ConfigError::NoProvider)
        ));
    }

    #[test]
    fn repository_file_overrides_single_keys() {
        let dir = tempdir().expect("tempdir should be created");
        let user = dir.path().join("user.toml");
        write_file(&user, &PgConfig::starter(None)).expect("write user config");
        fs::create_dir_all(dir.path().join(".pg")).expect("mkdir");
        fs::write(
            repo_config_path(dir.path()),
            "[provider]\nmodel = \"repo-model\"\n\n[agent]\nmax_iterations = 4\n\n[patch]\nbackend = \"builtin\"\n",
        )
        .expect("write repo config");

        let config = load(Some(&user), dir.path()).expect("load");
        assert_eq!(config.patch_backend(), PatchBackendKind::Builtin);
        assert_eq!(
            config
                .agent_config(AgentMode::Command)
                .expect("agent config")
                .max_iterations,
            4
        );
        let provider = config
            .provider_config(|name| (name == "OPENAI_API_KEY").then(|| "sk-test".to_string()))
            .expect("provider config");
        assert_eq!(
            provider,
            ProviderConfig::OpenAi {
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                model: "repo-model".to_string(),
                api_key: "sk-test".to_string(),
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            }
        );
    }

    #[test]
    fn missing_api_key_names_the_variable() {
        let mut config = PgConfig::starter(None);
        config.provider.api_key_env = Some("PG_TEST_KEY".to_string());
        let error = config.provider_config(|_| None).expect_err("no key");
        assert_eq!(
            error.to_string(),
            "provider needs an api key: set PG_TEST_KEY in the environment or .env"
        );
    }

    #[test]
    fn local_starter_builds_local_provider_config() {
        let config = PgConfig::starter(Some(PathBuf::from("/models/coder.gguf")));
        assert_eq!(
            config.provider_config(|_| None).expect("local config"),
            ProviderConfig::Local {
                binary: PathBuf::from("llama-cli"),
                model_path: PathBuf::from("/models/coder.gguf"),
                timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            }
        );
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let mut config = PgConfig::default();
        config.agent.max_iterations = Some(0);
        assert!(matches!(
            config.agent_config(AgentMode::Interactive),
            Err(ConfigError::ZeroIterations)
        ));
    }
}
