use serde::{Deserialize, Serialize};

/// Which instructions the model gets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// One-shot `pg ask` requests.
    #[default]
    Command,
    /// The conversational `pg agent` session.
    Interactive,
}

/// Runtime configuration for one agent loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub mode: AgentMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            mode: AgentMode::Command,
        }
    }
}

impl AgentConfig {
    pub fn with_mode(mode: AgentMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}
