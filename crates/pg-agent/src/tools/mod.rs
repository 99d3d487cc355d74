mod git;
mod list_files;
mod propose_patch;
mod read_file;
mod registry;
mod run_command;

use crate::{CommandApprover, ExecutionEnvironment, ToolError};
use pg_session::Patch;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use registry::{RegisteredTool, ToolExecutor, ToolFuture, ToolRegistry};

pub const READ_FILE_TOOL: &str = "read_file";
pub const LIST_FILES_TOOL: &str = "list_files";
pub const GIT_STATUS_TOOL: &str = "git_status";
pub const GIT_DIFF_TOOL: &str = "git_diff";
pub const RUN_COMMAND_TOOL: &str = "run_command";
pub const PROPOSE_PATCH_TOOL: &str = "propose_patch";

/// What a tool hands back to the loop: text for the model, and for
/// `propose_patch` the validated patch to queue on the session.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub proposed_patch: Option<Patch>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            proposed_patch: None,
        }
    }
}

/// Capabilities shared by every tool invocation in one loop.
#[derive(Clone)]
pub struct ToolContext {
    pub env: Arc<dyn ExecutionEnvironment>,
    pub approver: Arc<dyn CommandApprover>,
}

impl ToolContext {
    pub fn new(env: Arc<dyn ExecutionEnvironment>, approver: Arc<dyn CommandApprover>) -> Self {
        Self { env, approver }
    }
}

/// The fixed tool set offered to the model.
pub fn build_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(read_file::read_file_tool());
    registry.register(list_files::list_files_tool());
    registry.register(git::git_status_tool());
    registry.register(git::git_diff_tool());
    registry.register(run_command::run_command_tool());
    registry.register(propose_patch::propose_patch_tool());
    registry
}

fn required_string_argument(
    arguments: &Map<String, Value>,
    key: &str,
) -> Result<String, ToolError> {
    match arguments.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ToolError::InvalidArgument {
            argument: key.to_string(),
            message: "must be a string".to_string(),
        }),
        None => Err(ToolError::InvalidArgument {
            argument: key.to_string(),
            message: "is required".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_exposes_the_fixed_tool_set() {
        let registry = build_default_registry();
        assert_eq!(
            registry.names(),
            vec![
                GIT_DIFF_TOOL,
                GIT_STATUS_TOOL,
                LIST_FILES_TOOL,
                PROPOSE_PATCH_TOOL,
                READ_FILE_TOOL,
                RUN_COMMAND_TOOL,
            ]
        );
        for (name, required) in crate::TOOL_REQUIREMENTS {
            let definition = registry.get(name).expect("tool registered").definition.clone();
            let schema_required: Vec<&str> = definition.parameters["required"]
                .as_array()
                .expect("required list")
                .iter()
                .filter_map(Value::as_str)
                .collect();
            assert_eq!(schema_required.as_slice(), *required);
        }
    }

    #[test]
    fn string_arguments_must_be_strings() {
        let mut arguments = Map::new();
        arguments.insert("path".to_string(), json!(3));
        assert!(matches!(
            required_string_argument(&arguments, "path"),
            Err(ToolError::InvalidArgument { argument, .. }) if argument == "path"
        ));
    }
}
