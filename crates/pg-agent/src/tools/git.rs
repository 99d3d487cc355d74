use crate::ToolError;
use pg_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

use super::{GIT_DIFF_TOOL, GIT_STATUS_TOOL, RegisteredTool, ToolContext, ToolOutput};

pub(super) fn git_status_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: GIT_STATUS_TOOL.to_string(),
            description: "Show the working tree status (git status).".to_string(),
            parameters: no_arguments(),
        },
        executor: Arc::new(|_args, context| {
            Box::pin(async move {
                let output = run_git(&context, "status").await?;
                Ok(ToolOutput::text(output.trim()))
            })
        }),
    }
}

pub(super) fn git_diff_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: GIT_DIFF_TOOL.to_string(),
            description: "Show uncommitted changes in the working tree (git diff).".to_string(),
            parameters: no_arguments(),
        },
        executor: Arc::new(|_args, context| {
            Box::pin(async move {
                let output = run_git(&context, "diff").await?;
                Ok(ToolOutput::text(output))
            })
        }),
    }
}

fn no_arguments() -> serde_json::Value {
    json!({
        "type": "object",
        "required": [],
        "properties": {},
        "additionalProperties": false
    })
}

async fn run_git(context: &ToolContext, subcommand: &str) -> Result<String, ToolError> {
    let result = context.env.exec_command("git", &[subcommand]).await?;
    if !result.success() {
        return Err(ToolError::Execution(format!(
            "git {subcommand} failed (exit {})\nOutput: {}",
            result.exit_code,
            result.combined_output()
        )));
    }
    Ok(result.combined_output())
}
