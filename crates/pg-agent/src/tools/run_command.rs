use crate::ToolError;
use pg_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

use super::{RUN_COMMAND_TOOL, RegisteredTool, ToolOutput, required_string_argument};

pub(super) fn run_command_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: RUN_COMMAND_TOOL.to_string(),
            description: "Run a shell command in the repository root. The operator must approve every command. Returns combined stdout and stderr."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["command"],
                "properties": {
                    "command": { "type": "string" }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(|args, context| {
            Box::pin(async move {
                let command = required_string_argument(&args, "command")?;
                if !context.approver.approve(&command).await {
                    tracing::info!(command = %command, "command rejected by operator");
                    return Err(ToolError::Rejected);
                }
                let result = context.env.exec_shell(&command).await?;
                let output = result.combined_output();
                if !result.success() {
                    return Err(ToolError::Execution(format!(
                        "command failed (exit {})\nOutput: {output}",
                        result.exit_code
                    )));
                }
                Ok(ToolOutput::text(output))
            })
        }),
    }
}
