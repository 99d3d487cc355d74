use crate::ToolError;
use pg_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

use super::{LIST_FILES_TOOL, RegisteredTool, ToolOutput, required_string_argument};

pub(super) fn list_files_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: LIST_FILES_TOOL.to_string(),
            description: "List the entries of a repository directory as JSON. Hidden entries are omitted."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "description": "Repository-relative directory, '.' for the root" }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(|args, context| {
            Box::pin(async move {
                let path = required_string_argument(&args, "path")?;
                let entries = context.env.list_directory(&path).await?;
                let rendered = serde_json::to_string_pretty(&entries)
                    .map_err(|error| ToolError::Execution(error.to_string()))?;
                Ok(ToolOutput::text(rendered))
            })
        }),
    }
}
