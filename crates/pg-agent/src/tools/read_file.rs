use pg_llm::ToolDefinition;
use serde_json::json;
use std::sync::Arc;

use super::{READ_FILE_TOOL, RegisteredTool, ToolOutput, required_string_argument};

pub(super) fn read_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: READ_FILE_TOOL.to_string(),
            description: "Read a file from the repository. Paths are relative to the repository root."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "description": "Repository-relative file path" }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(|args, context| {
            Box::pin(async move {
                let path = required_string_argument(&args, "path")?;
                let content = context.env.read_file(&path).await?;
                Ok(ToolOutput::text(content))
            })
        }),
    }
}
