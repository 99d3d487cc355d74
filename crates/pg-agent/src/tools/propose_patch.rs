use crate::validate_patch;
use pg_llm::ToolDefinition;
use pg_session::Patch;
use serde_json::json;
use std::sync::Arc;

use super::{PROPOSE_PATCH_TOOL, RegisteredTool, ToolOutput, required_string_argument};

pub(super) fn propose_patch_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: PROPOSE_PATCH_TOOL.to_string(),
            description: "Propose a change to one file as a unified diff. The diff is checked against the current file and queued for operator review; nothing is written."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["file_path", "unified_diff"],
                "properties": {
                    "file_path": { "type": "string", "description": "Repository-relative path of the file to change" },
                    "unified_diff": { "type": "string", "description": "Unified diff with ---/+++ headers and @@ hunks" }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(|args, context| {
            Box::pin(async move {
                let file_path = required_string_argument(&args, "file_path")?;
                let unified_diff = required_string_argument(&args, "unified_diff")?;
                let patch = Patch::new(file_path, unified_diff);
                validate_patch(context.env.working_directory(), &patch)?;
                Ok(ToolOutput {
                    text: format!(
                        "Patch proposed for {}. Review with 'pg review' and apply with 'pg apply'.",
                        patch.file_path
                    ),
                    proposed_patch: Some(patch),
                })
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::{DenyAll, LocalExecutionEnvironment, ToolContext, ToolError, ValidationError};
    use pg_llm::ToolCall;
    use serde_json::{Map, json};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn call(file_path: &str, diff: &str) -> ToolCall {
        let mut arguments = Map::new();
        arguments.insert("file_path".to_string(), json!(file_path));
        arguments.insert("unified_diff".to_string(), json!(diff));
        ToolCall::new("c1", "propose_patch", arguments)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn valid_diff_is_returned_for_queueing_without_touching_the_file() {
        let dir = tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        let context = ToolContext::new(
            Arc::new(LocalExecutionEnvironment::new(dir.path())),
            Arc::new(DenyAll),
        );
        let diff = "--- a.txt\n+++ a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";

        let output = crate::build_default_registry()
            .dispatch(&call("a.txt", diff), context)
            .await
            .expect("valid patch");
        let patch = output.proposed_patch.expect("patch queued");
        assert_eq!(patch.file_path, "a.txt");
        assert_eq!(patch.unified_diff, diff);
        assert!(output.text.starts_with("Patch proposed for a.txt."));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).expect("file"),
            "one\ntwo\n"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stale_diff_is_rejected() {
        let dir = tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("a.txt"), "one\nchanged\n").expect("write");
        let context = ToolContext::new(
            Arc::new(LocalExecutionEnvironment::new(dir.path())),
            Arc::new(DenyAll),
        );
        let diff = "--- a.txt\n+++ a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";

        let error = crate::build_default_registry()
            .dispatch(&call("a.txt", diff), context)
            .await
            .expect_err("stale context");
        assert!(matches!(
            error,
            ToolError::InvalidPatch(ValidationError::ContextMismatch { line: 2, .. })
        ));
    }
}
