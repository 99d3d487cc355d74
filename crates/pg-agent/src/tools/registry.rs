use super::{ToolContext, ToolOutput};
use crate::{ToolError, validate_tool_call};
use pg_llm::{ToolCall, ToolDefinition};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Map<String, Value>, ToolContext) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.definition.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Validates the call's shape, then runs the matching executor.
    pub async fn dispatch(
        &self,
        tool_call: &ToolCall,
        context: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        validate_tool_call(&tool_call.name, &tool_call.arguments)?;
        let tool = self
            .get(&tool_call.name)
            .ok_or_else(|| ToolError::UnknownTool(tool_call.name.clone()))?;
        tracing::debug!(tool = %tool_call.name, call_id = %tool_call.id, "dispatching tool call");
        (tool.executor)(tool_call.arguments.clone(), context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoApprove, LocalExecutionEnvironment};
    use serde_json::json;
    use tempfile::tempdir;

    fn context(root: &std::path::Path) -> ToolContext {
        ToolContext::new(
            Arc::new(LocalExecutionEnvironment::new(root)),
            Arc::new(AutoApprove),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dispatch_validates_before_executing() {
        let dir = tempdir().expect("tempdir should be created");
        let registry = super::super::build_default_registry();

        let unknown = ToolCall::new("c1", "write_file", Map::new());
        assert!(matches!(
            registry.dispatch(&unknown, context(dir.path())).await,
            Err(ToolError::UnknownTool(name)) if name == "write_file"
        ));

        let missing = ToolCall::new("c2", "read_file", Map::new());
        assert!(matches!(
            registry.dispatch(&missing, context(dir.path())).await,
            Err(ToolError::MissingArgument { argument, .. }) if argument == "path"
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dispatch_runs_read_file() {
        let dir = tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("hello.txt"), "hi\n").expect("write");
        let registry = super::super::build_default_registry();
        let mut arguments = Map::new();
        arguments.insert("path".to_string(), json!("hello.txt"));

        let output = registry
            .dispatch(&ToolCall::new("c1", "read_file", arguments), context(dir.path()))
            .await
            .expect("read succeeds");
        assert_eq!(output, ToolOutput::text("hi\n"));
    }
}
