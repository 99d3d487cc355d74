use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::provider::Provider;
use crate::stream::{FragmentStream, StreamFragment};
use crate::types::{FinishReason, Request, Response, Role};

#[derive(Clone, Debug, PartialEq)]
pub struct LocalProviderOptions {
    pub binary: PathBuf,
    pub model_path: PathBuf,
    pub context_size: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub threads: u32,
    pub timeout: Duration,
}

impl Default for LocalProviderOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("llama-cli"),
            model_path: PathBuf::new(),
            context_size: 4096,
            max_tokens: 2048,
            temperature: 0.1,
            threads: 4,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Runs a GGUF model through the `llama-cli` binary. The model has no structured
/// tool-call channel, so tool requests come back as plain text.
pub struct LocalProvider {
    options: LocalProviderOptions,
}

impl LocalProvider {
    pub fn new(options: LocalProviderOptions) -> Self {
        Self { options }
    }

    fn command(&self, prompt: &str) -> Command {
        let options = &self.options;
        let mut command = Command::new(&options.binary);
        command
            .arg("--model")
            .arg(&options.model_path)
            .arg("--prompt")
            .arg(prompt)
            .arg("--ctx-size")
            .arg(options.context_size.to_string())
            .arg("--n-predict")
            .arg(options.max_tokens.to_string())
            .arg("--temp")
            .arg(options.temperature.to_string())
            .arg("--top-k")
            .arg("40")
            .arg("--top-p")
            .arg("0.9")
            .arg("--threads")
            .arg(options.threads.to_string())
            .arg("--no-display-prompt")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, error: std::io::Error) -> ProviderError {
        ProviderError::Process(format!(
            "failed to start '{}': {error}",
            self.options.binary.display()
        ))
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn supports_native_tools(&self) -> bool {
        false
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let prompt = render_prompt(&request);
        debug!(prompt_bytes = prompt.len(), "running local model");

        let mut command = self.command(&prompt);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = command.spawn().map_err(|error| self.spawn_error(error))?;

        let output = tokio::time::timeout(self.options.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(self.options.timeout.as_secs()))?
            .map_err(|error| ProviderError::Process(error.to_string()))?;

        if !output.status.success() {
            return Err(ProviderError::Process(format!(
                "llama-cli exited with {}\nStderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(Response::text(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    async fn stream(&self, request: Request) -> Result<FragmentStream, ProviderError> {
        let prompt = render_prompt(&request);
        let mut command = self.command(&prompt);
        command.stdout(Stdio::piped()).stderr(Stdio::null());
        let mut child = command.spawn().map_err(|error| self.spawn_error(error))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Process("llama-cli stdout was not captured".to_string()))?;

        let state = ProcessStream {
            child,
            stdout,
            pending: Vec::new(),
            deadline: Instant::now() + self.options.timeout,
            timeout_secs: self.options.timeout.as_secs(),
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, ProcessStream::next)))
    }
}

struct ProcessStream {
    child: Child,
    stdout: ChildStdout,
    pending: Vec<u8>,
    deadline: Instant,
    timeout_secs: u64,
    finished: bool,
}

impl ProcessStream {
    async fn next(mut self) -> Option<(Result<StreamFragment, ProviderError>, Self)> {
        if self.finished {
            return None;
        }

        let mut buf = [0u8; 1024];
        loop {
            let read = tokio::time::timeout_at(self.deadline, self.stdout.read(&mut buf)).await;
            match read {
                Err(_) => {
                    self.finished = true;
                    if let Err(error) = self.child.start_kill() {
                        warn!(%error, "failed to kill timed-out llama-cli");
                    }
                    let error = ProviderError::Timeout(self.timeout_secs);
                    return Some((Err(error), self));
                }
                Ok(Err(error)) => {
                    self.finished = true;
                    return Some((Err(ProviderError::Process(error.to_string())), self));
                }
                Ok(Ok(0)) => {
                    self.finished = true;
                    let status = self.child.wait().await;
                    return match status {
                        Ok(status) if status.success() => {
                            Some((Ok(StreamFragment::Finish(FinishReason::Stop)), self))
                        }
                        Ok(status) => Some((
                            Err(ProviderError::Process(format!("llama-cli exited with {status}"))),
                            self,
                        )),
                        Err(error) => Some((Err(ProviderError::Process(error.to_string())), self)),
                    };
                }
                Ok(Ok(count)) => {
                    self.pending.extend_from_slice(&buf[..count]);
                    let text = take_utf8_prefix(&mut self.pending);
                    if !text.is_empty() {
                        return Some((Ok(StreamFragment::TextDelta(text)), self));
                    }
                }
            }
        }
    }
}

/// Removes and returns the longest valid UTF-8 prefix, keeping a split code point
/// buffered for the next read.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(text) => text.len(),
        Err(error) if error.error_len().is_none() => error.valid_up_to(),
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            return text;
        }
    };
    let bytes: Vec<u8> = pending.drain(..valid).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub(crate) fn render_prompt(request: &Request) -> String {
    let mut prompt = String::from("You are a coding assistant. You can use tools by outputting JSON.\n\n");

    if !request.tools.is_empty() {
        prompt.push_str("Available tools:\n");
        for tool in &request.tools {
            let _ = writeln!(prompt, "- {}: {}", tool.name, tool.description);
        }
        prompt.push_str("\nTo use a tool, output JSON in this format:\n");
        prompt.push_str("{\"tool\": \"tool_name\", \"args\": {\"param\": \"value\"}}\n\n");
    }

    for message in &request.messages {
        let _ = match message.role {
            Role::System => write!(prompt, "System: {}\n\n", message.content),
            Role::User => write!(prompt, "User: {}\n\n", message.content),
            Role::Assistant => write!(prompt, "Assistant: {}\n\n", message.content),
            Role::Tool => write!(
                prompt,
                "Tool Result ({}): {}\n\n",
                message.name.as_deref().unwrap_or("tool"),
                message.content
            ),
        };
    }

    prompt.push_str("Assistant: ");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolDefinition};
    use serde_json::json;

    #[test]
    fn render_prompt_lists_tools_and_labels_turns() {
        let request = Request {
            messages: vec![
                Message::system("be careful"),
                Message::user("what changed?"),
                Message::tool("git_diff", None, "diff --git a b"),
            ],
            tools: vec![ToolDefinition {
                name: "git_diff".to_string(),
                description: "Show the working tree diff".to_string(),
                parameters: json!({"type": "object"}),
            }],
        };

        let prompt = render_prompt(&request);
        assert!(prompt.contains("- git_diff: Show the working tree diff\n"));
        assert!(prompt.contains("System: be careful\n\n"));
        assert!(prompt.contains("User: what changed?\n\n"));
        assert!(prompt.contains("Tool Result (git_diff): diff --git a b\n\n"));
        assert!(prompt.ends_with("Assistant: "));
    }

    #[test]
    fn utf8_prefix_keeps_split_code_point_buffered() {
        let snowman = "\u{2603}".as_bytes();
        let mut pending = vec![b'o', b'k', snowman[0], snowman[1]];
        assert_eq!(take_utf8_prefix(&mut pending), "ok");
        assert_eq!(pending.len(), 2);

        pending.push(snowman[2]);
        assert_eq!(take_utf8_prefix(&mut pending), "\u{2603}");
        assert!(pending.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_binary_is_a_process_error() {
        let provider = LocalProvider::new(LocalProviderOptions {
            binary: PathBuf::from("/nonexistent/llama-cli-for-tests"),
            model_path: PathBuf::from("model.gguf"),
            ..LocalProviderOptions::default()
        });
        let error = provider
            .complete(Request {
                messages: vec![Message::user("hi")],
                tools: Vec::new(),
            })
            .await
            .expect_err("spawn should fail");
        assert!(matches!(error, ProviderError::Process(_)));
    }
}
