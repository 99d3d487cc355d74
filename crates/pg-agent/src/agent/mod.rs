//! The tool-use loop: provider turn, tool dispatch, checkpoint, repeat.

mod stream;

use crate::prompts::{seed_user_message, system_prompt};
use crate::{
    AgentConfig, AgentError, AgentEvent, EventEmitter, NoopEventEmitter, ToolContext,
    ToolRegistry, build_default_registry, parse_tool_calls,
};
use pg_llm::{Message, Provider, Request, Response, ToolCall};
use pg_session::{Session, SessionPersistence, ToolCallRecord};
use std::sync::Arc;
use uuid::Uuid;

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    config: AgentConfig,
    context: ToolContext,
    persistence: Arc<dyn SessionPersistence>,
    emitter: Arc<dyn EventEmitter>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnMode {
    Complete,
    Streaming,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        context: ToolContext,
        persistence: Arc<dyn SessionPersistence>,
    ) -> Self {
        Self {
            provider,
            tools: build_default_registry(),
            config: AgentConfig::default(),
            context,
            persistence,
            emitter: Arc::new(NoopEventEmitter),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Runs one request to completion and returns the model's final text. Proposed
    /// patches land on `session.pending_patches()`; the session is persisted after
    /// every tool round.
    pub async fn run(&self, session: &mut Session, input: &str) -> Result<String, AgentError> {
        self.drive(session, input, TurnMode::Complete).await
    }

    /// [`AgentLoop::run`] over streamed turns. Text deltas are emitted as
    /// [`AgentEvent::TextDelta`] while they arrive.
    pub async fn run_streaming(
        &self,
        session: &mut Session,
        input: &str,
    ) -> Result<String, AgentError> {
        self.drive(session, input, TurnMode::Streaming).await
    }

    async fn drive(
        &self,
        session: &mut Session,
        input: &str,
        mode: TurnMode,
    ) -> Result<String, AgentError> {
        if self.config.max_iterations == 0 {
            return Err(AgentError::InvalidConfiguration(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let max = self.config.max_iterations;
        let mut messages = vec![
            Message::system(system_prompt(self.config.mode)),
            Message::user(seed_user_message(session, input)),
        ];

        for iteration in 1..=max {
            tracing::debug!(iteration, max, session = session.id(), "agent iteration");
            self.emitter
                .emit(AgentEvent::IterationStarted { iteration, max })?;

            let request = Request {
                messages: messages.clone(),
                tools: self.tools.definitions(),
            };
            let response = match mode {
                TurnMode::Complete => self.provider.complete(request).await?,
                TurnMode::Streaming => self.stream_turn(request).await?,
            };

            let native = self.provider.supports_native_tools();
            let calls = self.requested_tool_calls(&response, iteration);
            if calls.is_empty() || (native && response.finish_reason.is_terminal()) {
                tracing::debug!(
                    iteration,
                    finish_reason = %response.finish_reason,
                    "agent finished"
                );
                self.emitter.emit(AgentEvent::Finished)?;
                return Ok(response.content);
            }

            messages.push(if native {
                Message::assistant_with_tool_calls(response.content.clone(), calls.clone())
            } else {
                Message::assistant(response.content.clone())
            });
            self.execute_tool_calls(session, &mut messages, calls)
                .await?;
            self.persistence.persist(session)?;
        }

        tracing::warn!(max, session = session.id(), "agent hit its iteration limit");
        Err(AgentError::IterationLimitExceeded { max })
    }

    /// Native calls as returned, or calls recovered from the text for providers
    /// without structured tool calling.
    fn requested_tool_calls(&self, response: &Response, iteration: usize) -> Vec<ToolCall> {
        if self.provider.supports_native_tools() {
            // Some OpenAI-compatible servers omit call ids; tool messages still need one.
            return response
                .tool_calls
                .iter()
                .cloned()
                .map(|mut call| {
                    if call.id.trim().is_empty() {
                        call.id = format!("call_{}", Uuid::new_v4().simple());
                    }
                    call
                })
                .collect();
        }
        parse_tool_calls(&response.content)
            .into_iter()
            .enumerate()
            .map(|(index, parsed)| {
                ToolCall::new(format!("call_{iteration}_{index}"), parsed.tool, parsed.args)
            })
            .collect()
    }

    /// Sequential, in received order. A failing call becomes an `Error: ...` tool
    /// message and the remaining calls still run.
    async fn execute_tool_calls(
        &self,
        session: &mut Session,
        messages: &mut Vec<Message>,
        calls: Vec<ToolCall>,
    ) -> Result<(), AgentError> {
        for call in calls {
            self.emitter.emit(AgentEvent::ToolCallStarted {
                name: call.name.clone(),
            })?;
            tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool call");

            let (content, is_error) = match self.tools.dispatch(&call, self.context.clone()).await
            {
                Ok(output) => {
                    if let Some(patch) = output.proposed_patch {
                        self.emitter.emit(AgentEvent::PatchProposed {
                            file_path: patch.file_path.clone(),
                        })?;
                        session.push_patch(patch);
                    }
                    session.record_tool_call(ToolCallRecord::success(
                        call.name.clone(),
                        call.arguments.clone(),
                        output.text.clone(),
                    ));
                    (output.text, false)
                }
                Err(error) => {
                    tracing::warn!(tool = %call.name, %error, "tool call failed");
                    session.record_tool_call(ToolCallRecord::failure(
                        call.name.clone(),
                        call.arguments.clone(),
                        error.to_string(),
                    ));
                    (format!("Error: {error}"), true)
                }
            };

            self.emitter.emit(AgentEvent::ToolCallFinished {
                name: call.name.clone(),
                is_error,
            })?;
            messages.push(Message::tool(call.name, Some(call.id), content));
        }
        Ok(())
    }
}
