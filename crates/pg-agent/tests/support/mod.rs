#![allow(dead_code)]

use async_trait::async_trait;
use pg_agent::{AgentLoop, AutoApprove, CommandApprover, LocalExecutionEnvironment, ToolContext};
use pg_llm::{
    FinishReason, FragmentStream, Provider, ProviderError, Request, Response, StreamFragment,
    ToolCall,
};
use pg_session::{Session, SessionPersistence, SessionResult};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One scripted provider turn.
pub enum Scripted {
    Complete(Response),
    Fragments(Vec<Result<StreamFragment, ProviderError>>),
}

/// Replays scripted turns in order and records every request it receives.
pub struct SequenceProvider {
    turns: Mutex<VecDeque<Scripted>>,
    requests: Arc<Mutex<Vec<Request>>>,
    native_tools: bool,
}

impl SequenceProvider {
    pub fn new(turns: Vec<Scripted>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            native_tools: true,
        }
    }

    pub fn responses(responses: Vec<Response>) -> Self {
        Self::new(responses.into_iter().map(Scripted::Complete).collect())
    }

    pub fn without_native_tools(mut self) -> Self {
        self.native_tools = false;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests mutex").clone()
    }

    fn next_turn(&self, request: Request) -> Result<Scripted, ProviderError> {
        self.requests.lock().expect("requests mutex").push(request);
        self.turns
            .lock()
            .expect("turns mutex")
            .pop_front()
            .ok_or_else(|| ProviderError::Configuration("script exhausted".to_string()))
    }
}

#[async_trait]
impl Provider for SequenceProvider {
    fn name(&self) -> &str {
        "sequence"
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        match self.next_turn(request)? {
            Scripted::Complete(response) => Ok(response),
            Scripted::Fragments(_) => Err(ProviderError::Configuration(
                "scripted a stream, got complete()".to_string(),
            )),
        }
    }

    async fn stream(&self, request: Request) -> Result<FragmentStream, ProviderError> {
        match self.next_turn(request)? {
            Scripted::Fragments(fragments) => Ok(Box::pin(futures::stream::iter(fragments))),
            Scripted::Complete(_) => Err(ProviderError::Configuration(
                "scripted a response, got stream()".to_string(),
            )),
        }
    }
}

/// Counts persist calls and keeps the last persisted state.
#[derive(Default)]
pub struct RecordingPersistence {
    saved: Mutex<Vec<Session>>,
}

impl RecordingPersistence {
    pub fn count(&self) -> usize {
        self.saved.lock().expect("saved mutex").len()
    }

    pub fn last(&self) -> Option<Session> {
        self.saved.lock().expect("saved mutex").last().cloned()
    }
}

impl SessionPersistence for RecordingPersistence {
    fn persist(&self, session: &Session) -> SessionResult<()> {
        self.saved.lock().expect("saved mutex").push(session.clone());
        Ok(())
    }
}

pub fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect()
}

pub fn tool_call_response(calls: Vec<ToolCall>) -> Response {
    Response {
        content: String::new(),
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
    }
}

pub fn session_for(repo: &Path) -> Session {
    Session::new("pg-1", repo.to_path_buf(), "test goal").expect("session should be valid")
}

pub fn agent(
    provider: Arc<SequenceProvider>,
    repo: &Path,
    persistence: Arc<RecordingPersistence>,
) -> AgentLoop {
    agent_with_approver(provider, repo, persistence, Arc::new(AutoApprove))
}

pub fn agent_with_approver(
    provider: Arc<SequenceProvider>,
    repo: &Path,
    persistence: Arc<RecordingPersistence>,
    approver: Arc<dyn CommandApprover>,
) -> AgentLoop {
    let context = ToolContext::new(Arc::new(LocalExecutionEnvironment::new(repo)), approver);
    AgentLoop::new(provider, context, persistence)
}
