use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::ProviderError;
use crate::provider::Provider;
use crate::stream::{FragmentStream, StreamFragment, ToolCallFragment};
use crate::types::{FinishReason, Message, Request, Response, Role, ToolCall, ToolDefinition};
use crate::utils::sse::SseParser;
use crate::utils::stream_accumulator::decode_arguments;

/// Chat-completions provider for OpenAI and API-compatible servers.
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: String,
        model: String,
        api_key: String,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| ProviderError::Configuration(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
        })
    }

    fn wire_request<'a>(&'a self, request: &'a Request, stream: bool) -> OaiRequest<'a> {
        OaiRequest {
            model: &self.model,
            messages: request.messages.iter().map(OaiMessage::from_message).collect(),
            tools: request.tools.iter().map(OaiTool::from_definition).collect(),
            stream,
        }
    }

    async fn send(&self, body: &OaiRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        debug!(
            endpoint = %self.endpoint,
            messages = body.messages.len(),
            stream = body.stream,
            "sending chat completion request"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let body = self.wire_request(&request, false);
        let response = self.send(&body).await?;
        let raw = response.text().await?;
        let parsed: OaiResponse = serde_json::from_str(&raw)
            .map_err(|error| ProviderError::Decode(format!("{error}: {raw}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("no choices in response".to_string()))?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = decode_arguments(&call.function.name, &call.function.arguments)?;
            tool_calls.push(ToolCall::new(call.id, call.function.name, arguments));
        }

        let finish_reason = match choice.finish_reason.as_deref() {
            Some(raw) => FinishReason::from_raw(raw),
            None if tool_calls.is_empty() => FinishReason::Stop,
            None => FinishReason::ToolCalls,
        };

        Ok(Response {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason,
        })
    }

    async fn stream(&self, request: Request) -> Result<FragmentStream, ProviderError> {
        let body = self.wire_request(&request, true);
        let response = self.send(&body).await?;
        let state = SseState {
            body: Box::pin(response.bytes_stream()),
            pending: Vec::new(),
            parser: SseParser::new(),
            queued: VecDeque::new(),
            saw_finish: false,
            saw_tool_call: false,
            done: false,
            failure: None,
        };
        Ok(Box::pin(futures::stream::unfold(state, SseState::next)))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct SseState {
    body: ByteStream,
    pending: Vec<u8>,
    parser: SseParser,
    queued: VecDeque<StreamFragment>,
    saw_finish: bool,
    saw_tool_call: bool,
    done: bool,
    failure: Option<ProviderError>,
}

impl SseState {
    async fn next(mut self) -> Option<(Result<StreamFragment, ProviderError>, Self)> {
        loop {
            if let Some(fragment) = self.queued.pop_front() {
                return Some((Ok(fragment), self));
            }
            if self.done {
                return self.failure.take().map(|error| (Err(error), self));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend_from_slice(&chunk);
                    if let Err(error) = self.drain_complete_lines() {
                        self.fail(error);
                    }
                }
                Some(Err(error)) => self.fail(ProviderError::Stream(error.to_string())),
                None => {
                    self.done = true;
                    let parser = std::mem::take(&mut self.parser);
                    if let Some(event) = parser.finish() {
                        if event.is_done() {
                            self.close_without_finish();
                        } else if let Err(error) = self.decode_chunk(&event.data) {
                            self.fail(error);
                            continue;
                        }
                    }
                    if !self.saw_finish {
                        self.fail(ProviderError::Stream(
                            "stream ended before a finish marker".to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn fail(&mut self, error: ProviderError) {
        self.done = true;
        self.failure = Some(error);
    }

    fn drain_complete_lines(&mut self) -> Result<(), ProviderError> {
        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let text = String::from_utf8(complete)
            .map_err(|error| ProviderError::Stream(format!("stream is not UTF-8: {error}")))?;

        for event in self.parser.push(&text) {
            if event.is_done() {
                self.close_without_finish();
                self.done = true;
                break;
            }
            self.decode_chunk(&event.data)?;
        }
        Ok(())
    }

    fn close_without_finish(&mut self) {
        if self.saw_finish {
            return;
        }
        self.saw_finish = true;
        let reason = if self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        self.queued.push_back(StreamFragment::Finish(reason));
    }

    fn decode_chunk(&mut self, data: &str) -> Result<(), ProviderError> {
        let chunk: OaiStreamChunk = serde_json::from_str(data)
            .map_err(|error| ProviderError::Decode(format!("{error}: {data}")))?;

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|content| !content.is_empty()) {
                    self.queued.push_back(StreamFragment::TextDelta(content));
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    self.saw_tool_call = true;
                    let (name, arguments_delta) = match call.function {
                        Some(function) => (function.name, function.arguments.unwrap_or_default()),
                        None => (None, String::new()),
                    };
                    self.queued.push_back(StreamFragment::ToolCall(ToolCallFragment {
                        index: call.index,
                        id: call.id,
                        name,
                        arguments_delta,
                    }));
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.saw_finish = true;
                self.queued
                    .push_back(StreamFragment::Finish(FinishReason::from_raw(&reason)));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OaiToolCallOut<'a>>,
}

impl<'a> OaiMessage<'a> {
    fn from_message(message: &'a Message) -> Self {
        let content = if message.role == Role::Assistant
            && message.content.is_empty()
            && !message.tool_calls.is_empty()
        {
            None
        } else {
            Some(message.content.as_str())
        };
        Self {
            role: message.role.as_str(),
            content,
            name: message.name.as_deref(),
            tool_call_id: message.tool_call_id.as_deref(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| OaiToolCallOut {
                    id: &call.id,
                    kind: "function",
                    function: OaiFunctionCallOut {
                        name: &call.name,
                        arguments: Value::Object(call.arguments.clone()).to_string(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct OaiToolCallOut<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: OaiFunctionCallOut<'a>,
}

#[derive(Serialize)]
struct OaiFunctionCallOut<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OaiFunction<'a>,
}

impl<'a> OaiTool<'a> {
    fn from_definition(definition: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: OaiFunction {
                name: &definition.name,
                description: &definition.description,
                parameters: &definition.parameters,
            },
        }
    }
}

#[derive(Serialize)]
struct OaiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OaiToolCallIn>>,
}

#[derive(Deserialize)]
struct OaiToolCallIn {
    id: String,
    function: OaiFunctionCallIn,
}

#[derive(Deserialize)]
struct OaiFunctionCallIn {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
}

#[derive(Deserialize)]
struct OaiStreamChoice {
    delta: Option<OaiDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OaiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OaiDeltaToolCall>>,
}

#[derive(Deserialize)]
struct OaiDeltaToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<OaiDeltaFunction>,
}

#[derive(Deserialize)]
struct OaiDeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "http://localhost:1/v1/".to_string(),
            "test-model".to_string(),
            "key".to_string(),
            Duration::from_secs(1),
        )
        .expect("provider should build")
    }

    #[test]
    fn wire_request_encodes_tools_and_tool_messages() {
        let provider = provider();
        assert_eq!(provider.endpoint, "http://localhost:1/v1/chat/completions");

        let mut arguments = serde_json::Map::new();
        arguments.insert("path".to_string(), json!("a.rs"));
        let request = Request {
            messages: vec![
                Message::user("look"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("call-1", "read_file", arguments)],
                ),
                Message::tool("read_file", Some("call-1".to_string()), "fn main() {}"),
            ],
            tools: vec![ToolDefinition {
                name: "read_file".to_string(),
                description: "Read a file".to_string(),
                parameters: json!({"type": "object"}),
            }],
        };

        let wire = serde_json::to_value(provider.wire_request(&request, false))
            .expect("request should serialize");
        assert_eq!(wire["model"], "test-model");
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "read_file");
        assert!(wire["messages"][1]["content"].is_null());
        assert_eq!(
            wire["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"path\":\"a.rs\"}"
        );
        assert_eq!(wire["messages"][2]["tool_call_id"], "call-1");
        assert_eq!(wire["messages"][2]["name"], "read_file");
    }

    fn state_from(chunks: Vec<&'static str>) -> SseState {
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<Bytes, reqwest::Error>(Bytes::from_static(chunk.as_bytes()))),
        );
        SseState {
            body: Box::pin(body),
            pending: Vec::new(),
            parser: SseParser::new(),
            queued: VecDeque::new(),
            saw_finish: false,
            saw_tool_call: false,
            done: false,
            failure: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sse_stream_yields_text_tool_fragments_and_finish() {
        let state = state_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",",
            "\"function\":{\"name\":\"git_status\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\ndata: [DONE]\n\n",
        ]);
        let fragments: Vec<_> = futures::stream::unfold(state, SseState::next)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("stream should decode");

        assert_eq!(fragments[0], StreamFragment::TextDelta("Hi".to_string()));
        assert!(matches!(
            &fragments[1],
            StreamFragment::ToolCall(fragment) if fragment.name.as_deref() == Some("git_status")
        ));
        assert_eq!(
            fragments.last(),
            Some(&StreamFragment::Finish(FinishReason::ToolCalls))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sse_stream_without_finish_marker_is_an_error() {
        let state = state_from(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]);
        let items: Vec<_> = futures::stream::unfold(state, SseState::next).collect().await;
        assert!(matches!(items.first(), Some(Ok(StreamFragment::TextDelta(_)))));
        assert!(matches!(items.last(), Some(Err(ProviderError::Stream(_)))));
    }
}
