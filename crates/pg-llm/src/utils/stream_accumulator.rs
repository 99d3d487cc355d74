//! Builds a [`Response`] out of a fragment sequence.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::errors::ProviderError;
use crate::stream::{StreamFragment, ToolCallFragment};
use crate::types::{FinishReason, Response, ToolCall};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Fragments for different calls may interleave; each call is keyed by its index and
/// only decoded once [`StreamAccumulator::finish`] runs.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, fragment: &StreamFragment) {
        match fragment {
            StreamFragment::TextDelta(delta) => self.text.push_str(delta),
            StreamFragment::ToolCall(fragment) => self.upsert_tool_call(fragment),
            StreamFragment::Finish(reason) => self.finish_reason = Some(reason.clone()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> Result<Response, ProviderError> {
        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for (index, partial) in self.tool_calls {
            let name = partial.name.filter(|name| !name.is_empty()).ok_or_else(|| {
                ProviderError::Stream(format!("tool call at index {index} has no name"))
            })?;
            let arguments = decode_arguments(&name, &partial.arguments)?;
            let id = partial.id.unwrap_or_else(|| format!("call_{index}"));
            tool_calls.push(ToolCall::new(id, name, arguments));
        }

        let finish_reason = match self.finish_reason {
            Some(reason) => reason,
            None if !tool_calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };

        Ok(Response {
            content: self.text,
            tool_calls,
            finish_reason,
        })
    }

    fn upsert_tool_call(&mut self, fragment: &ToolCallFragment) {
        let entry = self.tool_calls.entry(fragment.index).or_default();
        if let Some(id) = &fragment.id {
            entry.id = Some(id.clone());
        }
        if let Some(name) = &fragment.name {
            entry.name = Some(name.clone());
        }
        entry.arguments.push_str(&fragment.arguments_delta);
    }
}

pub(crate) fn decode_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::Decode(format!(
            "arguments for tool '{tool}' must be a JSON object, got {other}"
        ))),
        Err(error) => Err(ProviderError::Decode(format!(
            "invalid JSON arguments for tool '{tool}': {error}"
        ))),
    }
}
