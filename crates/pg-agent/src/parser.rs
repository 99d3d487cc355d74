//! Recovers tool calls from plain model text for providers without native tool calling.
//!
//! Strategies run in order and the first one that yields calls wins:
//! one JSON object per line, then JSON inside fenced code blocks, then a keyword
//! heuristic over the prose.

use crate::ToolError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedToolCall {
    pub tool: String,
    pub args: Map<String, Value>,
}

impl ParsedToolCall {
    fn without_args(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            args: Map::new(),
        }
    }
}

/// Required arguments for every built-in tool.
pub const TOOL_REQUIREMENTS: &[(&str, &[&str])] = &[
    ("read_file", &["path"]),
    ("list_files", &["path"]),
    ("git_status", &[]),
    ("git_diff", &[]),
    ("run_command", &["command"]),
    ("propose_patch", &["file_path", "unified_diff"]),
];

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([^`]*)```").expect("fenced block pattern")
});

static READ_FILE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bread\s+(?:the\s+)?(?:file\s+)?([A-Za-z0-9_./\\-]+\.[A-Za-z0-9]+)")
        .expect("read mention pattern")
});

pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let direct = parse_json_lines(text);
    if !direct.is_empty() {
        return direct;
    }

    let fenced = parse_fenced_blocks(text);
    if !fenced.is_empty() {
        return fenced;
    }

    parse_heuristically(text)
}

/// Checks a call against [`TOOL_REQUIREMENTS`] before it is dispatched.
pub fn validate_tool_call(name: &str, args: &Map<String, Value>) -> Result<(), ToolError> {
    let Some((_, required)) = TOOL_REQUIREMENTS.iter().find(|(tool, _)| *tool == name) else {
        return Err(ToolError::UnknownTool(name.to_string()));
    };
    for argument in required.iter() {
        if !args.contains_key(*argument) {
            return Err(ToolError::MissingArgument {
                tool: name.to_string(),
                argument: (*argument).to_string(),
            });
        }
    }
    Ok(())
}

fn parse_json_lines(text: &str) -> Vec<ParsedToolCall> {
    text.lines().filter_map(parse_call_object).collect()
}

fn parse_fenced_blocks(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    for captures in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = captures.get(1) else {
            continue;
        };
        match parse_call_object(body.as_str()) {
            Some(call) => calls.push(call),
            None => calls.extend(parse_json_lines(body.as_str())),
        }
    }
    calls
}

fn parse_heuristically(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let lowered = text.to_lowercase();

    if let Some(path) = READ_FILE_MENTION
        .captures(text)
        .and_then(|captures| captures.get(1))
    {
        let mut args = Map::new();
        args.insert("path".to_string(), Value::String(path.as_str().to_string()));
        calls.push(ParsedToolCall {
            tool: "read_file".to_string(),
            args,
        });
    }

    if lowered.contains("list") && lowered.contains("file") {
        let mut args = Map::new();
        args.insert("path".to_string(), Value::String(".".to_string()));
        calls.push(ParsedToolCall {
            tool: "list_files".to_string(),
            args,
        });
    }

    if lowered.contains("git") && lowered.contains("status") {
        calls.push(ParsedToolCall::without_args("git_status"));
    }

    if lowered.contains("git") && lowered.contains("diff") {
        calls.push(ParsedToolCall::without_args("git_diff"));
    }

    calls
}

/// `{"tool": "<name>", "args": {...}}` with `args` optional or null.
fn parse_call_object(raw: &str) -> Option<ParsedToolCall> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    let tool = object.get("tool")?.as_str()?.trim();
    if tool.is_empty() {
        return None;
    }
    let args = match object.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args.clone(),
        Some(_) => return None,
    };
    Some(ParsedToolCall {
        tool: tool.to_string(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_line_is_parsed_directly() {
        let calls = parse_tool_calls(r#"{"tool":"read_file","args":{"path":"main.go"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "read_file");
        assert_eq!(calls[0].args.get("path"), Some(&json!("main.go")));
    }

    #[test]
    fn json_lines_among_prose_are_all_collected() {
        let text = "Let me look around.\n{\"tool\":\"git_status\"}\n{\"tool\":\"list_files\",\"args\":{\"path\":\"src\"}}\nDone.";
        let calls = parse_tool_calls(text);
        let tools: Vec<&str> = calls.iter().map(|call| call.tool.as_str()).collect();
        assert_eq!(tools, vec!["git_status", "list_files"]);
        assert!(calls[0].args.is_empty());
    }

    #[test]
    fn fenced_block_is_parsed() {
        let text = "I'll list files:\n```json\n{\"tool\":\"list_files\",\"args\":{\"path\":\"src\"}}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "list_files");
        assert_eq!(calls[0].args.get("path"), Some(&json!("src")));
    }

    #[test]
    fn fenced_read_file_matches_the_direct_line() {
        let call = r#"{"tool":"read_file","args":{"path":"a.go"}}"#;
        let direct = parse_tool_calls(call);
        let fenced = parse_tool_calls(&format!("Reading it now.\n```json\n{call}\n```\n"));
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].tool, "read_file");
        assert_eq!(direct[0].args.get("path"), Some(&json!("a.go")));
        assert_eq!(fenced, direct);
    }

    #[test]
    fn multi_line_json_in_fence_is_parsed_as_one_object() {
        let text = "```\n{\n  \"tool\": \"read_file\",\n  \"args\": {\"path\": \"a.rs\"}\n}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args.get("path"), Some(&json!("a.rs")));
    }

    #[test]
    fn heuristic_checks_git_status_only() {
        let calls = parse_tool_calls("Please check git status");
        assert_eq!(calls, vec![ParsedToolCall::without_args("git_status")]);
    }

    #[test]
    fn heuristic_reads_named_file() {
        let calls = parse_tool_calls("I should read the file src/lib.rs first.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "read_file");
        assert_eq!(calls[0].args.get("path"), Some(&json!("src/lib.rs")));
    }

    #[test]
    fn plain_answer_yields_no_calls() {
        assert!(parse_tool_calls("Hello, how can I help?").is_empty());
    }

    #[test]
    fn malformed_objects_are_ignored() {
        assert!(parse_call_object(r#"{"tool":""}"#).is_none());
        assert!(parse_call_object(r#"{"tool":"git_diff","args":[1]}"#).is_none());
        assert!(parse_call_object(r#"{"name":"git_diff"}"#).is_none());
        assert!(parse_call_object("not json").is_none());
    }

    #[test]
    fn validation_rejects_unknown_tools_and_missing_arguments() {
        let mut args = Map::new();
        assert!(matches!(
            validate_tool_call("write_file", &args),
            Err(ToolError::UnknownTool(name)) if name == "write_file"
        ));
        assert!(validate_tool_call("git_status", &args).is_ok());

        args.insert("file_path".to_string(), json!("a.txt"));
        let error = validate_tool_call("propose_patch", &args).expect_err("missing diff");
        assert_eq!(
            error.to_string(),
            "missing required argument 'unified_diff' for tool 'propose_patch'"
        );
    }
}
