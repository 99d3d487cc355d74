use crate::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

pub const NULL_DEVICE: &str = "/dev/null";

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<PatchHunk>,
}

impl ParsedDiff {
    pub fn is_creation(&self) -> bool {
        self.old_path.as_deref() == Some(NULL_DEVICE)
    }

    /// Strip level `patch -p` needs: 1 for git-style `a/` `b/` prefixes, else 0.
    pub fn strip_level(&self) -> u8 {
        let prefixed = |path: &Option<String>, prefix: &str| {
            path.as_deref().is_some_and(|path| path.starts_with(prefix))
        };
        if prefixed(&self.old_path, "a/") || prefixed(&self.new_path, "b/") {
            1
        } else {
            0
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<PatchHunkLine>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchHunkLine {
    Context(String),
    Delete(String),
    Add(String),
    /// `\ No newline at end of file`, applying to the line before it.
    NoNewline,
}

/// Parses a single-file unified diff. Hunk bodies are read by their header counts;
/// once a hunk's counts are used up, further `+`/`-`/` ` lines are still accepted so
/// slightly miscounted model output keeps its lines.
pub fn parse_unified_diff(diff: &str) -> Result<ParsedDiff, ValidationError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut parsed = ParsedDiff {
        old_path: None,
        new_path: None,
        hunks: Vec::new(),
    };

    let mut idx = 0usize;
    while idx < lines.len() {
        let line = lines[idx];
        if line.starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, idx)?;
            parsed.hunks.push(hunk);
            idx = next;
            continue;
        }
        if let Some(path) = line.strip_prefix("--- ") {
            parsed.old_path = Some(header_path(path));
        } else if let Some(path) = line.strip_prefix("+++ ") {
            parsed.new_path = Some(header_path(path));
        }
        idx += 1;
    }
    Ok(parsed)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(PatchHunk, usize), ValidationError> {
    let header = lines[start];
    let malformed = || ValidationError::MalformedHunk {
        line: start + 1,
        header: header.to_string(),
    };
    let captures = HUNK_HEADER.captures(header).ok_or_else(malformed)?;
    let number = |index: usize, default: usize| -> Result<usize, ValidationError> {
        match captures.get(index) {
            Some(value) => value.as_str().parse().map_err(|_| malformed()),
            None => Ok(default),
        }
    };
    let mut hunk = PatchHunk {
        old_start: number(1, 0)?,
        old_count: number(2, 1)?,
        new_start: number(3, 0)?,
        new_count: number(4, 1)?,
        lines: Vec::new(),
    };

    let mut old_remaining = hunk.old_count;
    let mut new_remaining = hunk.new_count;
    let mut idx = start + 1;
    while idx < lines.len() {
        let line = lines[idx];
        let counted = old_remaining > 0 || new_remaining > 0;
        if !counted && (line.starts_with("@@") || line.starts_with("--- ")) {
            break;
        }

        let parsed = match line.chars().next() {
            Some(' ') => PatchHunkLine::Context(line[1..].to_string()),
            Some('-') => PatchHunkLine::Delete(line[1..].to_string()),
            Some('+') => PatchHunkLine::Add(line[1..].to_string()),
            Some('\\') => PatchHunkLine::NoNewline,
            // Some editors strip the single space of an empty context line.
            None if counted => PatchHunkLine::Context(String::new()),
            _ if counted => break,
            _ => {
                idx += 1;
                continue;
            }
        };
        match &parsed {
            PatchHunkLine::Context(_) => {
                old_remaining = old_remaining.saturating_sub(1);
                new_remaining = new_remaining.saturating_sub(1);
            }
            PatchHunkLine::Delete(_) => old_remaining = old_remaining.saturating_sub(1),
            PatchHunkLine::Add(_) => new_remaining = new_remaining.saturating_sub(1),
            PatchHunkLine::NoNewline => {}
        }
        hunk.lines.push(parsed);
        idx += 1;
    }
    Ok((hunk, idx))
}

/// Drops a trailing tab-separated timestamp.
fn header_path(raw: &str) -> String {
    raw.split('\t').next().unwrap_or(raw).trim().to_string()
}
