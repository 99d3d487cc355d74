use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no valid JSON found in planner output")]
    NoJson,
    #[error("failed to parse planner JSON: {message}\nOutput: {json}")]
    Parse { message: String, json: String },
    #[error("plan missing required field: {0}")]
    MissingField(&'static str),
}

/// Structured output of the planning stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub goal: String,
    pub constraints: Vec<String>,
    pub steps: Vec<String>,
    pub files_to_inspect: Vec<String>,
}

impl Plan {
    /// Extracts the first balanced JSON object from `output` and checks that it carries
    /// a goal and at least one step.
    pub fn from_planner_output(output: &str) -> Result<Self, PlanError> {
        let json = extract_json_object(output.trim()).ok_or(PlanError::NoJson)?;
        let plan: Plan = serde_json::from_str(json).map_err(|error| PlanError::Parse {
            message: error.to_string(),
            json: json.to_string(),
        })?;
        if plan.goal.trim().is_empty() {
            return Err(PlanError::MissingField("goal"));
        }
        if plan.steps.is_empty() {
            return Err(PlanError::MissingField("steps"));
        }
        Ok(plan)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Goal: {}", self.goal)?;
        if !self.constraints.is_empty() {
            writeln!(f, "\nConstraints:")?;
            for constraint in &self.constraints {
                writeln!(f, "  - {constraint}")?;
            }
        }
        if !self.steps.is_empty() {
            writeln!(f, "\nSteps:")?;
            for (index, step) in self.steps.iter().enumerate() {
                writeln!(f, "  {}. {step}", index + 1)?;
            }
        }
        if !self.files_to_inspect.is_empty() {
            writeln!(f, "\nFiles to inspect:")?;
            for file in &self.files_to_inspect {
                writeln!(f, "  - {file}")?;
            }
        }
        Ok(())
    }
}

/// Braces inside JSON strings do not count toward nesting.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
