//! Append-only record of one agent run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TriageError;

/// Tools the reasoning loop may invoke. Closed set; unknown names are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CleanTicket,
    ClassifyTicket,
    EnrichTicket,
    LookupCustomField,
    CreateTask,
    UpdateTask,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::CleanTicket,
        ToolName::ClassifyTicket,
        ToolName::EnrichTicket,
        ToolName::LookupCustomField,
        ToolName::CreateTask,
        ToolName::UpdateTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CleanTicket => "clean_ticket",
            Self::ClassifyTicket => "classify_ticket",
            Self::EnrichTicket => "enrich_ticket",
            Self::LookupCustomField => "lookup_custom_field",
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// A successful observation from this tool ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CreateTask | Self::UpdateTask)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one tool call, as shown to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Observation {
    Success { value: Value },
    Failure { error: TriageError },
}

impl Observation {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&TriageError> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }

    /// Compact JSON for the prompt scratchpad.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"status\":\"failure\",\"error\":\"{e}\"}}"))
    }
}

impl From<Result<Value, TriageError>> for Observation {
    fn from(r: Result<Value, TriageError>) -> Self {
        match r {
            Ok(value) => Self::Success { value },
            Err(error) => Self::Failure { error },
        }
    }
}

/// One reasoning/acting turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub index: usize,
    pub thought: String,
    pub action: ToolName,
    pub action_input: Value,
    pub observation: Observation,
}

/// Reasoning output that failed validation and was re-prompted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Index of the step the engine was trying to produce.
    pub step: usize,
    pub raw: String,
    pub reason: String,
}

/// Ordered, append-only trace of a single ticket run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    ticket_ref: String,
    steps: Vec<AgentStep>,
    rejections: Vec<Rejection>,
}

impl AgentTrace {
    pub fn new(ticket_ref: impl Into<String>) -> Self {
        Self {
            ticket_ref: ticket_ref.into(),
            ..Self::default()
        }
    }

    pub fn ticket_ref(&self) -> &str {
        &self.ticket_ref
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step. The index is assigned here.
    pub fn push(
        &mut self,
        thought: String,
        action: ToolName,
        action_input: Value,
        observation: Observation,
    ) -> &AgentStep {
        let index = self.steps.len();
        self.steps.push(AgentStep {
            index,
            thought,
            action,
            action_input,
            observation,
        });
        &self.steps[index]
    }

    pub fn reject(&mut self, raw: impl Into<String>, reason: impl Into<String>) {
        self.rejections.push(Rejection {
            step: self.steps.len(),
            raw: raw.into(),
            reason: reason.into(),
        });
    }

    /// Number of successful `create_task`/`update_task` observations.
    pub fn successful_submissions(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.action.is_terminal() && s.observation.is_success())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_names_roundtrip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::from_name(tool.as_str()), Some(tool));
            let json = serde_json::to_value(tool).unwrap();
            assert_eq!(json, json!(tool.as_str()));
        }
        assert_eq!(ToolName::from_name("delete_task"), None);
    }

    #[test]
    fn observation_json_shape() {
        let ok = Observation::from(Ok(json!({"field_id": "abc"})));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "value": {"field_id": "abc"}})
        );

        let err = Observation::from(Err(TriageError::DuplicateSubmission));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"status": "failure", "error": {"kind": "duplicate_submission"}})
        );
        assert_eq!(err.error(), Some(&TriageError::DuplicateSubmission));
    }

    #[test]
    fn trace_assigns_indices_and_counts_submissions() {
        let mut trace = AgentTrace::new("abc123");
        trace.push(
            "classify".into(),
            ToolName::EnrichTicket,
            json!({}),
            Observation::from(Ok(json!({}))),
        );
        trace.reject("garbage", "missing Action");
        let step = trace.push(
            "submit".into(),
            ToolName::CreateTask,
            json!({}),
            Observation::from(Ok(json!({"task_id": "1"}))),
        );
        assert_eq!(step.index, 1);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.rejections()[0].step, 1);
        assert_eq!(trace.successful_submissions(), 1);
        assert_eq!(trace.ticket_ref(), "abc123");
    }
}
