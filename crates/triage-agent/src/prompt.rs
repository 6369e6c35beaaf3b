//! Prompt rendering for the reasoning engine.

use std::fmt::Write;

use serde_json::json;
use triage_ai::{ChatMessage, CompletionRequest};
use triage_core::{AgentTrace, Ticket};

use crate::tools::{TOOLSET_VERSION, tool_schemas};

const PROTOCOL: &str = "\
You triage customer support tickets by calling tools.

Respond with exactly one step in this format and nothing else:
Thought: <one short sentence>
Action: <tool name>
Action Input: <one JSON object, no code fences>

After each step you receive an Observation with the tool result. Rules:
1. Call clean_ticket first, then enrich_ticket (or classify_ticket for each attribute).
2. Then call create_task exactly once. The run ends when create_task or update_task succeeds.
3. If an Observation has status \"failure\", read the error and adapt. Never repeat create_task.
4. Use only the tools listed below. Never write an Observation yourself.";

pub const STOP_SEQUENCE: &str = "\nObservation:";

/// Correction appended after a rejected reply.
pub fn correction(reason: &str) -> String {
    format!(
        "Your previous reply was rejected: {reason}\n\
         Reply again with exactly:\nThought: ...\nAction: <tool name>\nAction Input: {{...}}"
    )
}

pub fn system_prompt() -> String {
    let mut out = String::from(PROTOCOL);
    let _ = write!(out, "\n\nTools (version {TOOLSET_VERSION}):");
    for tool in tool_schemas() {
        let _ = write!(
            out,
            "\n- {}: {}\n  input: {}",
            tool.name, tool.description, tool.input
        );
    }
    out
}

/// Steps so far in the same format the engine is asked to produce.
pub fn scratchpad(trace: &AgentTrace) -> String {
    let mut out = String::new();
    for step in trace.steps() {
        let _ = writeln!(out, "Thought: {}", step.thought);
        let _ = writeln!(out, "Action: {}", step.action);
        let _ = writeln!(out, "Action Input: {}", step.action_input);
        let _ = writeln!(out, "Observation: {}", step.observation.to_prompt_json());
    }
    out
}

/// Full request for the next step.
pub fn render(ticket: &Ticket, trace: &AgentTrace, correction: Option<&str>) -> CompletionRequest {
    let ticket_json = json!({ "subject": ticket.subject(), "body": ticket.body() });
    let mut user = format!("Ticket:\n{ticket_json}\n");
    let pad = scratchpad(trace);
    if !pad.is_empty() {
        user.push('\n');
        user.push_str(&pad);
    }
    if let Some(note) = correction {
        user.push('\n');
        user.push_str(note);
        user.push('\n');
    }
    CompletionRequest {
        messages: vec![ChatMessage::system(system_prompt()), ChatMessage::user(user)],
        stop: vec![STOP_SEQUENCE.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triage_core::{Observation, ToolName, TriageError};

    fn ticket() -> Ticket {
        Ticket::new("Cannot log in", "Getting 500 error since this morning").unwrap()
    }

    #[test]
    fn system_prompt_lists_every_tool() {
        let prompt = system_prompt();
        for tool in ToolName::ALL {
            assert!(prompt.contains(&format!("- {tool}:")), "missing {tool}");
        }
        assert!(prompt.contains("version 1"));
    }

    #[test]
    fn first_request_has_ticket_only() {
        let req = render(&ticket(), &AgentTrace::new("abc"), None);
        assert_eq!(req.messages.len(), 2);
        let user = &req.messages[1].content;
        assert!(user.contains(r#""subject":"Cannot log in""#));
        assert!(!user.contains("Observation:"));
        assert_eq!(req.stop, [STOP_SEQUENCE]);
    }

    #[test]
    fn scratchpad_replays_steps() {
        let mut trace = AgentTrace::new("abc");
        trace.push(
            "clean first".into(),
            ToolName::CleanTicket,
            json!({}),
            Observation::Success {
                value: json!({"subject": "Cannot log in"}),
            },
        );
        trace.push(
            "field".into(),
            ToolName::LookupCustomField,
            json!({"field_name": "severity"}),
            Observation::Failure {
                error: TriageError::UnknownField {
                    field: "severity".into(),
                },
            },
        );
        let pad = scratchpad(&trace);
        assert!(pad.starts_with("Thought: clean first\nAction: clean_ticket\nAction Input: {}\n"));
        assert!(pad.contains(r#""kind":"unknown_field""#));
        assert_eq!(pad.matches("Observation:").count(), 2);
    }

    #[test]
    fn correction_is_appended() {
        let req = render(&ticket(), &AgentTrace::new("abc"), Some(&correction("unknown tool 'x'")));
        assert!(req.messages[1].content.contains("rejected: unknown tool 'x'"));
    }
}
