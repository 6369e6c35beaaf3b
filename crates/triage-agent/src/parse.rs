//! Extraction of a proposed action from free-form engine output.
//!
//! The engine is asked for
//!
//! ```text
//! Thought: <reasoning>
//! Action: <tool name>
//! Action Input: {"json": "object"}
//! ```
//!
//! Output is untrusted: code fences are stripped, anything the engine
//! invents after the input (a fake `Observation:`) is ignored, and the input
//! must be a single JSON object. Tool-name and schema checks happen later in
//! [`ToolCall::parse`](crate::tools::ToolCall::parse).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use triage_core::TriageError;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?\s*([\s\S]*?)```").expect("valid fence regex"));

static ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)Thought:\s*(?P<thought>.*?)\s*Action:\s*(?P<tool>[A-Za-z_][A-Za-z0-9_]*)\s*Action\s+Input:\s*(?P<input>\{.*)",
    )
    .expect("valid action regex")
});

static OBSERVATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Observation:").expect("valid observation regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedAction {
    pub thought: String,
    pub tool: String,
    pub input: Value,
}

pub fn strip_code_fences(text: &str) -> String {
    FENCE.replace_all(text, "$1").into_owned()
}

/// Parse the first `Thought / Action / Action Input` block in `text`.
pub fn parse_action(text: &str) -> Result<ProposedAction, TriageError> {
    let unfenced = strip_code_fences(text);
    let relevant = match OBSERVATION.find(&unfenced) {
        Some(m) => &unfenced[..m.start()],
        None => unfenced.as_str(),
    };

    let caps = ACTION.captures(relevant).ok_or_else(|| {
        TriageError::invalid_action("missing 'Thought', 'Action' or 'Action Input' with a JSON object")
    })?;

    let raw_input = &caps["input"];
    let input = serde_json::Deserializer::from_str(raw_input)
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| TriageError::invalid_action("empty action input"))?
        .map_err(|e| TriageError::invalid_action(format!("action input is not valid JSON: {e}")))?;
    if !input.is_object() {
        return Err(TriageError::invalid_action("action input must be a JSON object"));
    }

    Ok(ProposedAction {
        thought: caps["thought"].trim().to_string(),
        tool: caps["tool"].trim().to_string(),
        input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_block() {
        let text = "Thought: I should classify everything.\nAction: enrich_ticket\nAction Input: {}";
        let action = parse_action(text).unwrap();
        assert_eq!(action.thought, "I should classify everything.");
        assert_eq!(action.tool, "enrich_ticket");
        assert_eq!(action.input, json!({}));
    }

    #[test]
    fn strips_code_fences() {
        let text = "Thought: look up the type field\nAction: lookup_custom_field\nAction Input: ```json\n{\"field_name\": \"type\"}\n```";
        let action = parse_action(text).unwrap();
        assert_eq!(action.input, json!({"field_name": "type"}));
    }

    #[test]
    fn ignores_hallucinated_observation() {
        let text = concat!(
            "Thought: create it\n",
            "Action: create_task\n",
            "Action Input: {\"title\": \"Cannot log in\"}\n",
            "Observation: {\"status\": \"success\"}\n",
            "Thought: done\nAction: update_task\nAction Input: {}"
        );
        let action = parse_action(text).unwrap();
        assert_eq!(action.tool, "create_task");
        assert_eq!(action.input, json!({"title": "Cannot log in"}));
    }

    #[test]
    fn ignores_text_after_json() {
        let text = "Thought: t\nAction: clean_ticket\nAction Input: {\"a\": {\"b\": 1}} and then I will wait.";
        assert_eq!(parse_action(text).unwrap().input, json!({"a": {"b": 1}}));
    }

    #[test]
    fn case_insensitive_labels() {
        let text = "thought: go\naction: clean_ticket\naction input: {}";
        assert_eq!(parse_action(text).unwrap().tool, "clean_ticket");
    }

    #[test]
    fn rejects_missing_action() {
        let err = parse_action("Final Answer: {\"ok\": true}").unwrap_err();
        assert_eq!(err.kind(), "invalid_action");
    }

    #[test]
    fn rejects_broken_json() {
        let err = parse_action("Thought: x\nAction: create_task\nAction Input: {\"title\": }").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"), "{err}");
    }

    #[test]
    fn rejects_non_object_input() {
        assert!(parse_action("Thought: x\nAction: clean_ticket\nAction Input: [1, 2]").is_err());
    }
}
