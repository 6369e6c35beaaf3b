//! Human-readable cards for run outcomes, classifications and tracker fields.
//!
//! Each renderer returns a `String`; `main` decides where it goes.

use std::collections::BTreeMap;
use std::fmt::Write;

use triage_agent::RunOutcome;
use triage_core::{AgentTrace, ClassificationResult, EnrichmentRecord, Observation};
use triage_tracker::CustomField;

const MAX_LABELS: usize = 5;
const MAX_RAW: usize = 80;

// ── Run outcome ──

pub fn outcome_card(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    match outcome {
        RunOutcome::Terminated { result, .. } => {
            let _ = writeln!(out, "=== Task {} ===", result.task_id);
            row(&mut out, "status", &result.status);
            if let Some(url) = &result.url {
                row(&mut out, "url", url);
            }
        }
        RunOutcome::Failed { error, .. } => {
            let _ = writeln!(out, "=== Run failed ({}) ===", error.kind());
            row(&mut out, "error", &error.to_string());
        }
    }
    out.push('\n');
    trace_section(&mut out, outcome.trace());
    out
}

fn trace_section(out: &mut String, trace: &AgentTrace) {
    let _ = writeln!(out, "Trace {}", trace.ticket_ref());
    for step in trace.steps() {
        let result = match &step.observation {
            Observation::Success { .. } => "ok".to_string(),
            Observation::Failure { error } => format!("{}: {error}", error.kind()),
        };
        let _ = writeln!(out, "  {:>2}. {:<20} {}", step.index + 1, step.action.as_str(), result);
        if !step.thought.is_empty() {
            let _ = writeln!(out, "      {}", step.thought);
        }
    }
    if !trace.rejections().is_empty() {
        let _ = writeln!(out, "Rejected replies");
        for r in trace.rejections() {
            let _ = writeln!(out, "  before step {}: {}", r.step + 1, r.reason);
            let _ = writeln!(out, "      {}", truncate(&r.raw, MAX_RAW));
        }
    }
}

// ── Classification ──

pub fn classification_card(results: &[ClassificationResult], record: &EnrichmentRecord) -> String {
    let mut out = String::new();
    out.push_str("Enrichment\n");
    let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
    row(&mut out, "tags", &tags.join(", "));
    row(&mut out, "department", &record.department);
    row(&mut out, "type", &record.ticket_type);
    row(&mut out, "priority", &record.priority);

    for result in results {
        let _ = writeln!(out, "\n{}", result.attribute);
        for score in result.labels.iter().take(MAX_LABELS) {
            let _ = writeln!(out, "  {:<26} {:.3}", score.label, score.confidence);
        }
        if result.labels.len() > MAX_LABELS {
            let _ = writeln!(out, "  ... and {} more", result.labels.len() - MAX_LABELS);
        }
    }
    out
}

// ── Tracker fields ──

/// One line per field; fields mapped in the settings show their canonical name.
pub fn fields_table(fields: &[CustomField], configured: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<38} {:<16} {:<10} {}", "ID", "TYPE", "MAPPED AS", "NAME");
    for field in fields {
        let mapped = configured
            .iter()
            .find(|(_, id)| **id == field.id)
            .map(|(name, _)| name.as_str())
            .unwrap_or("-");
        let _ = writeln!(
            out,
            "{:<38} {:<16} {:<10} {}",
            field.id, field.field_type, mapped, field.name
        );
        for option in &field.type_config.options {
            let _ = writeln!(out, "{:<38} {:<16} {:<10}   {}", option.id, "", "", option.name);
        }
    }
    out
}

fn row(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "  {key:<26} {value}");
}

fn truncate(s: &str, max: usize) -> String {
    let flat: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &flat[..i]),
        None => flat,
    }
}
