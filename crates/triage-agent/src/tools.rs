//! The tool surface offered to the reasoning engine.
//!
//! Tools form a closed set ([`ToolCall`]); each name has a strict input
//! schema and anything else is rejected as [`TriageError::InvalidAction`]
//! before it can run. A [`ToolSurface`] lives for exactly one ticket run and
//! holds that run's only mutable state: the cleaned text, the latest
//! classification per attribute, and the single-use submission guard.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use triage_ai::Ensemble;
use triage_core::{
    Attribute, ClassificationResult, EnrichmentRecord, Settings, TaskPatch, TaskResult,
    TaskSubmission, Ticket, ToolName, TriageError, classifier_input, clean_subject_body, normalize,
};
use triage_tracker::TaskTracker;

/// Bumped whenever a tool name or input schema changes.
pub const TOOLSET_VERSION: u32 = 1;

/// Canonical custom fields filled from the enrichment record.
const TYPE_FIELD: &str = "type";
const DEPARTMENT_FIELD: &str = "department";

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    CleanTicket,
    ClassifyTicket {
        attribute: Attribute,
    },
    EnrichTicket,
    LookupCustomField {
        field_name: String,
    },
    CreateTask {
        title: Option<String>,
        description: Option<String>,
    },
    UpdateTask {
        task_id: String,
        patch: TaskPatch,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassifyInput {
    attribute: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupInput {
    #[serde(alias = "fieldName")]
    field_name: String,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateInput {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateInput {
    #[serde(alias = "taskId")]
    task_id: String,
    patch: TaskPatch,
}

fn decode<T: serde::de::DeserializeOwned>(tool: ToolName, input: &Value) -> Result<T, TriageError> {
    serde_json::from_value(input.clone())
        .map_err(|e| TriageError::invalid_action(format!("{tool}: {e}")))
}

impl ToolCall {
    /// Validate an engine-proposed `(name, input)` pair.
    pub fn parse(name: &str, input: &Value) -> Result<Self, TriageError> {
        let tool = ToolName::from_name(name.trim()).ok_or_else(|| {
            TriageError::invalid_action(format!(
                "unknown tool '{name}', expected one of {}",
                ToolName::ALL.map(|t| t.as_str()).join(", ")
            ))
        })?;
        if !input.is_object() {
            return Err(TriageError::invalid_action(format!(
                "{tool}: input must be a JSON object"
            )));
        }
        match tool {
            // The ticket is bound to the run; argument-free tools ignore input.
            ToolName::CleanTicket => Ok(Self::CleanTicket),
            ToolName::EnrichTicket => Ok(Self::EnrichTicket),
            ToolName::ClassifyTicket => {
                let input: ClassifyInput = decode(tool, input)?;
                Ok(Self::ClassifyTicket {
                    attribute: Attribute::from_str(&input.attribute)?,
                })
            }
            ToolName::LookupCustomField => {
                let input: LookupInput = decode(tool, input)?;
                if input.field_name.trim().is_empty() {
                    return Err(TriageError::invalid_action("field_name is empty"));
                }
                Ok(Self::LookupCustomField {
                    field_name: input.field_name,
                })
            }
            ToolName::CreateTask => {
                let input: CreateInput = decode(tool, input)?;
                Ok(Self::CreateTask {
                    title: input.title,
                    description: input.description,
                })
            }
            ToolName::UpdateTask => {
                let input: UpdateInput = decode(tool, input)?;
                if input.task_id.trim().is_empty() {
                    return Err(TriageError::invalid_action("task_id is empty"));
                }
                if input.patch.is_empty() {
                    return Err(TriageError::invalid_action("patch has no changes"));
                }
                Ok(Self::UpdateTask {
                    task_id: input.task_id,
                    patch: input.patch,
                })
            }
        }
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::CleanTicket => ToolName::CleanTicket,
            Self::ClassifyTicket { .. } => ToolName::ClassifyTicket,
            Self::EnrichTicket => ToolName::EnrichTicket,
            Self::LookupCustomField { .. } => ToolName::LookupCustomField,
            Self::CreateTask { .. } => ToolName::CreateTask,
            Self::UpdateTask { .. } => ToolName::UpdateTask,
        }
    }
}

/// Prompt-facing description of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: ToolName,
    pub description: &'static str,
    pub input: Value,
}

pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: ToolName::CleanTicket,
            description: "Strip signatures, fix common typos and normalize whitespace in the ticket. Later classifications use the cleaned text.",
            input: json!({}),
        },
        ToolSchema {
            name: ToolName::ClassifyTicket,
            description: "Run one classifier. Returns labels with confidences.",
            input: json!({"attribute": "tags | department | type | priority"}),
        },
        ToolSchema {
            name: ToolName::EnrichTicket,
            description: "Run all four classifiers and return the merged enrichment record {tags, department, type, priority}.",
            input: json!({}),
        },
        ToolSchema {
            name: ToolName::LookupCustomField,
            description: "Resolve a custom field name to the tracker's field id.",
            input: json!({"field_name": "string"}),
        },
        ToolSchema {
            name: ToolName::CreateTask,
            description: "Create the tracker task from the ticket and its enrichment. Requires all four attributes classified. Can succeed only once per ticket.",
            input: json!({"title": "optional string", "description": "optional string"}),
        },
        ToolSchema {
            name: ToolName::UpdateTask,
            description: "Patch an existing task.",
            input: json!({
                "task_id": "string",
                "patch": {
                    "title": "optional string",
                    "description": "optional string",
                    "priority_level": "optional 1-4",
                    "add_tags": ["string"],
                    "custom_fields": {"field name": "value"}
                }
            }),
        },
    ]
}

/// Result of a successful tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Observation shown to the engine.
    pub value: Value,
    /// Set by `create_task` and `update_task`.
    pub task: Option<TaskResult>,
}

impl ToolOutput {
    fn value(value: Value) -> Self {
        Self { value, task: None }
    }

    fn task(task: TaskResult) -> Result<Self, TriageError> {
        let value = to_value(&task)?;
        Ok(Self {
            value,
            task: Some(task),
        })
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, TriageError> {
    serde_json::to_value(v).map_err(|e| TriageError::inference(format!("encode observation: {e}")))
}

/// Per-run tool executor.
pub struct ToolSurface<'a> {
    ticket: &'a Ticket,
    ensemble: &'a Ensemble,
    tracker: &'a dyn TaskTracker,
    settings: &'a Settings,
    cleaned: Option<(String, String)>,
    classifications: BTreeMap<Attribute, ClassificationResult>,
    create_spent: bool,
}

impl<'a> ToolSurface<'a> {
    pub fn new(
        ticket: &'a Ticket,
        ensemble: &'a Ensemble,
        tracker: &'a dyn TaskTracker,
        settings: &'a Settings,
    ) -> Self {
        Self {
            ticket,
            ensemble,
            tracker,
            settings,
            cleaned: None,
            classifications: BTreeMap::new(),
            create_spent: false,
        }
    }

    /// Whether `create_task` has been executed in this run, successfully or not.
    pub fn create_spent(&self) -> bool {
        self.create_spent
    }

    pub fn classifications(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.classifications.values()
    }

    fn subject_body(&self) -> (&str, &str) {
        match &self.cleaned {
            Some((s, b)) => (s, b),
            None => (self.ticket.subject(), self.ticket.body()),
        }
    }

    /// Text given to the classifiers: cleaned when available.
    fn classifier_text(&self) -> String {
        let (subject, body) = self.subject_body();
        classifier_input(subject, body)
    }

    /// Checks run before a proposed call becomes a step. A `create_task`
    /// that cannot be built yet is sent back to the engine instead of
    /// spending the run's only submission.
    pub fn precheck(&self, call: &ToolCall) -> Result<(), TriageError> {
        match call {
            ToolCall::CreateTask { .. } if !self.create_spent => self
                .enrichment()
                .map(|_| ())
                .map_err(|e| TriageError::invalid_action(format!("create_task is not ready: {e}"))),
            _ => Ok(()),
        }
    }

    pub async fn execute(&mut self, call: &ToolCall) -> Result<ToolOutput, TriageError> {
        debug!(tool = %call.name(), "executing tool");
        match call {
            ToolCall::CleanTicket => {
                let (subject, body) = clean_subject_body(self.ticket.subject(), self.ticket.body());
                let value = json!({ "subject": subject, "body": body });
                self.cleaned = Some((subject, body));
                Ok(ToolOutput::value(value))
            }
            ToolCall::ClassifyTicket { attribute } => {
                let result = self
                    .ensemble
                    .classify(*attribute, &self.classifier_text())
                    .await?;
                let value = to_value(&result)?;
                self.classifications.insert(*attribute, result);
                Ok(ToolOutput::value(value))
            }
            ToolCall::EnrichTicket => {
                let text = self.classifier_text();
                let mut first_error = None;
                for (attribute, outcome) in self.ensemble.classify_all(&text).await {
                    match outcome {
                        Ok(result) => {
                            self.classifications.insert(attribute, result);
                        }
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
                let record = self.enrichment()?;
                Ok(ToolOutput::value(to_value(&record)?))
            }
            ToolCall::LookupCustomField { field_name } => {
                let field_id = self.tracker.lookup_custom_field(field_name)?;
                Ok(ToolOutput::value(
                    json!({ "field_name": field_name.trim(), "field_id": field_id }),
                ))
            }
            ToolCall::CreateTask { title, description } => {
                if self.create_spent {
                    warn!(ticket = %self.ticket.short_ref(), "second create_task refused");
                    return Err(TriageError::DuplicateSubmission);
                }
                self.create_spent = true;
                let record = self.enrichment()?;
                let payload = self.build_submission(&record, title.as_deref(), description.as_deref());
                info!(
                    ticket = %self.ticket.short_ref(),
                    priority = payload.priority_level,
                    tags = payload.tag_list.len(),
                    "submitting task"
                );
                let task = self.tracker.submit(&payload).await?;
                ToolOutput::task(task)
            }
            ToolCall::UpdateTask { task_id, patch } => {
                let task = self.tracker.update(task_id, patch).await?;
                ToolOutput::task(task)
            }
        }
    }

    /// Normalize the collected classifications.
    pub fn enrichment(&self) -> Result<EnrichmentRecord, TriageError> {
        let results: Vec<ClassificationResult> = self.classifications.values().cloned().collect();
        normalize(&results, self.ensemble.tag_thresholds())
    }

    /// Build the task payload from the ticket and its enrichment. Custom
    /// fields without a configured id become notes in the description.
    pub fn build_submission(
        &self,
        record: &EnrichmentRecord,
        title: Option<&str>,
        description: Option<&str>,
    ) -> TaskSubmission {
        let (subject, body) = self.subject_body();
        let title = non_empty(title)
            .or_else(|| non_empty(Some(subject)))
            .unwrap_or("(no subject)")
            .to_string();
        let mut description = non_empty(description).unwrap_or(body).to_string();

        let mut custom_fields = BTreeMap::new();
        for (field, label, value) in [
            (TYPE_FIELD, "Type", &record.ticket_type),
            (DEPARTMENT_FIELD, "Department", &record.department),
        ] {
            if self.settings.field_id(field).is_ok() {
                custom_fields.insert(field.to_string(), value.clone());
            } else {
                push_paragraph(&mut description, &format!("Predicted {label}: {value}"));
            }
        }
        push_paragraph(
            &mut description,
            &format!("---\nticket-ref: {}", self.ticket.fingerprint()),
        );

        TaskSubmission {
            title,
            description,
            priority_level: self.settings.priorities.level_for(&record.priority),
            tag_list: record.tags.iter().cloned().collect(),
            custom_fields,
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn push_paragraph(text: &mut String, paragraph: &str) {
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(paragraph);
}
