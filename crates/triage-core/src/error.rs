use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enrichment::Attribute;

/// Every failure a ticket run can observe or end with.
///
/// Tool-level variants are fed back to the reasoning loop as structured
/// observations, so the type is `Clone` and serializes with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriageError {
    #[error("model unavailable for {attribute}: {reason}")]
    ModelUnavailable { attribute: Attribute, reason: String },

    #[error("inference error: {reason}")]
    InferenceError { reason: String },

    #[error("incomplete enrichment, missing: {}", join_attributes(.missing))]
    IncompleteEnrichment { missing: Vec<Attribute> },

    #[error("invalid action: {reason}")]
    InvalidAction { reason: String },

    #[error("unknown custom field '{field}'")]
    UnknownField { field: String },

    #[error("task already submitted in this run")]
    DuplicateSubmission,

    #[error("tracker rejected submission ({status}): {body}")]
    SubmissionRejected { status: u16, body: String },

    #[error("tracker unavailable: {reason}")]
    SubmissionUnavailable {
        reason: String,
        /// The request may have reached the tracker before the failure.
        possibly_created: bool,
    },

    #[error("agent exceeded {max_steps} steps without submitting a task")]
    LoopExceededSteps { max_steps: usize },

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("reasoning engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl TriageError {
    pub fn inference(reason: impl Into<String>) -> Self {
        Self::InferenceError {
            reason: reason.into(),
        }
    }

    pub fn invalid_action(reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Stable snake_case code, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::InferenceError { .. } => "inference_error",
            Self::IncompleteEnrichment { .. } => "incomplete_enrichment",
            Self::InvalidAction { .. } => "invalid_action",
            Self::UnknownField { .. } => "unknown_field",
            Self::DuplicateSubmission => "duplicate_submission",
            Self::SubmissionRejected { .. } => "submission_rejected",
            Self::SubmissionUnavailable { .. } => "submission_unavailable",
            Self::LoopExceededSteps { .. } => "loop_exceeded_steps",
            Self::Timeout { .. } => "timeout",
            Self::EngineUnavailable { .. } => "engine_unavailable",
            Self::Cancelled => "cancelled",
            Self::Config { .. } => "config",
        }
    }

    /// Transient network-class failure that a bounded retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SubmissionUnavailable { .. } | Self::Timeout { .. })
    }
}

fn join_attributes(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
