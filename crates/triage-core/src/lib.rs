pub mod clean;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod task;
pub mod ticket;
pub mod trace;

pub use clean::{classifier_input, clean_subject_body};
pub use config::Settings;
pub use enrichment::{
    Attribute, ClassificationResult, EnrichmentRecord, LabelScore, TagThresholds, normalize,
};
pub use error::TriageError;
pub use task::{TaskPatch, TaskResult, TaskSubmission};
pub use ticket::Ticket;
pub use trace::{AgentStep, AgentTrace, Observation, Rejection, ToolName};
