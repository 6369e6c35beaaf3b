//! Submission adapter: turns a [`TaskSubmission`] into a task on an external
//! tracker, resolving custom fields and dropdown options on the way.

pub mod client;
pub mod error;
pub mod fields;
pub mod retry;
pub mod throttle;

use async_trait::async_trait;
use triage_core::{TaskPatch, TaskResult, TaskSubmission, TriageError};

pub use client::TrackerClient;
pub use error::TrackerError;
pub use fields::{CustomField, DropdownOption, Resolution};
pub use retry::{Idempotency, RetryPolicy};
pub use throttle::Throttle;

/// The external task tracker as seen by the agent's tools.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Resolve a canonical custom-field name to the tracker's identifier.
    fn lookup_custom_field(&self, name: &str) -> Result<String, TriageError>;

    /// Create one task. Not retried once the request may have reached the
    /// tracker.
    async fn submit(&self, payload: &TaskSubmission) -> Result<TaskResult, TriageError>;

    async fn update(&self, task_id: &str, patch: &TaskPatch) -> Result<TaskResult, TriageError>;
}
