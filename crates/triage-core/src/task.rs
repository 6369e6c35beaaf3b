//! Task payloads exchanged with the task-tracking service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Final payload for task creation. Custom fields are keyed by canonical
/// field name (`type`, `department`); the submission adapter resolves them
/// to tracker field identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub title: String,
    pub description: String,
    pub priority_level: u8,
    pub tag_list: Vec<String>,
    pub custom_fields: BTreeMap<String, String>,
}

/// Outcome of a successful create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Partial update for an existing task. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority_level.is_none()
            && self.add_tags.is_empty()
            && self.custom_fields.is_empty()
    }
}
