//! Deterministic stand-ins for the classifiers, the tracker and the engine.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use triage_ai::{CompletionRequest, Ensemble, ReasoningEngine, TextClassifier};
use triage_core::{
    Attribute, ClassificationResult, LabelScore, Settings, TaskPatch, TaskResult, TaskSubmission,
    Ticket, TriageError,
};
use triage_tracker::TaskTracker;

pub struct FixedClassifier {
    attribute: Attribute,
    labels: Vec<(&'static str, f32)>,
}

impl TextClassifier for FixedClassifier {
    fn attribute(&self) -> Attribute {
        self.attribute
    }

    fn classify(&self, _text: &str) -> Result<ClassificationResult, TriageError> {
        ClassificationResult::new(
            self.attribute,
            self.labels.iter().map(|&(l, c)| LabelScore::new(l, c)).collect(),
        )
    }
}

pub fn fixed(attribute: Attribute, labels: &[(&'static str, f32)]) -> Arc<dyn TextClassifier> {
    Arc::new(FixedClassifier {
        attribute,
        labels: labels.to_vec(),
    })
}

/// Classifier outputs for "Cannot log in / Getting 500 error since this morning".
pub fn login_ensemble() -> Ensemble {
    Ensemble::new(Duration::from_secs(5))
        .with_classifier(fixed(Attribute::Tags, &[("login", 0.9), ("bug", 0.7)]))
        .with_classifier(fixed(Attribute::Department, &[("Support", 0.95)]))
        .with_classifier(fixed(Attribute::Type, &[("Bug", 0.88)]))
        .with_classifier(fixed(Attribute::Priority, &[("High", 0.8)]))
}

pub fn login_ticket() -> Ticket {
    Ticket::new("Cannot log in", "Getting 500 error since this morning").unwrap()
}

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.tracker.list_id = "901".into();
    settings.fields = BTreeMap::from([
        ("type".to_string(), "660e".to_string()),
        ("department".to_string(), "9064".to_string()),
    ]);
    settings
}

/// Tracker that records payloads and answers from a canned outcome.
pub struct RecordingTracker {
    submissions: Mutex<Vec<TaskSubmission>>,
    updates: Mutex<Vec<(String, TaskPatch)>>,
    failure: Option<TriageError>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(error: TriageError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn submissions(&self) -> Vec<TaskSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, TaskPatch)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskTracker for RecordingTracker {
    fn lookup_custom_field(&self, name: &str) -> Result<String, TriageError> {
        settings().field_id(name).map(str::to_string)
    }

    async fn submit(&self, payload: &TaskSubmission) -> Result<TaskResult, TriageError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(payload.clone());
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(TaskResult {
            task_id: format!("task-{}", submissions.len()),
            status: "to do".into(),
            url: None,
        })
    }

    async fn update(&self, task_id: &str, patch: &TaskPatch) -> Result<TaskResult, TriageError> {
        self.updates
            .lock()
            .unwrap()
            .push((task_id.to_string(), patch.clone()));
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(TaskResult {
            task_id: task_id.to_string(),
            status: "in progress".into(),
            url: None,
        })
    }
}

/// Engine that replays canned replies and records every request.
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<String, TriageError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEngine {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = Result<String, TriageError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TriageError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TriageError::EngineUnavailable {
                reason: "script exhausted".into(),
            }))
    }
}

/// One well-formed engine reply.
pub fn reply(thought: &str, tool: &str, input: &str) -> String {
    format!("Thought: {thought}\nAction: {tool}\nAction Input: {input}")
}
