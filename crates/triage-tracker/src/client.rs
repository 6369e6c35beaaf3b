//! HTTP client for a ClickUp-style task tracker (API v2).
//!
//! Every request passes the [`Throttle`] and carries the API token in the
//! `Authorization` header. Task creation is retried only when the failed
//! attempt provably created nothing; see [`RetryPolicy::should_retry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use triage_core::{Settings, TaskPatch, TaskResult, TaskSubmission, TriageError};

use crate::TaskTracker;
use crate::error::TrackerError;
use crate::fields::{CustomField, FieldList, Resolution, predicted_note, predicted_tags_note};
use crate::retry::{Idempotency, RetryPolicy};
use crate::throttle::Throttle;

const TASK_URL_BASE: &str = "https://app.clickup.com/t";

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    name: &'a str,
    description: String,
    priority: u8,
    tags: &'a [String],
    custom_fields: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct FieldValue {
    id: String,
    value: String,
}

#[derive(Deserialize)]
struct TaskResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<TagRef>,
}

#[derive(Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Deserialize)]
struct TagRef {
    name: String,
}

impl TaskResponse {
    fn into_result(self) -> TaskResult {
        let url = self
            .url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("{TASK_URL_BASE}/{}", self.id));
        TaskResult {
            task_id: self.id,
            status: self
                .status
                .map(|s| s.status)
                .unwrap_or_else(|| "unknown".into()),
            url: Some(url),
        }
    }
}

/// Custom fields resolved for one request, plus notes for values the
/// tracker could not take.
struct ResolvedFields {
    values: Vec<FieldValue>,
    notes: Vec<String>,
}

pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    settings: Arc<Settings>,
    throttle: Throttle,
    retry: RetryPolicy,
    fields: OnceCell<Vec<CustomField>>,
}

impl TrackerClient {
    /// Build a client for `settings.tracker.list_id`. The token never comes
    /// from the settings file.
    pub fn new(settings: Arc<Settings>, token: impl Into<String>) -> Result<Self, TriageError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(TriageError::config("tracker API token is not set"));
        }
        let tracker = &settings.tracker;
        if tracker.list_id.trim().is_empty() {
            return Err(TriageError::config("tracker.list_id is not set"));
        }
        let http = reqwest::Client::builder()
            .timeout(tracker.timeout())
            .build()
            .map_err(|e| TriageError::config(format!("tracker http client: {e}")))?;
        Ok(Self {
            http,
            base_url: tracker.base_url.trim_end_matches('/').to_string(),
            token,
            throttle: Throttle::new(tracker.min_request_interval()),
            retry: RetryPolicy::from_settings(tracker),
            fields: OnceCell::new(),
            settings,
        })
    }

    pub fn list_id(&self) -> &str {
        &self.settings.tracker.list_id
    }

    fn url(&self, segments: &[&str]) -> Result<Url, TriageError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TriageError::config(format!("tracker.base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TriageError::config("tracker.base_url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send one request with throttling and bounded retry. Non-2xx
    /// responses become [`TrackerError::Server`].
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        kind: Idempotency,
    ) -> Result<reqwest::Response, TrackerError> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;
        loop {
            self.throttle.acquire().await;
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, &self.token);
            if let Some(body) = body {
                req = req.json(body);
            }
            debug!(%method, %url, attempt, "tracker request");

            let err = match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    TrackerError::Server { status, body }
                }
                Err(e) => TrackerError::Http(e),
            };

            if !self.retry.should_retry(&err, kind, attempt) {
                return Err(err);
            }
            let Some(delay) = self.retry.next_delay(&mut backoff) else {
                return Err(err);
            };
            warn!(
                %method,
                %url,
                error = %err,
                retry = attempt + 1,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "tracker request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        kind: Idempotency,
    ) -> Result<T, TrackerError> {
        let resp = self.send(method, url, body, kind).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Custom fields configured on the list, fetched once and cached.
    pub async fn list_fields(&self) -> Result<&[CustomField], TriageError> {
        let fields = self
            .fields
            .get_or_try_init(|| async {
                let url = self.url(&["list", self.list_id(), "field"])?;
                let list: FieldList = self
                    .send_json(Method::GET, url, None, Idempotency::Safe)
                    .await
                    .map_err(|e| e.into_triage("list fields"))?;
                info!(list_id = %self.list_id(), count = list.fields.len(), "loaded custom fields");
                Ok::<_, TriageError>(list.fields)
            })
            .await?;
        Ok(fields.as_slice())
    }

    async fn field_meta(&self, field_id: &str) -> Result<Option<&CustomField>, TriageError> {
        Ok(self.list_fields().await?.iter().find(|f| f.id == field_id))
    }

    /// Map canonical names to field ids and predicted values to option ids.
    /// Runs before any write, so an unknown field leaves nothing behind.
    async fn resolve_fields(
        &self,
        custom_fields: &BTreeMap<String, String>,
    ) -> Result<ResolvedFields, TriageError> {
        let mut resolved = ResolvedFields {
            values: Vec::new(),
            notes: Vec::new(),
        };
        if custom_fields.is_empty() {
            return Ok(resolved);
        }
        for (name, value) in custom_fields {
            let field_id = self.settings.field_id(name)?.to_string();
            let Some(meta) = self.field_meta(&field_id).await? else {
                warn!(field = %name, %field_id, "field not present on list, sending raw value");
                resolved.values.push(FieldValue {
                    id: field_id,
                    value: value.clone(),
                });
                continue;
            };
            match meta.resolve(value) {
                Resolution::Value(v) => resolved.values.push(FieldValue { id: field_id, value: v }),
                Resolution::Unmatched => {
                    info!(field = %meta.name, %value, "no matching dropdown option");
                    resolved.notes.push(predicted_note(&meta.name, value));
                }
            }
        }
        Ok(resolved)
    }

    /// Create a task on the configured list.
    pub async fn submit(&self, payload: &TaskSubmission) -> Result<TaskResult, TriageError> {
        if payload.title.trim().is_empty() {
            return Err(TriageError::invalid_action("task title is empty"));
        }
        if !(1..=4).contains(&payload.priority_level) {
            return Err(TriageError::invalid_action(format!(
                "priority level {} out of range 1..=4",
                payload.priority_level
            )));
        }
        let fields = self.resolve_fields(&payload.custom_fields).await?;
        let description = with_notes(&payload.description, &fields.notes);

        let body = serde_json::to_value(CreateTaskBody {
            name: payload.title.trim(),
            description,
            priority: payload.priority_level,
            tags: &payload.tag_list,
            custom_fields: fields.values,
        })
        .map_err(|e| TriageError::invalid_action(format!("encode task: {e}")))?;

        let url = self.url(&["list", self.list_id(), "task"])?;
        let task: TaskResponse = self
            .send_json(Method::POST, url, Some(&body), Idempotency::Create)
            .await
            .map_err(|e| {
                let err = e.into_triage("create task");
                if let TriageError::SubmissionUnavailable {
                    possibly_created: true,
                    reason,
                } = &err
                {
                    warn!(%reason, "create task outcome unknown, a duplicate task may exist");
                }
                err
            })?;

        let missing = missing_tags(&payload.tag_list, &task.tags);
        let task_id = task.id.clone();
        let current_description = task.description.clone();
        let result = task.into_result();
        info!(task_id = %result.task_id, status = %result.status, "task created");

        if !missing.is_empty() {
            self.note_missing_tags(&task_id, current_description, &body, &missing)
                .await;
        }
        Ok(result)
    }

    /// Best effort: append a "Predicted tags" note when the tracker dropped
    /// some of the requested tags.
    async fn note_missing_tags(
        &self,
        task_id: &str,
        current: Option<String>,
        create_body: &Value,
        missing: &[String],
    ) {
        let base = current.unwrap_or_else(|| {
            create_body["description"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        });
        let description = with_notes(&base, &[predicted_tags_note(missing)]);
        let outcome = match self.url(&["task", task_id]) {
            Ok(url) => self
                .send(
                    Method::PUT,
                    url,
                    Some(&json!({ "description": description })),
                    Idempotency::Safe,
                )
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(()) => info!(%task_id, tags = ?missing, "noted tags the tracker did not attach"),
            Err(e) => warn!(%task_id, error = %e, "could not add predicted tags note"),
        }
    }

    /// Apply a partial update to an existing task.
    pub async fn update(&self, task_id: &str, patch: &TaskPatch) -> Result<TaskResult, TriageError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(TriageError::invalid_action("task_id is empty"));
        }
        if patch.is_empty() {
            return Err(TriageError::invalid_action("patch has no changes"));
        }
        if let Some(level) = patch.priority_level {
            if !(1..=4).contains(&level) {
                return Err(TriageError::invalid_action(format!(
                    "priority level {level} out of range 1..=4"
                )));
            }
        }
        let fields = self.resolve_fields(&patch.custom_fields).await?;
        if let Some(note) = fields.notes.first() {
            return Err(TriageError::invalid_action(format!(
                "cannot set field value: {note}"
            )));
        }

        let mut core = serde_json::Map::new();
        if let Some(title) = &patch.title {
            core.insert("name".into(), json!(title.trim()));
        }
        if let Some(description) = &patch.description {
            core.insert("description".into(), json!(description));
        }
        if let Some(level) = patch.priority_level {
            core.insert("priority".into(), json!(level));
        }

        // Each write is its own request; failures report what already landed.
        let op = |what: &str| format!("update task {task_id}: {what}");
        let mut applied: Vec<String> = Vec::new();
        let mut latest: Option<TaskResponse> = None;
        if !core.is_empty() {
            let url = self.url(&["task", task_id])?;
            let task = self
                .send_json(Method::PUT, url, Some(&Value::Object(core)), Idempotency::Safe)
                .await
                .map_err(|e| partial_failure(e.into_triage(&op("core fields")), &applied))?;
            latest = Some(task);
            applied.push("core fields".into());
        }
        for field in &fields.values {
            let url = self.url(&["task", task_id, "field", &field.id])?;
            self.send(
                Method::POST,
                url,
                Some(&json!({ "value": field.value })),
                Idempotency::Safe,
            )
            .await
            .map_err(|e| partial_failure(e.into_triage(&op("set field")), &applied))?;
            applied.push(format!("field {}", field.id));
        }
        for tag in &patch.add_tags {
            let tag = tag.trim();
            let url = self.url(&["task", task_id, "tag", tag])?;
            self.send(Method::POST, url, None, Idempotency::Safe)
                .await
                .map_err(|e| partial_failure(e.into_triage(&op("add tag")), &applied))?;
            applied.push(format!("tag {tag}"));
        }

        let task = match latest {
            Some(task) if patch.add_tags.is_empty() && fields.values.is_empty() => task,
            _ => {
                let url = self.url(&["task", task_id])?;
                self.send_json(Method::GET, url, None, Idempotency::Safe)
                    .await
                    .map_err(|e| partial_failure(e.into_triage(&op("fetch")), &applied))?
            }
        };
        let result = task.into_result();
        info!(task_id = %result.task_id, status = %result.status, "task updated");
        Ok(result)
    }
}

#[async_trait]
impl TaskTracker for TrackerClient {
    fn lookup_custom_field(&self, name: &str) -> Result<String, TriageError> {
        self.settings.field_id(name).map(str::to_string)
    }

    async fn submit(&self, payload: &TaskSubmission) -> Result<TaskResult, TriageError> {
        TrackerClient::submit(self, payload).await
    }

    async fn update(&self, task_id: &str, patch: &TaskPatch) -> Result<TaskResult, TriageError> {
        TrackerClient::update(self, task_id, patch).await
    }
}

/// Name the writes that succeeded before `err` so the caller can reason
/// about a partially updated task.
fn partial_failure(err: TriageError, applied: &[String]) -> TriageError {
    if applied.is_empty() {
        return err;
    }
    let note = format!("already applied: {}", applied.join(", "));
    match err {
        TriageError::SubmissionRejected { status, body } => TriageError::SubmissionRejected {
            status,
            body: format!("{body} ({note})"),
        },
        TriageError::SubmissionUnavailable {
            reason,
            possibly_created,
        } => TriageError::SubmissionUnavailable {
            reason: format!("{reason} ({note})"),
            possibly_created,
        },
        other => other,
    }
}

fn with_notes(description: &str, notes: &[String]) -> String {
    if notes.is_empty() {
        return description.to_string();
    }
    let mut out = description.trim_end().to_string();
    for note in notes {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(note);
    }
    out
}

/// Requested tags absent from the created task (tracker tags are lowercase).
fn missing_tags(requested: &[String], attached: &[TagRef]) -> Vec<String> {
    requested
        .iter()
        .filter(|tag| !attached.iter().any(|t| t.name.eq_ignore_ascii_case(tag.trim())))
        .cloned()
        .collect()
}
