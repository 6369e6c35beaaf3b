//! Reasoning-engine boundary: a black-box chat completion service.
//!
//! The agent only needs "messages in, text out". [`OllamaEngine`] talks to a
//! local Ollama server over `/api/chat`; tests substitute scripted engines.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use triage_core::TriageError;
use triage_core::config::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion request: the full conversation so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Sequences at which the engine should stop generating.
    pub stop: Vec<String>,
}

/// Text-completion service driving the agent.
///
/// Transport failures map to [`TriageError::EngineUnavailable`], expired
/// deadlines to [`TriageError::Timeout`]. Output is returned verbatim and is
/// untrusted.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TriageError>;
}

// ── Ollama ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Ollama chat client (non-streaming).
pub struct OllamaEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
    timeout: Duration,
}

impl OllamaEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, TriageError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| TriageError::config(format!("engine http client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            num_ctx: settings.num_ctx,
            num_predict: settings.num_predict,
            timeout: settings.timeout(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the server answers `/api/tags`.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    fn transport_error(&self, e: reqwest::Error) -> TriageError {
        if e.is_timeout() {
            TriageError::Timeout {
                operation: "reasoning engine".into(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TriageError::EngineUnavailable {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ReasoningEngine for OllamaEngine {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TriageError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
                num_predict: self.num_predict,
                stop: &request.stop,
            },
        };

        debug!(model = %self.model, messages = request.messages.len(), "engine request");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TriageError::EngineUnavailable {
                reason: format!("{status}: {text}"),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                TriageError::EngineUnavailable {
                    reason: format!("unparseable response: {e}"),
                }
            }
        })?;
        info!(
            model = %self.model,
            chars = parsed.message.content.len(),
            "engine responded"
        );
        Ok(parsed.message.content)
    }
}
