//! Process configuration, read once at startup and shared read-only.
//!
//! Loaded from a TOML file; every section and key has a default so an empty
//! file is valid. Credentials are never read from the file.
//!
//! ```toml
//! [tracker]
//! list_id = "901234567"
//!
//! [fields]
//! type = "660e1b3b-ec41-40a6-9863-979e44951c70"
//! department = "90647e3f-2209-4d5c-be47-7780a883ac28"
//!
//! [enrichment]
//! tag_threshold = 0.5
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::TriageError;
use crate::enrichment::TagThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracker: TrackerSettings,
    /// Canonical field name → tracker custom-field identifier.
    pub fields: BTreeMap<String, String>,
    pub priorities: PrioritySettings,
    pub enrichment: EnrichmentSettings,
    pub agent: AgentSettings,
    pub engine: EngineSettings,
    pub models: ModelSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub base_url: String,
    pub list_id: String,
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Minimum spacing between consecutive requests (rate-limit guard).
    pub min_request_interval_ms: u64,
    /// Set only when the tracker is known to deduplicate creates per ticket.
    pub service_dedupes: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.clickup.com/api/v2".into(),
            list_id: String::new(),
            timeout_secs: 30,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            min_request_interval_ms: 600,
            service_dedupes: false,
        }
    }
}

impl TrackerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySettings {
    /// Canonical priority label → tracker level (1 urgent … 4 low).
    pub levels: BTreeMap<String, u8>,
    pub default_level: u8,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            levels: BTreeMap::from([
                ("Urgent".to_string(), 1),
                ("High".to_string(), 2),
                ("Medium".to_string(), 3),
                ("Low".to_string(), 4),
            ]),
            default_level: 3,
        }
    }
}

impl PrioritySettings {
    /// Case-insensitive lookup, falling back to the default level.
    pub fn level_for(&self, label: &str) -> u8 {
        let label = label.trim();
        self.levels
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(label))
            .map(|(_, v)| *v)
            .unwrap_or(self.default_level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub tag_threshold: f32,
    pub classifier_timeout_ms: u64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            tag_threshold: 0.5,
            classifier_timeout_ms: 8_000,
        }
    }
}

impl EnrichmentSettings {
    pub fn thresholds(&self) -> TagThresholds {
        TagThresholds::uniform(self.tag_threshold)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_steps: usize,
    /// Consecutive malformed reasoning outputs tolerated per step.
    pub max_invalid_actions: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_invalid_actions: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u32,
    pub num_predict: u32,
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3".into(),
            temperature: 0.0,
            num_ctx: 4096,
            num_predict: 512,
            timeout_secs: 60,
        }
    }
}

impl EngineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Directory holding one sub-directory per attribute (`tags/`, `department/`, ...).
    pub dir: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, TriageError> {
        let settings: Settings =
            toml::from_str(s).map_err(|e| TriageError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, TriageError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TriageError::config(format!("read {}: {e}", path.display())))?;
        let settings = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), fields = settings.fields.len(), "loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), TriageError> {
        let t = self.enrichment.tag_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(TriageError::config(format!(
                "enrichment.tag_threshold must be in [0, 1], got {t}"
            )));
        }
        if self.agent.max_steps == 0 {
            return Err(TriageError::config("agent.max_steps must be at least 1"));
        }
        if !(1..=4).contains(&self.priorities.default_level) {
            return Err(TriageError::config(format!(
                "priorities.default_level must be 1..=4, got {}",
                self.priorities.default_level
            )));
        }
        if let Some((label, level)) = self
            .priorities
            .levels
            .iter()
            .find(|(_, v)| !(1..=4).contains(*v))
        {
            return Err(TriageError::config(format!(
                "priority '{label}' maps to {level}, expected 1..=4"
            )));
        }
        if let Some((name, _)) = self.fields.iter().find(|(_, id)| id.trim().is_empty()) {
            return Err(TriageError::config(format!(
                "custom field '{name}' has an empty identifier"
            )));
        }
        Ok(())
    }

    /// Resolve a canonical custom-field name (case-insensitive) to its id.
    pub fn field_id(&self, name: &str) -> Result<&str, TriageError> {
        let name = name.trim();
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| TriageError::UnknownField {
                field: name.to_string(),
            })
    }
}
