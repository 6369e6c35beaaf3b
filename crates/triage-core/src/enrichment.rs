//! Classifier outputs and their canonical merge into one enrichment record.
//!
//! Tags are multi-label (independent sigmoid confidences, every label above
//! threshold is kept). Department, type and priority are single-label
//! (softmax confidences, only the best label is kept).
//!
//! # Determinism
//!
//! [`normalize`] is a pure function of its inputs. When two labels share the
//! highest confidence, the lexicographically smallest label wins, and tags
//! are held in a `BTreeSet`, so identical inputs always serialize identically.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TriageError;

/// Ticket attribute predicted by one classifier of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Tags,
    Department,
    Type,
    Priority,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Tags,
        Attribute::Department,
        Attribute::Type,
        Attribute::Priority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Department => "department",
            Self::Type => "type",
            Self::Priority => "priority",
        }
    }

    /// Only tags carry several labels per ticket.
    pub fn is_multi_label(&self) -> bool {
        matches!(self, Self::Tags)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tags" | "tag" => Ok(Self::Tags),
            "department" => Ok(Self::Department),
            "type" => Ok(Self::Type),
            "priority" => Ok(Self::Priority),
            other => Err(TriageError::invalid_action(format!(
                "unknown attribute '{other}', expected one of tags, department, type, priority"
            ))),
        }
    }
}

/// One predicted label with its confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Output of a single classifier for a single ticket.
///
/// `labels` is ordered by descending confidence, ties by ascending label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub attribute: Attribute,
    pub labels: Vec<LabelScore>,
    pub is_multi_label: bool,
}

impl ClassificationResult {
    /// Build a result, validating confidences and ordering the labels.
    pub fn new(attribute: Attribute, mut labels: Vec<LabelScore>) -> Result<Self, TriageError> {
        if let Some(bad) = labels
            .iter()
            .find(|l| !(0.0..=1.0).contains(&l.confidence))
        {
            return Err(TriageError::inference(format!(
                "{attribute}: confidence {} for '{}' outside [0, 1]",
                bad.confidence, bad.label
            )));
        }
        labels.sort_by(rank);
        Ok(Self {
            attribute,
            labels,
            is_multi_label: attribute.is_multi_label(),
        })
    }

    /// Highest-confidence label, lexicographically smallest on ties.
    pub fn top(&self) -> Option<&LabelScore> {
        self.labels.iter().min_by(|a, b| rank(a, b))
    }
}

/// Descending confidence, then ascending label.
fn rank(a: &LabelScore, b: &LabelScore) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.label.cmp(&b.label))
}

/// Confidence cut-off for multi-label tagging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagThresholds {
    pub default: f32,
    /// Per-label overrides, typically loaded from a model's `thresholds.json`.
    #[serde(default)]
    pub per_label: BTreeMap<String, f32>,
}

impl TagThresholds {
    pub fn uniform(default: f32) -> Self {
        Self {
            default,
            per_label: BTreeMap::new(),
        }
    }

    pub fn for_label(&self, label: &str) -> f32 {
        self.per_label.get(label).copied().unwrap_or(self.default)
    }
}

impl Default for TagThresholds {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

/// Canonical per-ticket enrichment, built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub tags: BTreeSet<String>,
    pub department: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub priority: String,
}

/// Merge one result per attribute into an [`EnrichmentRecord`].
///
/// Fails with [`TriageError::IncompleteEnrichment`] when any attribute is
/// missing (or a single-label attribute has no labels at all), and with
/// [`TriageError::InferenceError`] when an attribute appears twice. No
/// partial record is ever returned.
pub fn normalize(
    results: &[ClassificationResult],
    thresholds: &TagThresholds,
) -> Result<EnrichmentRecord, TriageError> {
    let mut by_attr: BTreeMap<Attribute, &ClassificationResult> = BTreeMap::new();
    for result in results {
        if by_attr.insert(result.attribute, result).is_some() {
            return Err(TriageError::inference(format!(
                "duplicate classification for {}",
                result.attribute
            )));
        }
    }

    let missing: Vec<Attribute> = Attribute::ALL
        .iter()
        .copied()
        .filter(|attr| match by_attr.get(attr) {
            None => true,
            Some(r) => !attr.is_multi_label() && r.labels.is_empty(),
        })
        .collect();
    if !missing.is_empty() {
        return Err(TriageError::IncompleteEnrichment { missing });
    }

    let single = |attr: Attribute| -> String {
        by_attr[&attr]
            .top()
            .map(|l| l.label.clone())
            .unwrap_or_default()
    };

    let tags = by_attr[&Attribute::Tags]
        .labels
        .iter()
        .filter(|l| l.confidence > thresholds.for_label(&l.label))
        .map(|l| l.label.clone())
        .collect();

    Ok(EnrichmentRecord {
        tags,
        department: single(Attribute::Department),
        ticket_type: single(Attribute::Type),
        priority: single(Attribute::Priority),
    })
}
