//! Label-mapping files shipped next to each classifier's weights.
//!
//! Each attribute directory contains `labels.json` (a JSON array of label
//! names, in logit order) and, for multi-label models, an optional
//! `thresholds.json` (a JSON array of per-label cut-offs, same order).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use triage_core::{Attribute, TagThresholds};

pub const LABELS_FILE: &str = "labels.json";
pub const THRESHOLDS_FILE: &str = "thresholds.json";

/// Ordered label names for one classifier, plus optional per-label thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    pub attribute: Attribute,
    labels: Vec<String>,
    thresholds: Option<Vec<f32>>,
}

impl LabelMap {
    pub fn new(attribute: Attribute, labels: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!labels.is_empty(), "{attribute}: label list is empty");
        let mut seen = HashSet::new();
        for label in &labels {
            anyhow::ensure!(
                seen.insert(label.as_str()),
                "{attribute}: duplicate label '{label}'"
            );
        }
        Ok(Self {
            attribute,
            labels,
            thresholds: None,
        })
    }

    pub fn with_thresholds(mut self, thresholds: Vec<f32>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            thresholds.len() == self.labels.len(),
            "{}: {} thresholds for {} labels",
            self.attribute,
            thresholds.len(),
            self.labels.len()
        );
        anyhow::ensure!(
            thresholds.iter().all(|t| (0.0..=1.0).contains(t)),
            "{}: thresholds must lie in [0, 1]",
            self.attribute
        );
        self.thresholds = Some(thresholds);
        Ok(self)
    }

    /// Load `labels.json` (and `thresholds.json` when present) from `dir`.
    pub fn load(attribute: Attribute, dir: &Path) -> anyhow::Result<Self> {
        let labels_path = dir.join(LABELS_FILE);
        let raw = std::fs::read_to_string(&labels_path)
            .with_context(|| format!("reading {}", labels_path.display()))?;
        let labels: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("{} must be a JSON array of strings", labels_path.display()))?;
        let map = Self::new(attribute, labels)?;

        let thresholds_path = dir.join(THRESHOLDS_FILE);
        if !thresholds_path.exists() {
            return Ok(map);
        }
        let raw = std::fs::read_to_string(&thresholds_path)
            .with_context(|| format!("reading {}", thresholds_path.display()))?;
        let thresholds: Vec<f32> = serde_json::from_str(&raw).with_context(|| {
            format!(
                "{} must be a JSON array of numbers",
                thresholds_path.display()
            )
        })?;
        map.with_thresholds(thresholds)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Per-label tag thresholds layered over `default`.
    pub fn tag_thresholds(&self, default: f32) -> TagThresholds {
        let per_label = match &self.thresholds {
            Some(ts) => self
                .labels
                .iter()
                .cloned()
                .zip(ts.iter().copied())
                .collect(),
            None => BTreeMap::new(),
        };
        TagThresholds { default, per_label }
    }
}
