//! Per-attribute text classification.
//!
//! Every attribute (tags, department, type, priority) is served by its own
//! [`TextClassifier`]. Implementations are independent and swappable; the
//! ensemble never assumes an ordering between them.
//!
//! Raw model logits become a [`ClassificationResult`] through
//! [`scores_from_logits`]: sigmoid for the multi-label tags model (each label
//! scored independently), softmax for the single-label models (scores sum to 1).

use triage_core::{Attribute, ClassificationResult, LabelScore, TriageError};

use crate::labels::LabelMap;

/// A loaded classifier for one attribute.
///
/// Implementations hold read-only model state shared across concurrent
/// ticket runs, and must be callable from blocking worker threads.
pub trait TextClassifier: Send + Sync {
    fn attribute(&self) -> Attribute;

    /// Classify `text`. Fails with [`TriageError::InferenceError`] on empty or
    /// malformed input.
    fn classify(&self, text: &str) -> Result<ClassificationResult, TriageError>;
}

/// Turn a logit vector into a labelled result for `labels.attribute`.
pub fn scores_from_logits(
    labels: &LabelMap,
    logits: &[f32],
) -> Result<ClassificationResult, TriageError> {
    let attribute = labels.attribute;
    if logits.len() != labels.len() {
        return Err(TriageError::inference(format!(
            "{attribute}: model produced {} logits for {} labels",
            logits.len(),
            labels.len()
        )));
    }
    if logits.iter().any(|x| !x.is_finite()) {
        return Err(TriageError::inference(format!(
            "{attribute}: non-finite logits"
        )));
    }

    let probs = if attribute.is_multi_label() {
        logits.iter().map(|&x| sigmoid(x)).collect()
    } else {
        softmax(logits)
    };

    let scores = labels
        .labels()
        .iter()
        .zip(probs)
        .map(|(label, p)| LabelScore::new(label.clone(), p.clamp(0.0, 1.0)))
        .collect();
    ClassificationResult::new(attribute, scores)
}

/// Reject empty text before it reaches a model.
pub fn require_text(attribute: Attribute, text: &str) -> Result<(), TriageError> {
    if text.trim().is_empty() {
        return Err(TriageError::inference(format!(
            "{attribute}: input text is empty"
        )));
    }
    Ok(())
}

// ── Activation helpers ──

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(attr: Attribute, names: &[&str]) -> LabelMap {
        LabelMap::new(attr, names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn softmax_sums_to_one() {
        let map = labels(Attribute::Priority, &["High", "Low", "Medium"]);
        let result = scores_from_logits(&map, &[2.0, -1.0, 0.5]).unwrap();
        let sum: f32 = result.labels.iter().map(|l| l.confidence).sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum was {sum}");
        assert_eq!(result.top().unwrap().label, "High");
        assert!(!result.is_multi_label);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let map = labels(Attribute::Type, &["Bug", "Question"]);
        let result = scores_from_logits(&map, &[1000.0, 999.0]).unwrap();
        assert_eq!(result.top().unwrap().label, "Bug");
        assert!(result.labels.iter().all(|l| l.confidence.is_finite()));
    }

    #[test]
    fn sigmoid_scores_independently() {
        let map = labels(Attribute::Tags, &["bug", "login", "billing"]);
        let result = scores_from_logits(&map, &[2.2, 0.85, -2.2]).unwrap();
        assert!(result.is_multi_label);
        let by_label = |name: &str| {
            result
                .labels
                .iter()
                .find(|l| l.label == name)
                .unwrap()
                .confidence
        };
        assert!(by_label("bug") > 0.89);
        assert!(by_label("login") > 0.69 && by_label("login") < 0.71);
        assert!(by_label("billing") < 0.11);
        let sum: f32 = result.labels.iter().map(|l| l.confidence).sum();
        assert!(sum > 1.0, "multi-label scores are not normalized");
    }

    #[test]
    fn logit_count_mismatch() {
        let map = labels(Attribute::Department, &["Support", "Sales"]);
        let err = scores_from_logits(&map, &[1.0]).unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn non_finite_logits_rejected() {
        let map = labels(Attribute::Department, &["Support", "Sales"]);
        assert!(scores_from_logits(&map, &[f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn empty_text_rejected() {
        assert!(require_text(Attribute::Tags, "  \n").is_err());
        assert!(require_text(Attribute::Tags, "vpn").is_ok());
    }
}
