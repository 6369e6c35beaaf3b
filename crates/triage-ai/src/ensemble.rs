//! The four-attribute classifier ensemble.
//!
//! Classifiers are loaded once at startup and shared read-only across ticket
//! runs. Inference is CPU-bound, so each call runs on tokio's blocking pool
//! under a per-call timeout. [`Ensemble::classify_all`] dispatches all four
//! attributes at once and waits for every result before returning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};
use triage_core::{Attribute, ClassificationResult, EnrichmentRecord, TagThresholds, TriageError};

use crate::classifier::{TextClassifier, require_text};

#[derive(Clone)]
pub struct Ensemble {
    classifiers: BTreeMap<Attribute, Arc<dyn TextClassifier>>,
    timeout: Duration,
    tag_thresholds: TagThresholds,
}

impl Ensemble {
    pub fn new(timeout: Duration) -> Self {
        Self {
            classifiers: BTreeMap::new(),
            timeout,
            tag_thresholds: TagThresholds::default(),
        }
    }

    /// Register (or replace) the classifier for its attribute.
    pub fn with_classifier(mut self, classifier: Arc<dyn TextClassifier>) -> Self {
        self.classifiers.insert(classifier.attribute(), classifier);
        self
    }

    pub fn with_tag_thresholds(mut self, thresholds: TagThresholds) -> Self {
        self.tag_thresholds = thresholds;
        self
    }

    pub fn tag_thresholds(&self) -> &TagThresholds {
        &self.tag_thresholds
    }

    /// Attributes with no classifier registered.
    pub fn missing(&self) -> Vec<Attribute> {
        Attribute::ALL
            .into_iter()
            .filter(|a| !self.classifiers.contains_key(a))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Classify `text` for a single attribute.
    pub async fn classify(
        &self,
        attribute: Attribute,
        text: &str,
    ) -> Result<ClassificationResult, TriageError> {
        let classifier = self
            .classifiers
            .get(&attribute)
            .cloned()
            .ok_or_else(|| TriageError::ModelUnavailable {
                attribute,
                reason: "no classifier loaded".into(),
            })?;
        require_text(attribute, text)?;

        let owned = text.to_string();
        let task = tokio::task::spawn_blocking(move || classifier.classify(&owned));
        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TriageError::ModelUnavailable {
                attribute,
                reason: format!("classifier task failed: {join_err}"),
            }),
            Err(_) => {
                warn!(%attribute, timeout_ms = self.timeout.as_millis() as u64, "classifier timed out");
                Err(TriageError::Timeout {
                    operation: format!("classify {attribute}"),
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }?;

        if result.attribute != attribute {
            return Err(TriageError::inference(format!(
                "classifier for {attribute} answered for {}",
                result.attribute
            )));
        }
        debug!(
            %attribute,
            top = result.top().map(|l| l.label.as_str()).unwrap_or(""),
            "classified"
        );
        Ok(result)
    }

    /// Classify every attribute in parallel. Returns one entry per attribute,
    /// in [`Attribute::ALL`] order, each carrying its own outcome.
    pub async fn classify_all(
        &self,
        text: &str,
    ) -> Vec<(Attribute, Result<ClassificationResult, TriageError>)> {
        let calls = Attribute::ALL.map(|attr| async move { (attr, self.classify(attr, text).await) });
        join_all(calls).await
    }

    /// Full enrichment pass: classify all four attributes, then normalize.
    ///
    /// The first classifier error (in attribute order) fails the pass; no
    /// partial record is produced.
    pub async fn enrich(
        &self,
        text: &str,
    ) -> Result<(Vec<ClassificationResult>, EnrichmentRecord), TriageError> {
        let mut results = Vec::with_capacity(Attribute::ALL.len());
        for (_, outcome) in self.classify_all(text).await {
            results.push(outcome?);
        }
        let record = triage_core::normalize(&results, &self.tag_thresholds)?;
        Ok((results, record))
    }
}

#[cfg(feature = "onnx")]
impl Ensemble {
    /// Load one [`OnnxClassifier`](crate::OnnxClassifier) per attribute from
    /// `models_dir/<attribute>/`. Per-label thresholds from the tags model
    /// are layered over `tag_threshold`.
    pub fn load_onnx(
        models_dir: &std::path::Path,
        timeout: Duration,
        tag_threshold: f32,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut ensemble = Self::new(timeout);
        for attribute in Attribute::ALL {
            let dir = models_dir.join(attribute.as_str());
            let classifier = crate::OnnxClassifier::load(attribute, &dir)
                .with_context(|| format!("loading {attribute} classifier"))?;
            if attribute == Attribute::Tags {
                ensemble.tag_thresholds = classifier.labels().tag_thresholds(tag_threshold);
            }
            ensemble = ensemble.with_classifier(Arc::new(classifier));
        }
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::LabelScore;

    struct Fixed {
        attribute: Attribute,
        labels: Vec<(&'static str, f32)>,
        delay: Duration,
    }

    impl Fixed {
        fn new(attribute: Attribute, labels: &[(&'static str, f32)]) -> Self {
            Self {
                attribute,
                labels: labels.to_vec(),
                delay: Duration::ZERO,
            }
        }
    }

    impl TextClassifier for Fixed {
        fn attribute(&self) -> Attribute {
            self.attribute
        }

        fn classify(&self, _text: &str) -> Result<ClassificationResult, TriageError> {
            std::thread::sleep(self.delay);
            ClassificationResult::new(
                self.attribute,
                self.labels.iter().map(|&(l, c)| LabelScore::new(l, c)).collect(),
            )
        }
    }

    struct Broken(Attribute);

    impl TextClassifier for Broken {
        fn attribute(&self) -> Attribute {
            self.0
        }

        fn classify(&self, _text: &str) -> Result<ClassificationResult, TriageError> {
            Err(TriageError::inference("tensor shape mismatch"))
        }
    }

    fn login_ensemble() -> Ensemble {
        Ensemble::new(Duration::from_secs(5))
            .with_classifier(Arc::new(Fixed::new(
                Attribute::Tags,
                &[("login", 0.9), ("bug", 0.7), ("billing", 0.1)],
            )))
            .with_classifier(Arc::new(Fixed::new(Attribute::Department, &[("Support", 0.95), ("Sales", 0.05)])))
            .with_classifier(Arc::new(Fixed::new(Attribute::Type, &[("Bug", 0.88), ("Question", 0.12)])))
            .with_classifier(Arc::new(Fixed::new(Attribute::Priority, &[("High", 0.8), ("Low", 0.2)])))
    }

    #[tokio::test]
    async fn enrich_login_ticket() {
        let ensemble = login_ensemble();
        assert!(ensemble.is_complete());
        let (results, record) = ensemble
            .enrich("Cannot log in Getting 500 error since this morning")
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(
            record.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            ["bug", "login"]
        );
        assert_eq!(record.department, "Support");
        assert_eq!(record.ticket_type, "Bug");
        assert_eq!(record.priority, "High");
    }

    #[tokio::test]
    async fn missing_classifier_is_model_unavailable() {
        let ensemble = Ensemble::new(Duration::from_secs(1))
            .with_classifier(Arc::new(Fixed::new(Attribute::Tags, &[("vpn", 0.9)])));
        assert_eq!(
            ensemble.missing(),
            [Attribute::Department, Attribute::Type, Attribute::Priority]
        );
        let err = ensemble.classify(Attribute::Priority, "vpn down").await.unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[tokio::test]
    async fn empty_text_is_inference_error() {
        let err = login_ensemble()
            .classify(Attribute::Tags, "   ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let mut slow = Fixed::new(Attribute::Type, &[("Bug", 1.0)]);
        slow.delay = Duration::from_millis(300);
        let ensemble = Ensemble::new(Duration::from_millis(20)).with_classifier(Arc::new(slow));
        let err = ensemble.classify(Attribute::Type, "crash").await.unwrap_err();
        assert!(matches!(err, TriageError::Timeout { after_ms: 20, .. }));
    }

    #[tokio::test]
    async fn classify_all_runs_in_parallel() {
        let delay = Duration::from_millis(150);
        let mut ensemble = Ensemble::new(Duration::from_secs(5));
        for (attr, label) in [
            (Attribute::Tags, "vpn"),
            (Attribute::Department, "IT"),
            (Attribute::Type, "Incident"),
            (Attribute::Priority, "Low"),
        ] {
            let mut c = Fixed::new(attr, &[(label, 1.0)]);
            c.delay = delay;
            ensemble = ensemble.with_classifier(Arc::new(c));
        }
        let started = std::time::Instant::now();
        let outcomes = ensemble.classify_all("vpn keeps dropping").await;
        assert!(started.elapsed() < delay * 3, "took {:?}", started.elapsed());
        let attrs: Vec<_> = outcomes.iter().map(|(a, _)| *a).collect();
        assert_eq!(attrs, Attribute::ALL);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test]
    async fn one_failure_fails_the_pass() {
        let ensemble = login_ensemble().with_classifier(Arc::new(Broken(Attribute::Department)));
        let err = ensemble.enrich("Cannot log in").await.unwrap_err();
        assert_eq!(err, TriageError::inference("tensor shape mismatch"));
    }

    #[tokio::test]
    async fn per_label_threshold_applies() {
        let thresholds = TagThresholds {
            default: 0.5,
            per_label: [("bug".to_string(), 0.75)].into_iter().collect(),
        };
        let ensemble = login_ensemble().with_tag_thresholds(thresholds);
        let (_, record) = ensemble.enrich("Cannot log in").await.unwrap();
        assert_eq!(record.tags.iter().map(String::as_str).collect::<Vec<_>>(), ["login"]);
    }
}
