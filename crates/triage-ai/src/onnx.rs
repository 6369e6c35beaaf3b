//! ONNX Runtime sequence classifier for fine-tuned transformer heads.
//!
//! Each attribute directory must contain `model.onnx`, `tokenizer.json` and
//! `labels.json` (see [`LabelMap`]). The model takes BERT-style inputs
//! (`input_ids`, `attention_mask`, `token_type_ids`) and returns logits
//! shaped `[batch, num_labels]`.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};
use triage_core::{Attribute, ClassificationResult, TriageError};

use crate::classifier::{TextClassifier, require_text, scores_from_logits};
use crate::labels::LabelMap;

/// Tokens kept per ticket.
const MAX_LENGTH: usize = 256;

/// Transformer classifier running on ONNX Runtime.
///
/// `Session::run` needs exclusive access, so the session sits behind a
/// mutex; tokenizer and labels are read-only.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    labels: LabelMap,
}

impl OnnxClassifier {
    /// Load a classifier from a directory containing `model.onnx`,
    /// `tokenizer.json` and `labels.json`.
    pub fn load(attribute: Attribute, model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let labels = LabelMap::load(attribute, model_dir)?;
        let session = Session::builder()?.commit_from_file(&model_path)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(None);

        info!(
            %attribute,
            labels = labels.len(),
            model = %model_path.display(),
            "loaded classifier"
        );
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            labels,
        })
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn logits(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let seq_len = encoding.get_ids().len();
        let shape = [1i64, seq_len as i64];
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

        let ids_tensor = Tensor::from_array((shape, ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape, mask.into_boxed_slice()))?;
        let type_tensor = Tensor::from_array((shape, type_ids.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;

        let outputs = session.run(ort::inputs![
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_tensor,
        ])?;

        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        anyhow::ensure!(
            dims.len() == 2 && dims[0] == 1 && dims[1] as usize == self.labels.len(),
            "unexpected output shape: {dims:?}, expected [1, {}]",
            self.labels.len()
        );
        Ok(data.to_vec())
    }
}

impl TextClassifier for OnnxClassifier {
    fn attribute(&self) -> Attribute {
        self.labels.attribute
    }

    fn classify(&self, text: &str) -> Result<ClassificationResult, TriageError> {
        let attribute = self.attribute();
        require_text(attribute, text)?;
        let logits = self
            .logits(text)
            .map_err(|e| TriageError::inference(format!("{attribute}: {e:#}")))?;
        debug!(%attribute, "classified ticket text");
        scores_from_logits(&self.labels, &logits)
    }
}
