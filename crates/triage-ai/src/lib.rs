//! Inference layer: per-attribute ticket classifiers (ONNX Runtime) and the
//! reasoning-engine client that drives the agent.

pub mod classifier;
pub mod engine;
pub mod ensemble;
pub mod labels;
#[cfg(feature = "onnx")]
mod onnx;

pub use classifier::{TextClassifier, scores_from_logits};
pub use engine::{ChatMessage, CompletionRequest, OllamaEngine, ReasoningEngine, Role};
pub use ensemble::Ensemble;
pub use labels::LabelMap;
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
