#[cfg(feature = "onnx")]
mod onnx;

use crate::emotion::{EmotionScores, EMOTION_COUNT};
use crate::features::FEATURE_WIDTH;
use ndarray::Array2;
use std::sync::Arc;

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmotionClassifier;

#[derive(thiserror::Error, Debug)]
pub enum ClassifierError {
    #[error("failed to load model from {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("model input must have {expected} columns, got {got}")]
    InputWidth { got: usize, expected: usize },
    #[error("model output has shape {shape:?}, expected [{rows}, 8]")]
    OutputShape { shape: Vec<i64>, rows: usize },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("classifier is unavailable: {0}")]
    Unavailable(String),
}

/// Maps standardized feature rows to one probability vector per row.
pub trait EmotionClassifier: Send + Sync {
    fn predict(&self, rows: &Array2<f32>) -> Result<Vec<EmotionScores>, ClassifierError>;

    fn name(&self) -> &str;
}

pub type SharedClassifier = Arc<dyn EmotionClassifier>;

pub(crate) fn check_input_width(rows: &Array2<f32>) -> Result<(), ClassifierError> {
    if rows.ncols() != FEATURE_WIDTH {
        return Err(ClassifierError::InputWidth {
            got: rows.ncols(),
            expected: FEATURE_WIDTH,
        });
    }
    Ok(())
}

/// Returns the same distribution for every row.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedEmotionClassifier {
    scores: EmotionScores,
}

impl FixedEmotionClassifier {
    pub fn new(scores: EmotionScores) -> Self {
        Self { scores }
    }

    /// Equal probability for every class.
    pub fn uniform() -> Self {
        Self::new([1.0 / EMOTION_COUNT as f32; EMOTION_COUNT])
    }

    pub fn scores(&self) -> &EmotionScores {
        &self.scores
    }
}

impl Default for FixedEmotionClassifier {
    fn default() -> Self {
        Self::uniform()
    }
}

impl EmotionClassifier for FixedEmotionClassifier {
    fn predict(&self, rows: &Array2<f32>) -> Result<Vec<EmotionScores>, ClassifierError> {
        check_input_width(rows)?;
        Ok(vec![self.scores; rows.nrows()])
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
