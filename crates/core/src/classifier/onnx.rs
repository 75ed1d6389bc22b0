use super::{check_input_width, ClassifierError, EmotionClassifier};
use crate::emotion::{EmotionScores, EMOTION_COUNT};
use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

const INTRA_THREADS: usize = 4;

/// ONNX Runtime session loaded once at start-up.
///
/// `Session::run` needs exclusive access, so runs are serialized.
pub struct OnnxEmotionClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl std::fmt::Debug for OnnxEmotionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmotionClassifier")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish()
    }
}

impl OnnxEmotionClassifier {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let load_err = |e: ort::Error| ClassifierError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let session = Session::builder()
            .map_err(load_err)?
            .with_intra_threads(INTRA_THREADS)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ClassifierError::Load {
                path: path.display().to_string(),
                reason: "model declares no inputs".to_owned(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ClassifierError::Load {
                path: path.display().to_string(),
                reason: "model declares no outputs".to_owned(),
            })?;

        tracing::info!(
            model = %path.display(),
            input = %input_name,
            output = %output_name,
            "loaded emotion classifier"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn predict(&self, rows: &Array2<f32>) -> Result<Vec<EmotionScores>, ClassifierError> {
        check_input_width(rows)?;
        let n_rows = rows.nrows();
        let input =
            Value::from_array(rows.clone()).map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Unavailable("session lock poisoned".to_owned()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 2 || dims[0] as usize != n_rows || dims[1] as usize != EMOTION_COUNT {
            return Err(ClassifierError::OutputShape {
                shape: dims,
                rows: n_rows,
            });
        }

        Ok(data
            .chunks_exact(EMOTION_COUNT)
            .map(|row| {
                let mut scores = [0.0f32; EMOTION_COUNT];
                scores.copy_from_slice(row);
                scores
            })
            .collect())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmotionClassifier::load(&dir.path().join("absent.onnx")).unwrap_err();
        assert!(matches!(err, ClassifierError::Load { .. }), "{err}");
    }
}
