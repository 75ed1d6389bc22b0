//! Column standardization of feature matrices before classification.

use crate::features::FEATURE_WIDTH;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ScalerError {
    #[error("failed to read scaler file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scaler file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scaler width mismatch: mean={mean} scale={scale}, expected {expected}")]
    Width {
        mean: usize,
        scale: usize,
        expected: usize,
    },
    #[error("scaler contains a non-finite or zero scale at column {0}")]
    InvalidScale(usize),
    #[error("feature matrix has {got} columns, scaler expects {expected}")]
    ColumnMismatch { got: usize, expected: usize },
}

/// Global mean/scale pair fitted offline on training features.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FittedScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl FittedScaler {
    pub fn load(path: &Path) -> Result<Self, ScalerError> {
        let raw = std::fs::read_to_string(path)?;
        let scaler: Self = serde_json::from_str(&raw)?;
        scaler.validate()?;
        Ok(scaler)
    }

    pub fn validate(&self) -> Result<(), ScalerError> {
        if self.mean.len() != FEATURE_WIDTH || self.scale.len() != FEATURE_WIDTH {
            return Err(ScalerError::Width {
                mean: self.mean.len(),
                scale: self.scale.len(),
                expected: FEATURE_WIDTH,
            });
        }
        if let Some(col) = self.scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScalerError::InvalidScale(col));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScalerMode {
    /// Fit on the rows of each matrix and transform those same rows.
    #[default]
    PerSegment,
    Fitted(FittedScaler),
}

impl ScalerMode {
    pub fn standardize(&self, rows: &Array2<f32>) -> Result<Array2<f32>, ScalerError> {
        match self {
            Self::PerSegment => Ok(standardize_rows(rows)),
            Self::Fitted(scaler) => {
                if rows.ncols() != scaler.mean.len() {
                    return Err(ScalerError::ColumnMismatch {
                        got: rows.ncols(),
                        expected: scaler.mean.len(),
                    });
                }
                let mean = Array1::from(scaler.mean.clone());
                let scale = Array1::from(scaler.scale.clone());
                Ok((rows - &mean) / &scale)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PerSegment => "per-segment",
            Self::Fitted(_) => "fitted",
        }
    }
}

/// Zero mean, unit population variance per column; constant columns are only centred.
pub fn standardize_rows(rows: &Array2<f32>) -> Array2<f32> {
    if rows.nrows() == 0 {
        return rows.clone();
    }
    let n = rows.nrows() as f64;
    let mut out = rows.clone();
    for mut column in out.axis_iter_mut(Axis(1)) {
        let mean = column.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
        let var = column
            .iter()
            .map(|&x| (f64::from(x) - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std > f64::EPSILON { std } else { 1.0 };
        column.mapv_inplace(|x| ((f64::from(x) - mean) / scale) as f32);
    }
    out
}
