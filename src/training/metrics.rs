//! Regression metrics over multi-output target matrices
//!
//! Multi-output scores are the uniform average of the per-column scores.

use crate::error::{ForecastError, Result};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Point metrics for one prediction set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub r2: f64,
    pub mse: f64,
    pub rmse: f64,
}

impl RegressionMetrics {
    pub fn compute(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<Self> {
        let mse = mean_squared_error(y_true, y_pred)?;
        Ok(Self {
            r2: r2_score(y_true, y_pred)?,
            mse,
            rmse: mse.sqrt(),
        })
    }
}

fn check_shapes(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<()> {
    if y_true.dim() != y_pred.dim() {
        return Err(ForecastError::ShapeError {
            expected: format!("{:?}", y_true.dim()),
            actual: format!("{:?}", y_pred.dim()),
        });
    }
    if y_true.is_empty() {
        return Err(ForecastError::ValidationError(
            "Cannot score an empty prediction set".to_string(),
        ));
    }
    Ok(())
}

/// Coefficient of determination for a single output.
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r2_column(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    let n = y_true.len() as f64;
    let mean = y_true.sum() / n;
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();

    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Uniform-average R² across outputs
pub fn r2_score(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
    check_shapes(y_true, y_pred)?;
    let total: f64 = y_true
        .axis_iter(Axis(1))
        .zip(y_pred.axis_iter(Axis(1)))
        .map(|(t, p)| r2_column(t, p))
        .sum();
    Ok(total / y_true.ncols() as f64)
}

/// Uniform-average mean squared error across outputs
pub fn mean_squared_error(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
    check_shapes(y_true, y_pred)?;
    let sum: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    Ok(sum / y_true.len() as f64)
}
