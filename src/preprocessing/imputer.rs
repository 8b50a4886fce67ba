//! Missing value imputation over dense matrices

use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strategy for imputing missing values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Replace with column mean
    Mean,
    /// Replace with column median
    Median,
    /// Replace with a constant value
    Constant(f64),
}

/// Column-wise imputer for NaN cells
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputer {
    strategy: ImputeStrategy,
    /// Learned fill value per column, `None` until fitted
    statistics: Option<Array1<f64>>,
}

impl Imputer {
    /// Create a new imputer with the specified strategy
    pub fn new(strategy: ImputeStrategy) -> Self {
        Self {
            strategy,
            statistics: None,
        }
    }

    pub fn strategy(&self) -> &ImputeStrategy {
        &self.strategy
    }

    pub fn statistics(&self) -> Option<&Array1<f64>> {
        self.statistics.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.statistics.is_some()
    }

    /// Learn one fill value per column. A column with no observed value
    /// is filled with 0 so the output keeps its width.
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(ForecastError::ValidationError(
                "Cannot fit imputer on zero rows".to_string(),
            ));
        }

        let stats: Array1<f64> = x
            .axis_iter(Axis(1))
            .map(|col| self.fill_value(col))
            .collect();
        self.statistics = Some(stats);
        Ok(self)
    }

    /// Replace NaN cells with the learned statistics
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let stats = self.statistics.as_ref().ok_or(ForecastError::ModelNotFitted)?;
        if x.ncols() != stats.len() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} features", stats.len()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut out = x.clone();
        for (mut col, &fill) in out.axis_iter_mut(Axis(1)).zip(stats.iter()) {
            col.mapv_inplace(|v| if v.is_nan() { fill } else { v });
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    fn fill_value(&self, col: ArrayView1<f64>) -> f64 {
        match self.strategy {
            ImputeStrategy::Constant(v) => v,
            ImputeStrategy::Mean => {
                let observed: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
                if observed.is_empty() {
                    0.0
                } else {
                    observed.iter().sum::<f64>() / observed.len() as f64
                }
            }
            ImputeStrategy::Median => {
                let mut observed: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
                median(&mut observed).unwrap_or(0.0)
            }
        }
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Mean-fill NaN cells in place, independent of any fitted imputer.
/// Returns the number of cells filled.
pub fn mean_fill_in_place(x: &mut Array2<f64>) -> usize {
    let mut filled = 0;
    for mut col in x.axis_iter_mut(Axis(1)) {
        let (sum, count) = col
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        for v in col.iter_mut() {
            if v.is_nan() {
                *v = mean;
                filled += 1;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_imputation() {
        let x = array![[1.0, f64::NAN], [f64::NAN, 4.0], [3.0, 6.0], [10.0, 8.0]];
        let mut imputer = Imputer::new(ImputeStrategy::Median);
        let out = imputer.fit_transform(&x).unwrap();

        assert_eq!(out[[1, 0]], 3.0);
        assert_eq!(out[[0, 1]], 6.0);
        assert!(out.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_mean_imputation() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let mut imputer = Imputer::new(ImputeStrategy::Mean);
        let out = imputer.fit_transform(&x).unwrap();
        assert_eq!(out[[1, 0]], 2.0);
    }

    #[test]
    fn test_all_missing_column_keeps_width() {
        let x = array![[f64::NAN, 1.0], [f64::NAN, 2.0]];
        let mut imputer = Imputer::new(ImputeStrategy::Median);
        let out = imputer.fit_transform(&x).unwrap();
        assert_eq!(out.ncols(), 2);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_unfitted() {
        let imputer = Imputer::new(ImputeStrategy::Median);
        assert!(!imputer.is_fitted());
        assert!(matches!(imputer.transform(&array![[1.0]]), Err(ForecastError::ModelNotFitted)));
    }

    #[test]
    fn test_mean_fill_in_place() {
        let mut x = array![[1.0, f64::NAN], [3.0, f64::NAN]];
        let filled = mean_fill_in_place(&mut x);
        assert_eq!(filled, 2);
        assert_eq!(x[[0, 1]], 0.0);
    }
}
