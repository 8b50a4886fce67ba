//! One boosted regressor per target column

use super::gradient_boosting::{BoostingConfig, GradientBoostingRegressor};
use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Multi-output wrapper fitting an independent regressor per output.
/// Outputs are fitted in parallel; the call returns only after all finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOutputRegressor {
    config: BoostingConfig,
    estimators: Vec<GradientBoostingRegressor>,
}

impl MultiOutputRegressor {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            estimators: Vec::new(),
        }
    }

    pub fn config(&self) -> &BoostingConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        !self.estimators.is_empty()
    }

    /// Number of outputs the fitted model produces, 0 when unfitted
    pub fn n_outputs(&self) -> usize {
        self.estimators.len()
    }

    /// Fit every output. Previous estimators are kept if any output fails.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if x.nrows() != y.nrows() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} target rows", x.nrows()),
                actual: format!("{} target rows", y.nrows()),
            });
        }
        if y.ncols() == 0 {
            return Err(ForecastError::ValidationError(
                "At least one target column is required".to_string(),
            ));
        }

        let estimators = (0..y.ncols())
            .into_par_iter()
            .map(|j| {
                let target: Array1<f64> = y.column(j).to_owned();
                let mut model = GradientBoostingRegressor::new(self.config.clone());
                model
                    .fit(x, &target)
                    .map_err(|e| ForecastError::TrainingError(format!("output {}: {}", j, e)))?;
                Ok(model)
            })
            .collect::<Result<Vec<_>>>()?;

        self.estimators = estimators;
        Ok(())
    }

    /// Predict all outputs, one column per target
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(ForecastError::ModelNotFitted);
        }

        let columns = self
            .estimators
            .par_iter()
            .map(|m| m.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let mut out = Array2::zeros((x.nrows(), columns.len()));
        for (j, col) in columns.into_iter().enumerate() {
            out.column_mut(j).assign(&col);
        }
        Ok(out)
    }

    /// Feature importances averaged over outputs
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        let first = self.estimators.first()?;
        let mut total = Array1::<f64>::zeros(first.feature_importances().len());
        for est in &self.estimators {
            total += &Array1::from(est.feature_importances().to_vec());
        }
        Some(total / self.estimators.len() as f64)
    }

    pub fn estimators(&self) -> &[GradientBoostingRegressor] {
        &self.estimators
    }
}
