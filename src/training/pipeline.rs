//! Ordered model pipeline: median imputation, standardization, then the
//! multi-output boosted ensemble.

use super::gradient_boosting::BoostingConfig;
use super::multi_output::MultiOutputRegressor;
use crate::error::{ForecastError, Result};
use crate::preprocessing::{ImputeStrategy, Imputer, StandardScaler};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Fitted (or unfitted) regression pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    imputer: Imputer,
    scaler: StandardScaler,
    model: MultiOutputRegressor,
}

impl Pipeline {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            imputer: Imputer::new(ImputeStrategy::Median),
            scaler: StandardScaler::new(),
            model: MultiOutputRegressor::new(config),
        }
    }

    /// Refit every stage on `(x, y)`. The pipeline is left untouched when
    /// any stage fails.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(ForecastError::ValidationError(
                "Cannot fit pipeline on zero rows".to_string(),
            ));
        }
        if x.nrows() != y.nrows() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} target rows", x.nrows()),
                actual: format!("{} target rows", y.nrows()),
            });
        }

        let mut imputer = Imputer::new(self.imputer.strategy().clone());
        let imputed = imputer.fit_transform(x)?;

        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&imputed)?;

        let mut model = MultiOutputRegressor::new(self.model.config().clone());
        model.fit(&scaled, y)?;

        self.imputer = imputer;
        self.scaler = scaler;
        self.model = model;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let imputed = self.imputer.transform(x)?;
        let scaled = self.scaler.transform(&imputed)?;
        self.model.predict(&scaled)
    }

    /// Same hyperparameters, no learned state
    pub fn unfitted_clone(&self) -> Self {
        Self {
            imputer: Imputer::new(self.imputer.strategy().clone()),
            scaler: StandardScaler::new(),
            model: MultiOutputRegressor::new(self.model.config().clone()),
        }
    }

    /// A pipeline counts as fitted once its imputer holds statistics
    pub fn is_fitted(&self) -> bool {
        self.imputer.is_fitted() && self.model.is_fitted()
    }

    pub fn n_outputs(&self) -> usize {
        self.model.n_outputs()
    }

    pub fn n_features_in(&self) -> Option<usize> {
        self.imputer.statistics().map(|s| s.len())
    }

    pub fn imputer(&self) -> &Imputer {
        &self.imputer
    }

    pub fn boosting_config(&self) -> &BoostingConfig {
        self.model.config()
    }

    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        self.model.feature_importances()
    }
}

/// Builds untrained pipelines with fixed hyperparameters
#[derive(Debug, Clone, Default)]
pub struct PipelineFactory {
    config: BoostingConfig,
}

impl PipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: BoostingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn create(&self) -> Pipeline {
        Pipeline::new(self.config.clone())
    }
}
