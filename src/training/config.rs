//! Incremental training configuration

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the incremental batch-training engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Rows per batch
    pub batch_size: usize,

    /// Passes over the training rows
    pub epochs: usize,

    /// Warm-start sample is `warm_start_multiplier * batch_size` rows, capped at n
    pub warm_start_multiplier: usize,

    /// Frozen evaluation holdout size, capped at n
    pub holdout_size: usize,

    /// Folds for the final cross-validated evaluation
    pub cv_folds: usize,

    /// Random seed for warm start, holdout, shuffling and CV
    pub random_state: Option<u64>,

    /// Log progress every this many batches (0 disables)
    pub progress_interval: usize,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            epochs: 10,
            warm_start_multiplier: 10,
            holdout_size: 1000,
            cv_folds: 5,
            random_state: Some(42),
            progress_interval: 10,
        }
    }
}

impl IncrementalConfig {
    pub fn new(batch_size: usize, epochs: usize) -> Self {
        Self {
            batch_size,
            epochs,
            ..Default::default()
        }
    }

    /// Builder method to set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to set epochs
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_holdout_size(mut self, holdout_size: usize) -> Self {
        self.holdout_size = holdout_size;
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Builder method to set random state
    pub fn with_random_state(mut self, seed: Option<u64>) -> Self {
        self.random_state = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("epochs", self.epochs),
            ("warm_start_multiplier", self.warm_start_multiplier),
            ("holdout_size", self.holdout_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ForecastError::InvalidParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.cv_folds < 2 {
            return Err(ForecastError::InvalidParameter {
                name: "cv_folds".to_string(),
                value: self.cv_folds.to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}
