//! Model evaluation
//!
//! Cross-validated and holdout metrics for a pipeline. Failures inside a
//! metric block are recorded in the result instead of being raised, so a
//! run still reports whatever could be computed.

pub mod report;

pub use report::{ReportConfig, ReportContext, Reporter};

use crate::error::{ForecastError, Result};
use crate::training::cross_validation::{CVResults, KFold};
use crate::training::metrics::{mean_squared_error, r2_score, RegressionMetrics};
use crate::training::Pipeline;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Cross-validation block of the metrics document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CvMetrics {
    pub r2_mean: Option<f64>,
    pub r2_std: Option<f64>,
    pub rmse_mean: Option<f64>,
    pub rmse_std: Option<f64>,
    pub mse_mean: Option<f64>,
    pub mse_std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CvMetrics {
    fn unavailable(error: &ForecastError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

/// Holdout block of the metrics document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HoldoutMetrics {
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub mse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RegressionMetrics> for HoldoutMetrics {
    fn from(m: RegressionMetrics) -> Self {
        Self {
            r2: Some(m.r2),
            rmse: Some(m.rmse),
            mse: Some(m.mse),
            error: None,
        }
    }
}

/// Combined evaluation result, serialized as `{"cv": …, "validation": …}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub cv: CvMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<HoldoutMetrics>,
}

/// Holdout pair borrowed for scoring
#[derive(Debug, Clone, Copy)]
pub struct Holdout<'a> {
    pub x: &'a Array2<f64>,
    pub y: &'a Array2<f64>,
}

impl<'a> Holdout<'a> {
    pub fn new(x: &'a Array2<f64>, y: &'a Array2<f64>) -> Self {
        Self { x, y }
    }
}

/// K-fold evaluator
#[derive(Debug, Clone)]
pub struct Evaluator {
    folds: usize,
    random_state: Option<u64>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            folds: 5,
            random_state: Some(42),
        }
    }
}

impl Evaluator {
    pub fn new(folds: usize) -> Self {
        Self {
            folds,
            ..Default::default()
        }
    }

    pub fn with_random_state(mut self, seed: Option<u64>) -> Self {
        self.random_state = seed;
        self
    }

    /// Cross-validate fresh copies of `model` on `(x, y)` and, when a
    /// holdout is given, score `model` itself on it. `model` is not modified.
    pub fn evaluate(
        &self,
        model: &Pipeline,
        x: &Array2<f64>,
        y: &Array2<f64>,
        holdout: Option<Holdout<'_>>,
    ) -> EvaluationReport {
        let cv = match self.cross_validate(model, x, y) {
            Ok(cv) => {
                info!(
                    r2_mean = ?cv.r2_mean,
                    r2_std = ?cv.r2_std,
                    rmse_mean = ?cv.rmse_mean,
                    "Cross-validation finished"
                );
                cv
            }
            Err(e) => {
                warn!(error = %e, "Cross-validation unavailable");
                CvMetrics::unavailable(&e)
            }
        };

        let validation = holdout.map(|h| match score(model, h.x, h.y) {
            Ok(m) => {
                info!(r2 = m.r2, rmse = m.rmse, mse = m.mse, "Holdout metrics");
                HoldoutMetrics::from(m)
            }
            Err(e) => {
                warn!(error = %e, "Holdout metrics unavailable");
                HoldoutMetrics {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        });

        EvaluationReport { cv, validation }
    }

    fn cross_validate(&self, model: &Pipeline, x: &Array2<f64>, y: &Array2<f64>) -> Result<CvMetrics> {
        if x.nrows() != y.nrows() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} target rows", x.nrows()),
                actual: format!("{} target rows", y.nrows()),
            });
        }

        let splits = KFold::new(self.folds)
            .with_random_state(self.random_state)
            .split(x.nrows())?;

        let mut r2_scores = Vec::with_capacity(splits.len());
        let mut mse_scores = Vec::with_capacity(splits.len());

        for split in &splits {
            let x_train = x.select(Axis(0), &split.train_indices);
            let y_train = y.select(Axis(0), &split.train_indices);
            let x_test = x.select(Axis(0), &split.test_indices);
            let y_test = y.select(Axis(0), &split.test_indices);

            let mut fold_model = model.unfitted_clone();
            fold_model.fit(&x_train, &y_train)?;
            let pred = fold_model.predict(&x_test)?;

            r2_scores.push(r2_score(&y_test, &pred)?);
            mse_scores.push(mean_squared_error(&y_test, &pred)?);
        }

        let rmse_scores: Vec<f64> = mse_scores.iter().map(|m| m.sqrt()).collect();
        let r2 = CVResults::from_scores(r2_scores);
        let mse = CVResults::from_scores(mse_scores);
        let rmse = CVResults::from_scores(rmse_scores);

        Ok(CvMetrics {
            r2_mean: Some(r2.mean_score),
            r2_std: Some(r2.std_score),
            rmse_mean: Some(rmse.mean_score),
            rmse_std: Some(rmse.std_score),
            mse_mean: Some(mse.mean_score),
            mse_std: Some(mse.std_score),
            error: None,
        })
    }
}

/// Score a fitted model on a labelled set
pub fn score(model: &Pipeline, x: &Array2<f64>, y: &Array2<f64>) -> Result<RegressionMetrics> {
    let pred = model.predict(x)?;
    RegressionMetrics::compute(y, &pred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{BoostingConfig, PipelineFactory};

    fn light_factory() -> PipelineFactory {
        PipelineFactory::new().with_config(BoostingConfig {
            n_estimators: 10,
            learning_rate: 0.2,
            ..Default::default()
        })
    }

    fn data(n: usize) -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| ((i * 31 + j * 17) % 23) as f64);
        let y = Array2::from_shape_fn((n, 2), |(i, j)| x[[i, j]] * 3.0 + x[[i, 2]]);
        (x, y)
    }

    #[test]
    fn test_evaluate_with_holdout() {
        let (x, y) = data(100);
        let mut model = light_factory().create();
        model.fit(&x, &y).unwrap();

        let report = Evaluator::new(5).evaluate(&model, &x, &y, Some(Holdout::new(&x, &y)));
        assert!(report.cv.is_available());
        assert!(report.cv.r2_mean.is_some());
        let validation = report.validation.unwrap();
        assert!(validation.r2.unwrap() > 0.5);
        assert!((validation.rmse.unwrap() - validation.mse.unwrap().sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_cv_failure_is_recorded() {
        let (x, y) = data(3);
        let mut model = light_factory().create();
        model.fit(&x, &y).unwrap();

        let report = Evaluator::new(5).evaluate(&model, &x, &y, None);
        assert!(!report.cv.is_available());
        assert!(report.cv.r2_mean.is_none());
        assert!(report.validation.is_none());
    }

    #[test]
    fn test_holdout_failure_is_recorded() {
        let (x, y) = data(50);
        let model = light_factory().create();
        let report = Evaluator::new(5).evaluate(&model, &x, &y, Some(Holdout::new(&x, &y)));
        let validation = report.validation.unwrap();
        assert!(validation.r2.is_none());
        assert!(validation.error.is_some());
    }

    #[test]
    fn test_json_shape() {
        let report = EvaluationReport {
            cv: CvMetrics::default(),
            validation: Some(HoldoutMetrics::default()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["cv"]["r2_mean"].is_null());
        assert!(json["validation"].get("mse").is_some());
        assert!(json["cv"].get("error").is_none());
    }
}
