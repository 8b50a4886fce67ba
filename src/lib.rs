//! Engagement Forecast - incremental multi-output regression for
//! marketing-analytics extracts
//!
//! CSV extracts are loaded and cleaned, turned into numeric feature and
//! target matrices, and fed to an incremental batch-training engine that
//! keeps the best-scoring checkpoint on a frozen holdout. The fitted
//! pipeline is stored with its feature manifest so later runs can detect
//! schema drift.
//!
//! # Modules
//!
//! - [`utils`] - CSV loading, sentinel cleaning, de-duplication
//! - [`preprocessing`] - Imputation, scaling, feature and target selection
//! - [`training`] - Boosted trees, pipeline, incremental engine, sessions
//! - [`evaluation`] - Cross-validated and holdout metrics, visual report
//! - [`drift`] - Feature manifests and schema drift reconciliation
//! - [`export`] - Binary model bundle
//! - [`inference`] - Predictions from a live feature vector
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data and models
pub mod utils;
pub mod preprocessing;
pub mod training;
pub mod evaluation;

// Persistence and serving
pub mod drift;
pub mod export;
pub mod inference;

pub mod cli;

pub use error::{ForecastError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{ForecastError, Result};

    pub use crate::utils::DataLoader;

    pub use crate::preprocessing::{FeatureSelection, FeatureSelector, SelectorConfig};

    pub use crate::training::{
        BoostingConfig, IncrementalConfig, IncrementalTrainer, Pipeline, PipelineFactory, RunConfig, RunSummary,
        TrainingOutcome, TrainingSession,
    };

    pub use crate::evaluation::{EvaluationReport, Evaluator, Holdout, ReportConfig, Reporter};

    pub use crate::drift::{reconcile, DriftReport, FeatureManifest};

    pub use crate::export::{ModelBundle, TrainingMode};

    pub use crate::inference::{Prediction, Predictor};
}
