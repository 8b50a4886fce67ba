//! Model training module
//!
//! - Regression trees and gradient boosting
//! - Multi-output wrapper and the imputer/scaler/model pipeline
//! - The incremental batch-training engine
//! - Full and incremental training sessions

mod config;
mod engine;
mod multi_output;
mod pipeline;
mod session;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod metrics;

pub use config::IncrementalConfig;
pub use engine::{
    BatchOutcome, BatchStatus, CheckpointOrigin, EngineState, IncrementalTrainer, RunSummary, TrainingOutcome,
    INCREMENTAL_METRICS_FILE,
};
pub use multi_output::MultiOutputRegressor;
pub use pipeline::{Pipeline, PipelineFactory};
pub use session::{RunConfig, SessionResult, TrainingSession, FULL_METRICS_FILE};
pub use cross_validation::{CVResults, CVSplit, KFold};
pub use decision_tree::{DecisionTree, TreeNode};
pub use gradient_boosting::{BoostingConfig, GradientBoostingRegressor};
pub use metrics::{mean_squared_error, r2_score, RegressionMetrics};
