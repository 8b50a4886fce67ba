//! Data preprocessing module
//!
//! Provides the preprocessing stages of the training pipeline:
//! - Missing value imputation (median by default)
//! - Standard scaling
//! - Feature and target selection from raw frames

mod imputer;
mod scaler;
pub mod feature_selection;

pub use imputer::{mean_fill_in_place, ImputeStrategy, Imputer};
pub use scaler::StandardScaler;
pub use feature_selection::{
    plan_selection, profile_frame, ColumnKind, ColumnProfile, FeatureSelection, FeatureSelector,
    RatioFeature, ResolvedTarget, SelectionPlan, SelectorConfig, TargetAlias,
};
