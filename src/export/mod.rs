//! Model persistence
//!
//! A trained pipeline is stored together with the ordered feature manifest
//! it was fitted on, so a later run can detect schema drift.

mod bundle;

pub use bundle::{BundleMetadata, ModelBundle, TrainingMode};
