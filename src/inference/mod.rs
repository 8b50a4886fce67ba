//! Prediction from a stored bundle
//!
//! A live feature vector arrives as name → value pairs. It is laid out in
//! manifest order before it reaches the pipeline: features the manifest
//! expects but the vector lacks are zero, names the manifest does not know
//! are ignored. Both lists are returned with the prediction.

use crate::drift::FeatureManifest;
use crate::error::{ForecastError, Result};
use crate::export::ModelBundle;
use crate::training::Pipeline;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Prediction for one feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted value per target name
    pub values: BTreeMap<String, f64>,
    /// Manifest features absent from the input, filled with zero
    pub missing_features: Vec<String>,
    /// Input names unknown to the manifest
    pub ignored_features: Vec<String>,
}

/// Serves predictions from a fitted pipeline and its manifest
#[derive(Debug, Clone)]
pub struct Predictor {
    pipeline: Pipeline,
    manifest: FeatureManifest,
    target_names: Vec<String>,
}

impl Predictor {
    pub fn from_bundle(bundle: ModelBundle) -> Result<Self> {
        if !bundle.pipeline.is_fitted() {
            return Err(ForecastError::ModelNotFitted);
        }
        let n_outputs = bundle.pipeline.n_outputs();
        let target_names = if bundle.metadata.target_names.len() == n_outputs {
            bundle.metadata.target_names
        } else {
            (0..n_outputs).map(|i| format!("target_{}", i)).collect()
        };
        Ok(Self {
            pipeline: bundle.pipeline,
            manifest: bundle.manifest,
            target_names,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bundle(ModelBundle::load(path)?)
    }

    pub fn manifest(&self) -> &FeatureManifest {
        &self.manifest
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn predict_one(&self, features: &HashMap<String, f64>) -> Result<Prediction> {
        let mut row = Array2::zeros((1, self.manifest.len()));
        let mut missing_features = Vec::new();
        for (j, name) in self.manifest.columns().iter().enumerate() {
            match features.get(name) {
                Some(&v) => row[[0, j]] = v,
                None => missing_features.push(name.clone()),
            }
        }

        let mut ignored_features: Vec<String> = features
            .keys()
            .filter(|k| !self.manifest.contains(k))
            .cloned()
            .collect();
        ignored_features.sort();

        if !missing_features.is_empty() || !ignored_features.is_empty() {
            debug!(missing = ?missing_features, ignored = ?ignored_features, "Feature vector differs from manifest");
        }

        let pred = self.pipeline.predict(&row)?;
        let values = self
            .target_names
            .iter()
            .cloned()
            .zip(pred.row(0).iter().copied())
            .collect();

        Ok(Prediction {
            values,
            missing_features,
            ignored_features,
        })
    }

    /// Predict rows already laid out in manifest order
    pub fn predict_batch(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.manifest.len() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} columns", self.manifest.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        self.pipeline.predict(x)
    }
}
