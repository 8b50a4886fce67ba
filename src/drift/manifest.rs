//! Ordered feature manifest and column alignment

use crate::error::{ForecastError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Ordered column names a pipeline was trained on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureManifest {
    columns: Vec<String>,
}

impl FeatureManifest {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn as_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    /// Same names, any order
    pub fn matches(&self, other: &FeatureManifest) -> bool {
        self.as_set() == other.as_set()
    }
}

/// Rearrange `x` (columns named by `current`) into the column order of
/// `target`. Columns unknown to `target` are dropped and columns missing
/// from `current` are zero-filled.
pub fn align_to_manifest(x: &Array2<f64>, current: &FeatureManifest, target: &FeatureManifest) -> Result<Array2<f64>> {
    if x.ncols() != current.len() {
        return Err(ForecastError::ShapeError {
            expected: format!("{} columns", current.len()),
            actual: format!("{} columns", x.ncols()),
        });
    }

    let index: HashMap<&str, usize> = current
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut out = Array2::zeros((x.nrows(), target.len()));
    for (j, name) in target.columns().iter().enumerate() {
        if let Some(&src) = index.get(name.as_str()) {
            out.column_mut(j).assign(&x.column(src));
        }
    }
    Ok(out)
}
