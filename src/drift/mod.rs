//! Schema drift handling
//!
//! Compares the feature manifest a model was trained on with the columns of
//! the current data, and decides whether a stored model can be reused.

mod manifest;

pub use manifest::{align_to_manifest, FeatureManifest};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

/// Column differences between a stored manifest and current data
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriftReport {
    /// Present in the current data, unknown to the stored model
    pub added: BTreeSet<String>,
    /// Expected by the stored model, absent from the current data
    pub removed: BTreeSet<String>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Emit the schema drift warning, if there is any drift
    pub fn warn_if_drifted(&self) {
        if !self.is_empty() {
            warn!(added = ?self.added, removed = ?self.removed, "Feature schema drift against stored model");
        }
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "added: {:?}, removed: {:?}", self.added, self.removed)
    }
}

/// Diff two manifests by column name. Order is ignored.
pub fn reconcile(stored: &FeatureManifest, current: &FeatureManifest) -> DriftReport {
    let stored_set = stored.as_set();
    let current_set = current.as_set();
    DriftReport {
        added: current_set.difference(&stored_set).map(|s| s.to_string()).collect(),
        removed: stored_set.difference(&current_set).map(|s| s.to_string()).collect(),
    }
}

/// What to do with a feature-set mismatch when the arity still matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftPolicy {
    /// Keep the stored model and align current data to its manifest
    Align,
    /// Build a fresh pipeline on the current features
    Retrain,
}

/// Outcome of checking a stored model against a new run
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadDecision {
    /// Reuse the stored model; align data to its manifest when drift is non-empty
    Reuse { drift: DriftReport },
    /// Discard the stored model
    Fresh { reason: FreshReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FreshReason {
    ArityChanged { stored: usize, requested: usize },
    FeaturesChanged(DriftReport),
}

impl fmt::Display for FreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshReason::ArityChanged { stored, requested } => {
                write!(f, "stored model has {} outputs, {} requested", stored, requested)
            }
            FreshReason::FeaturesChanged(drift) => write!(f, "feature set changed ({})", drift),
        }
    }
}

/// Decide whether a stored model may be reused. An output arity change
/// always forces a fresh pipeline.
pub fn plan_reload(
    stored_arity: usize,
    requested_arity: usize,
    stored: &FeatureManifest,
    current: &FeatureManifest,
    policy: DriftPolicy,
) -> ReloadDecision {
    if stored_arity != requested_arity {
        return ReloadDecision::Fresh {
            reason: FreshReason::ArityChanged {
                stored: stored_arity,
                requested: requested_arity,
            },
        };
    }

    let drift = reconcile(stored, current);
    match policy {
        DriftPolicy::Retrain if !drift.is_empty() => ReloadDecision::Fresh {
            reason: FreshReason::FeaturesChanged(drift),
        },
        _ => ReloadDecision::Reuse { drift },
    }
}
