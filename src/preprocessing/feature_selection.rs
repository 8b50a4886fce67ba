//! Column selection for the training matrices
//!
//! Selection runs in two steps. [`plan_selection`] is a pure function over
//! column metadata ([`ColumnProfile`]) that decides which columns become
//! features and which become targets. [`FeatureSelector::select`] profiles
//! a polars frame, plans, and materializes `X` and `y` as dense matrices.

use crate::error::{ForecastError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Metadata the planner works from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    /// Distinct non-null values
    pub cardinality: usize,
    /// Sample variance of the numeric values, NaN for categorical columns
    pub variance: f64,
}

/// Target name and the alternative column names it may appear under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAlias {
    pub target: String,
    pub candidates: Vec<String>,
}

impl TargetAlias {
    pub fn new(target: &str, candidates: &[&str]) -> Self {
        Self {
            target: target.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Derived `numerator / denominator` feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioFeature {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

/// Feature selection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Maximum numeric feature columns, kept by descending variance
    pub max_numeric: usize,
    /// Maximum categorical columns, kept by ascending cardinality
    pub max_categorical: usize,
    /// Categorical columns need strictly fewer distinct values than this
    pub max_cardinality: usize,
    /// Numeric columns must equal or contain one of these names.
    /// An empty list admits every numeric column.
    pub focus_metrics: Vec<String>,
    pub aliases: Vec<TargetAlias>,
    pub ratios: Vec<RatioFeature>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_numeric: 10,
            max_categorical: 5,
            max_cardinality: 10,
            focus_metrics: vec![
                "sessions".to_string(),
                "engagementRate".to_string(),
                "activeUsers".to_string(),
            ],
            aliases: vec![
                TargetAlias::new("engagementRate", &["engagementRate"]),
                TargetAlias::new("sessions", &["sessions"]),
                TargetAlias::new("activeUsers", &["activeUsers", "users"]),
            ],
            ratios: vec![RatioFeature {
                name: "sessions_per_user".to_string(),
                numerator: "sessions".to_string(),
                denominator: "activeUsers".to_string(),
            }],
        }
    }
}

impl SelectorConfig {
    pub fn with_max_numeric(mut self, max: usize) -> Self {
        self.max_numeric = max;
        self
    }

    pub fn with_max_categorical(mut self, max: usize) -> Self {
        self.max_categorical = max;
        self
    }

    pub fn with_focus_metrics(mut self, metrics: Vec<String>) -> Self {
        self.focus_metrics = metrics;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cardinality < 2 {
            return Err(ForecastError::InvalidParameter {
                name: "max_cardinality".to_string(),
                value: self.max_cardinality.to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }

    fn is_focus(&self, name: &str) -> bool {
        self.focus_metrics.is_empty() || self.focus_metrics.iter().any(|m| name == m || name.contains(m.as_str()))
    }
}

/// A requested target and the frame column that supplies it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub name: String,
    pub source: String,
}

/// Outcome of planning, before any data is touched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPlan {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub ratios: Vec<RatioFeature>,
    pub targets: Vec<ResolvedTarget>,
}

/// Resolve targets and choose feature columns from column metadata alone.
///
/// With no requested targets, every alias key present in the frame is used.
pub fn plan_selection(
    profiles: &[ColumnProfile],
    requested: &[String],
    config: &SelectorConfig,
) -> Result<SelectionPlan> {
    let present: HashSet<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
    let targets = resolve_targets(&present, requested, config);

    if targets.is_empty() {
        return Err(ForecastError::MissingTarget {
            requested: requested.to_vec(),
            available: profiles.iter().map(|p| p.name.clone()).collect(),
        });
    }

    let excluded: HashSet<&str> = requested
        .iter()
        .map(String::as_str)
        .chain(targets.iter().flat_map(|t| [t.name.as_str(), t.source.as_str()]))
        .collect();

    let mut numeric: Vec<&ColumnProfile> = profiles
        .iter()
        .filter(|p| p.kind == ColumnKind::Numeric)
        .filter(|p| !excluded.contains(p.name.as_str()))
        .filter(|p| config.is_focus(&p.name))
        .collect();
    if numeric.len() > config.max_numeric {
        numeric.sort_by(|a, b| nan_low(b.variance).partial_cmp(&nan_low(a.variance)).unwrap_or(Ordering::Equal));
        numeric.truncate(config.max_numeric);
    }

    let mut categorical: Vec<&ColumnProfile> = profiles
        .iter()
        .filter(|p| p.kind == ColumnKind::Categorical)
        .filter(|p| !excluded.contains(p.name.as_str()))
        .filter(|p| p.cardinality < config.max_cardinality)
        .collect();
    if categorical.len() > config.max_categorical {
        categorical.sort_by_key(|p| p.cardinality);
        categorical.truncate(config.max_categorical);
    }

    let is_numeric_column = |name: &str| {
        profiles
            .iter()
            .any(|p| p.name == name && p.kind == ColumnKind::Numeric)
    };
    // A ratio over a target column would reconstruct the target
    let ratios: Vec<RatioFeature> = config
        .ratios
        .iter()
        .filter(|r| is_numeric_column(&r.numerator) && is_numeric_column(&r.denominator))
        .filter(|r| {
            let leaks = excluded.contains(r.numerator.as_str()) || excluded.contains(r.denominator.as_str());
            if leaks {
                debug!(ratio = %r.name, "Ratio feature skipped, it reads a target column");
            }
            !leaks
        })
        .cloned()
        .collect();

    Ok(SelectionPlan {
        numeric: numeric.into_iter().map(|p| p.name.clone()).collect(),
        categorical: categorical.into_iter().map(|p| p.name.clone()).collect(),
        ratios,
        targets,
    })
}

fn nan_low(v: f64) -> f64 {
    if v.is_nan() {
        f64::NEG_INFINITY
    } else {
        v
    }
}

fn resolve_targets(present: &HashSet<&str>, requested: &[String], config: &SelectorConfig) -> Vec<ResolvedTarget> {
    if requested.is_empty() {
        return config
            .aliases
            .iter()
            .filter(|a| present.contains(a.target.as_str()))
            .map(|a| ResolvedTarget {
                name: a.target.clone(),
                source: a.target.clone(),
            })
            .collect();
    }

    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .filter_map(|name| {
            if present.contains(name.as_str()) {
                return Some(ResolvedTarget {
                    name: name.clone(),
                    source: name.clone(),
                });
            }
            config
                .aliases
                .iter()
                .find(|a| &a.target == name)
                .and_then(|a| a.candidates.iter().find(|c| present.contains(c.as_str())))
                .map(|source| ResolvedTarget {
                    name: name.clone(),
                    source: source.clone(),
                })
        })
        .collect()
}

/// Dense training matrices plus their column names
#[derive(Debug, Clone)]
pub struct FeatureSelection {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    /// Rows dropped because a target was missing
    pub dropped_rows: usize,
}

/// Parsed cell values of one frame column
#[derive(Debug, Clone)]
enum ColumnValues {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    fn profile(&self, name: &str) -> ColumnProfile {
        match self {
            ColumnValues::Numeric(values) => {
                let observed: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
                let distinct: HashSet<u64> = observed.iter().map(|v| v.to_bits()).collect();
                ColumnProfile {
                    name: name.to_string(),
                    kind: ColumnKind::Numeric,
                    cardinality: distinct.len(),
                    variance: sample_variance(&observed),
                }
            }
            ColumnValues::Text(values) => {
                let distinct: HashSet<&str> = values.iter().flatten().map(String::as_str).collect();
                ColumnProfile {
                    name: name.to_string(),
                    kind: ColumnKind::Categorical,
                    cardinality: distinct.len(),
                    variance: f64::NAN,
                }
            }
        }
    }
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Parse a polars column. String columns whose every non-empty cell
/// parses as a float are numeric.
fn parse_column(column: &Column) -> Result<ColumnValues> {
    let series = column.as_materialized_series();

    if series.dtype() == &DataType::String {
        let ca = series.str()?;
        let cells: Vec<Option<&str>> = ca.into_iter().collect();
        let all_numeric = cells
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .all(|s| s.parse::<f64>().is_ok());

        if all_numeric {
            let values = cells
                .iter()
                .map(|c| c.and_then(|s| s.trim().parse::<f64>().ok()).unwrap_or(f64::NAN))
                .collect();
            return Ok(ColumnValues::Numeric(values));
        }
        return Ok(ColumnValues::Text(cells.iter().map(|c| c.map(str::to_string)).collect()));
    }

    match series.cast(&DataType::Float64) {
        Ok(cast) => {
            let values = cast.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            Ok(ColumnValues::Numeric(values))
        }
        Err(_) => {
            let cast = series.cast(&DataType::String)?;
            let values = cast.str()?.into_iter().map(|c| c.map(str::to_string)).collect();
            Ok(ColumnValues::Text(values))
        }
    }
}

/// Build profiles for every column of a frame
pub fn profile_frame(df: &DataFrame) -> Result<Vec<ColumnProfile>> {
    df.get_columns()
        .iter()
        .map(|c| Ok(parse_column(c)?.profile(c.name().as_str())))
        .collect()
}

/// Frame-level feature selector
#[derive(Debug, Clone, Default)]
pub struct FeatureSelector {
    config: SelectorConfig,
}

impl FeatureSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Select features and targets from `df` without modifying it.
    /// Rows with a missing value in any target are dropped.
    pub fn select(&self, df: &DataFrame, requested: &[String]) -> Result<FeatureSelection> {
        self.config.validate()?;

        let parsed: Vec<(String, ColumnValues)> = df
            .get_columns()
            .iter()
            .map(|c| Ok((c.name().to_string(), parse_column(c)?)))
            .collect::<Result<_>>()?;
        let profiles: Vec<ColumnProfile> = parsed.iter().map(|(name, v)| v.profile(name)).collect();

        let plan = plan_selection(&profiles, requested, &self.config)?;
        debug!(
            numeric = ?plan.numeric,
            categorical = ?plan.categorical,
            targets = ?plan.targets,
            "Selection plan"
        );

        let lookup = |name: &str| parsed.iter().find(|(n, _)| n == name).map(|(_, v)| v);
        let n_rows = df.height();

        let mut feature_names = Vec::new();
        let mut feature_columns: Vec<Vec<f64>> = Vec::new();

        for name in &plan.numeric {
            if let Some(ColumnValues::Numeric(values)) = lookup(name) {
                feature_names.push(name.clone());
                feature_columns.push(values.clone());
            }
        }

        for name in &plan.categorical {
            if let Some(ColumnValues::Text(values)) = lookup(name) {
                let levels: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
                for level in levels {
                    feature_names.push(format!("{}_{}", name, level));
                    feature_columns.push(
                        values
                            .iter()
                            .map(|v| if v.as_deref() == Some(level) { 1.0 } else { 0.0 })
                            .collect(),
                    );
                }
            }
        }

        for ratio in &plan.ratios {
            if let (Some(ColumnValues::Numeric(num)), Some(ColumnValues::Numeric(den))) =
                (lookup(&ratio.numerator), lookup(&ratio.denominator))
            {
                feature_names.push(ratio.name.clone());
                feature_columns.push(
                    num.iter()
                        .zip(den.iter())
                        .map(|(n, d)| if *d == 0.0 { *n } else { n / d })
                        .collect(),
                );
            }
        }

        if feature_columns.is_empty() {
            return Err(ForecastError::ValidationError(
                "No usable feature columns after selection".to_string(),
            ));
        }

        let mut target_columns: Vec<Vec<f64>> = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let values = match lookup(&target.source) {
                Some(ColumnValues::Numeric(values)) => values.clone(),
                _ => {
                    return Err(ForecastError::DataError(format!(
                        "Target column '{}' is not numeric",
                        target.source
                    )))
                }
            };
            target_columns.push(values);
        }

        let keep: Vec<usize> = (0..n_rows)
            .filter(|&i| target_columns.iter().all(|col| !col[i].is_nan()))
            .collect();
        let dropped_rows = n_rows - keep.len();
        if dropped_rows > 0 {
            info!(dropped = dropped_rows, "Dropped rows with missing target values");
        }

        let x = Array2::from_shape_fn((keep.len(), feature_columns.len()), |(i, j)| feature_columns[j][keep[i]]);
        let y = Array2::from_shape_fn((keep.len(), target_columns.len()), |(i, j)| target_columns[j][keep[i]]);

        info!(
            rows = keep.len(),
            features = feature_names.len(),
            targets = plan.targets.len(),
            "Selected training columns"
        );

        Ok(FeatureSelection {
            x,
            y,
            feature_names,
            target_names: plan.targets.into_iter().map(|t| t.name).collect(),
            dropped_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(name: &str, variance: f64) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            kind: ColumnKind::Numeric,
            cardinality: 100,
            variance,
        }
    }

    fn categorical(name: &str, cardinality: usize) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            kind: ColumnKind::Categorical,
            cardinality,
            variance: f64::NAN,
        }
    }

    #[test]
    fn test_numeric_cap_by_variance() {
        let mut profiles: Vec<ColumnProfile> = (0..12).map(|i| numeric(&format!("sessions_{}", i), i as f64)).collect();
        profiles.push(numeric("engagementRate", 1.0));

        let plan = plan_selection(&profiles, &["engagementRate".to_string()], &SelectorConfig::default()).unwrap();
        assert_eq!(plan.numeric.len(), 10);
        assert_eq!(plan.numeric[0], "sessions_11");
        assert!(!plan.numeric.contains(&"sessions_0".to_string()));
        assert!(!plan.numeric.contains(&"engagementRate".to_string()));
    }

    #[test]
    fn test_focus_filter() {
        let profiles = vec![numeric("bounceRate", 3.0), numeric("organic_sessions", 2.0), numeric("engagementRate", 1.0)];
        let plan = plan_selection(&profiles, &["engagementRate".to_string()], &SelectorConfig::default()).unwrap();
        assert_eq!(plan.numeric, vec!["organic_sessions".to_string()]);

        let open = SelectorConfig::default().with_focus_metrics(Vec::new());
        let plan = plan_selection(&profiles, &["engagementRate".to_string()], &open).unwrap();
        assert_eq!(plan.numeric.len(), 2);
    }

    #[test]
    fn test_categorical_cap_by_cardinality() {
        let mut profiles = vec![numeric("sessions", 1.0)];
        for (i, card) in [9, 2, 7, 3, 5, 4, 12].iter().enumerate() {
            profiles.push(categorical(&format!("cat{}", i), *card));
        }
        let plan = plan_selection(&profiles, &["sessions".to_string()], &SelectorConfig::default()).unwrap();
        // cat6 has 12 levels and is never eligible
        assert_eq!(plan.categorical, vec!["cat1", "cat3", "cat5", "cat4", "cat2"]);
    }

    #[test]
    fn test_alias_resolution() {
        let profiles = vec![numeric("users", 1.0), numeric("sessions", 2.0)];
        let plan = plan_selection(&profiles, &["activeUsers".to_string()], &SelectorConfig::default()).unwrap();
        assert_eq!(
            plan.targets,
            vec![ResolvedTarget {
                name: "activeUsers".to_string(),
                source: "users".to_string()
            }]
        );
        assert_eq!(plan.numeric, vec!["sessions".to_string()]);
    }

    #[test]
    fn test_missing_target() {
        let profiles = vec![numeric("sessions", 1.0)];
        let err = plan_selection(&profiles, &["conversions".to_string()], &SelectorConfig::default()).unwrap_err();
        assert!(matches!(err, ForecastError::MissingTarget { .. }));
    }

    #[test]
    fn test_default_targets() {
        let profiles = vec![numeric("sessions", 1.0), numeric("engagementRate", 2.0), numeric("x", 1.0)];
        let plan = plan_selection(&profiles, &[], &SelectorConfig::default()).unwrap();
        let names: Vec<&str> = plan.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["engagementRate", "sessions"]);
    }

    #[test]
    fn test_ratio_requires_both_columns() {
        let profiles = vec![numeric("sessions", 1.0), numeric("engagementRate", 1.0)];
        let plan = plan_selection(&profiles, &["engagementRate".to_string()], &SelectorConfig::default()).unwrap();
        assert!(plan.ratios.is_empty());
    }

    #[test]
    fn test_select_materializes_matrices() {
        let df = df!(
            "sessions" => &["10", "20", "30", "40"],
            "activeUsers" => &["5", "0", "10", "8"],
            "deviceCategory" => &["mobile", "desktop", "mobile", "tablet"],
            "engagementRate" => &["0.5", "0.6", "", "0.8"]
        )
        .unwrap();

        let selector = FeatureSelector::default();
        let selection = selector.select(&df, &["engagementRate".to_string()]).unwrap();

        assert_eq!(selection.target_names, vec!["engagementRate".to_string()]);
        assert_eq!(selection.dropped_rows, 1);
        assert_eq!(selection.x.nrows(), 3);
        assert_eq!(
            selection.feature_names,
            vec![
                "sessions",
                "activeUsers",
                "deviceCategory_desktop",
                "deviceCategory_mobile",
                "deviceCategory_tablet",
                "sessions_per_user"
            ]
        );

        // Zero denominator is treated as one
        let ratio_col = selection.feature_names.iter().position(|n| n == "sessions_per_user").unwrap();
        assert_eq!(selection.x[[1, ratio_col]], 20.0);
        assert_eq!(df.height(), 4);
    }
}
