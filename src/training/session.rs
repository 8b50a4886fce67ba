//! End-to-end training session: load CSVs, select features, train in full
//! or incremental mode, then persist the bundle and metrics.

use super::config::IncrementalConfig;
use super::engine::{IncrementalTrainer, RunSummary};
use super::gradient_boosting::BoostingConfig;
use super::pipeline::{Pipeline, PipelineFactory};
use crate::drift::{
    align_to_manifest, plan_reload, reconcile, DriftPolicy, DriftReport, FeatureManifest, ReloadDecision,
};
use crate::error::{ForecastError, Result};
use crate::evaluation::{EvaluationReport, Evaluator, Holdout, ReportConfig, ReportContext, Reporter};
use crate::export::{BundleMetadata, ModelBundle, TrainingMode};
use crate::preprocessing::{FeatureSelection, FeatureSelector, SelectorConfig};
use crate::utils::DataLoader;
use ndarray::{Array2, Axis};
use polars::prelude::DataFrame;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Metrics document written by full training
pub const FULL_METRICS_FILE: &str = "model_metrics.json";

/// Seed of the train/validation split in full mode
const SPLIT_SEED: u64 = 42;

/// Settings for one training invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// CSV extracts to concatenate
    pub files: Vec<PathBuf>,
    /// Requested target columns; empty selects the default targets
    pub targets: Vec<String>,
    pub output_dir: PathBuf,
    /// Bundle file name, placed inside `output_dir`
    pub model_output: String,
    pub incremental: bool,
    pub boosting: BoostingConfig,
    pub training: IncrementalConfig,
    pub selector: SelectorConfig,
    pub report: ReportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            targets: Vec::new(),
            output_dir: PathBuf::from("results"),
            model_output: "model.bin".to_string(),
            incremental: false,
            boosting: BoostingConfig::default(),
            training: IncrementalConfig::default(),
            selector: SelectorConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl RunConfig {
    /// Read a JSON config; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ForecastError::ConfigError(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ForecastError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_output.trim().is_empty() {
            return Err(ForecastError::ConfigError("model_output must not be empty".to_string()));
        }
        self.boosting.validate()?;
        self.training.validate()?;
        self.selector.validate()?;
        Ok(())
    }

    /// Bundle location: the file name of `model_output` inside `output_dir`
    pub fn model_path(&self) -> PathBuf {
        let name = Path::new(&self.model_output)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.model_output.clone().into());
        self.output_dir.join(name)
    }
}

/// What a finished session produced
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub mode: TrainingMode,
    pub model_path: PathBuf,
    pub metrics_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub evaluation: EvaluationReport,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    /// Drift against a stored bundle, when one was found
    pub drift: Option<DriftReport>,
    /// Incremental mode only
    pub summary: Option<RunSummary>,
}

/// Drives one training invocation
#[derive(Debug, Clone)]
pub struct TrainingSession {
    config: RunConfig,
}

impl TrainingSession {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Load the configured CSV files and train on them
    pub fn run(&self) -> Result<SessionResult> {
        self.config.validate()?;
        if self.config.files.is_empty() {
            return Err(ForecastError::ConfigError("No input files given".to_string()));
        }
        let frame = DataLoader::new().load_many(&self.config.files)?;
        self.run_frame(&frame)
    }

    /// Train on an already loaded frame
    pub fn run_frame(&self, frame: &DataFrame) -> Result<SessionResult> {
        self.config.validate()?;
        fs::create_dir_all(&self.config.output_dir)?;

        let selection = FeatureSelector::new(self.config.selector.clone()).select(frame, &self.config.targets)?;
        info!(
            rows = selection.x.nrows(),
            features = selection.feature_names.len(),
            targets = ?selection.target_names,
            "Training data prepared"
        );

        if self.config.incremental {
            self.run_incremental(selection)
        } else {
            self.run_full(selection)
        }
    }

    fn factory(&self) -> PipelineFactory {
        PipelineFactory::new().with_config(self.config.boosting.clone())
    }

    fn load_existing(&self) -> Result<Option<ModelBundle>> {
        let path = self.config.model_path();
        if !path.exists() {
            return Ok(None);
        }
        info!(path = %path.display(), "Loading existing model");
        ModelBundle::load(&path).map(Some)
    }

    fn run_full(&self, selection: FeatureSelection) -> Result<SessionResult> {
        let FeatureSelection {
            x,
            y,
            feature_names,
            target_names,
            ..
        } = selection;
        let current = FeatureManifest::new(feature_names.clone());

        let (train_rows, val_rows) = split_rows(x.nrows(), SPLIT_SEED)?;
        let x_train = x.select(Axis(0), &train_rows);
        let y_train = y.select(Axis(0), &train_rows);
        let x_val = x.select(Axis(0), &val_rows);
        let y_val = y.select(Axis(0), &val_rows);
        info!(train = train_rows.len(), validation = val_rows.len(), "Split data");

        let mut drift = None;
        let mut pipeline = match self.load_existing()? {
            Some(bundle) => {
                let decision = plan_reload(bundle.n_outputs(), y.ncols(), &bundle.manifest, &current, DriftPolicy::Retrain);
                match decision {
                    ReloadDecision::Reuse { drift: d } => {
                        drift = Some(d);
                        bundle.pipeline
                    }
                    ReloadDecision::Fresh { reason } => {
                        warn!(%reason, "Retraining from a fresh pipeline");
                        drift = Some(reconcile(&bundle.manifest, &current));
                        self.factory().create()
                    }
                }
            }
            None => self.factory().create(),
        };

        pipeline.fit(&x_train, &y_train)?;
        if pipeline.n_outputs() != y_val.ncols() {
            return Err(ForecastError::ValidationError(format!(
                "Model predicts {} targets but the data has {}",
                pipeline.n_outputs(),
                y_val.ncols()
            )));
        }

        let holdout = Holdout::new(&x_val, &y_val);
        let evaluation = Evaluator::new(self.config.training.cv_folds)
            .with_random_state(self.config.training.random_state)
            .evaluate(&pipeline, &x_train, &y_train, Some(holdout));

        let context = ReportContext {
            target_names: &target_names,
            evaluation: Some(&evaluation),
            summary: None,
        };
        let report_path = self.write_report(&pipeline, holdout, context);

        let model_path = self.save(pipeline, current, &target_names, TrainingMode::Full, train_rows.len())?;

        let metrics_path = self.config.output_dir.join(FULL_METRICS_FILE);
        fs::write(&metrics_path, serde_json::to_string_pretty(&evaluation)?)?;
        info!(path = %metrics_path.display(), "Metrics written");

        Ok(SessionResult {
            mode: TrainingMode::Full,
            model_path,
            metrics_path: Some(metrics_path),
            report_path,
            evaluation,
            feature_names,
            target_names,
            drift,
            summary: None,
        })
    }

    fn run_incremental(&self, selection: FeatureSelection) -> Result<SessionResult> {
        let FeatureSelection {
            x,
            y,
            feature_names,
            target_names,
            ..
        } = selection;
        let current = FeatureManifest::new(feature_names.clone());

        let mut drift = None;
        let (pipeline, manifest, x): (Option<Pipeline>, FeatureManifest, Array2<f64>) = match self.load_existing()? {
            Some(bundle) => {
                match plan_reload(bundle.n_outputs(), y.ncols(), &bundle.manifest, &current, DriftPolicy::Align) {
                    ReloadDecision::Reuse { drift: d } => {
                        d.warn_if_drifted();
                        drift = Some(d);
                        let (stored, stored_manifest) = bundle.into_parts();
                        if stored_manifest.columns() == current.columns() {
                            (Some(stored), current, x)
                        } else {
                            let aligned = align_to_manifest(&x, &current, &stored_manifest)?;
                            (Some(stored), stored_manifest, aligned)
                        }
                    }
                    ReloadDecision::Fresh { reason } => {
                        warn!(%reason, "Stored model cannot be reused, training from scratch");
                        (None, current, x)
                    }
                }
            }
            None => (None, current, x),
        };

        let mut trainer = IncrementalTrainer::new(self.config.training.clone())
            .with_factory(self.factory())
            .with_report_config(self.config.report.clone());
        let outcome = trainer.train(pipeline, &x, &y, &self.config.output_dir, &target_names)?;

        let model_path = self.save(
            outcome.model,
            manifest.clone(),
            &target_names,
            TrainingMode::Incremental,
            x.nrows(),
        )?;

        Ok(SessionResult {
            mode: TrainingMode::Incremental,
            model_path,
            metrics_path: outcome.metrics_path,
            report_path: outcome.report_path,
            evaluation: outcome.evaluation,
            feature_names: manifest.columns().to_vec(),
            target_names,
            drift,
            summary: Some(outcome.summary),
        })
    }

    fn write_report(&self, model: &Pipeline, holdout: Holdout<'_>, context: ReportContext<'_>) -> Option<PathBuf> {
        match Reporter::new(self.config.report.clone()).report(model, holdout, &self.config.output_dir, context) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "Report generation failed");
                None
            }
        }
    }

    fn save(
        &self,
        pipeline: Pipeline,
        manifest: FeatureManifest,
        target_names: &[String],
        mode: TrainingMode,
        n_samples: usize,
    ) -> Result<PathBuf> {
        let path = self.config.model_path();
        let metadata = BundleMetadata::new(target_names.to_vec(), mode, n_samples);
        ModelBundle::new(pipeline, manifest, metadata).save(&path)?;
        Ok(path)
    }
}

/// Shuffle `n` row indices and split 70/15/15, returning the train and
/// validation parts. The last 15% is not used.
fn split_rows(n: usize, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut rows: Vec<usize> = (0..n).collect();
    rows.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let rest = (n as f64 * 0.3).ceil() as usize;
    let train = n - rest;
    let validation = rest - rest.div_ceil(2);
    if train == 0 || validation == 0 {
        return Err(ForecastError::ValidationError(format!(
            "{} rows are too few for a train/validation split",
            n
        )));
    }

    let val_rows = rows[train..train + validation].to_vec();
    rows.truncate(train);
    Ok((rows, val_rows))
}
