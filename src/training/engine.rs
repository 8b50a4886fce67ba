//! Incremental batch-training engine
//!
//! One invocation walks `Idle → WarmStart → EpochLoop → Finalizing → Done`.
//! The live pipeline is refit in place on every shuffled batch and scored on
//! a frozen holdout; the best-scoring batch is kept as a checkpoint, built
//! by refitting a fresh clone on that batch alone.

use super::config::IncrementalConfig;
use super::metrics::r2_score;
use super::pipeline::{Pipeline, PipelineFactory};
use crate::error::{ForecastError, Result};
use crate::evaluation::{EvaluationReport, Evaluator, Holdout, ReportConfig, ReportContext, Reporter};
use crate::preprocessing::mean_fill_in_place;
use ndarray::{Array2, Axis};
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Default name of the metrics document written by the engine
pub const INCREMENTAL_METRICS_FILE: &str = "incremental_metrics.json";

/// Lifecycle of one training invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    WarmStart,
    EpochLoop,
    Finalizing,
    Done,
    Failed,
}

/// Result of one batch step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Scored { score: f64, improved: bool },
    Failed { reason: String },
}

/// One batch of one epoch. `start..end` are positions in the epoch's
/// shuffled permutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub epoch: usize,
    pub batch: usize,
    pub start: usize,
    pub end: usize,
    #[serde(flatten)]
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            BatchStatus::Failed { reason } => Some(reason),
            BatchStatus::Scored { .. } => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self.status {
            BatchStatus::Scored { score, .. } => Some(score),
            BatchStatus::Failed { .. } => None,
        }
    }
}

/// Where the returned model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointOrigin {
    Batch { epoch: usize, start: usize, end: usize },
    /// No batch could be scored; the last in-place state is returned
    InPlace,
}

impl fmt::Display for CheckpointOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointOrigin::Batch { epoch, start, end } => {
                write!(f, "checkpoint from epoch {} batch rows {}..{}", epoch, start, end)
            }
            CheckpointOrigin::InPlace => write!(f, "last in-place pipeline state"),
        }
    }
}

/// Aggregated record of a training run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_outputs: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub warm_start_rows: usize,
    pub holdout_rows: usize,
    pub warm_start_score: Option<f64>,
    pub best_score: Option<f64>,
    pub checkpoint: CheckpointOrigin,
    pub skipped: usize,
    pub batches: Vec<BatchOutcome>,
}

impl RunSummary {
    pub fn skipped_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| b.failure().is_some())
    }

    pub fn improvements(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches
            .iter()
            .filter(|b| matches!(b.status, BatchStatus::Scored { improved: true, .. }))
    }
}

/// Metrics document: the evaluation blocks plus the run summary
#[derive(Serialize)]
struct MetricsDocument<'a> {
    #[serde(flatten)]
    evaluation: &'a EvaluationReport,
    training: &'a RunSummary,
}

/// Everything a finished run hands back
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: Pipeline,
    pub summary: RunSummary,
    pub evaluation: EvaluationReport,
    /// `None` when the metrics file could not be written
    pub metrics_path: Option<PathBuf>,
    /// `None` when report generation failed
    pub report_path: Option<PathBuf>,
}

/// Incremental batch trainer
#[derive(Debug, Clone)]
pub struct IncrementalTrainer {
    config: IncrementalConfig,
    factory: PipelineFactory,
    report_config: ReportConfig,
    metrics_file: String,
    state: EngineState,
}

impl IncrementalTrainer {
    pub fn new(config: IncrementalConfig) -> Self {
        Self {
            config,
            factory: PipelineFactory::new(),
            report_config: ReportConfig::default(),
            metrics_file: INCREMENTAL_METRICS_FILE.to_string(),
            state: EngineState::Idle,
        }
    }

    /// Factory used when no existing pipeline is supplied
    pub fn with_factory(mut self, factory: PipelineFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_report_config(mut self, config: ReportConfig) -> Self {
        self.report_config = config;
        self
    }

    pub fn with_metrics_file(mut self, name: impl Into<String>) -> Self {
        self.metrics_file = name.into();
        self
    }

    pub fn config(&self) -> &IncrementalConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, next: EngineState) {
        debug!(from = ?self.state, to = ?next, "Engine state change");
        self.state = next;
    }

    fn fail<T>(&mut self, err: ForecastError) -> Result<T> {
        error!(state = ?self.state, error = %err, "Training run failed");
        self.transition(EngineState::Failed);
        Err(err)
    }

    /// Train on `(x, y)` and write metrics and report artifacts into
    /// `output_dir`.
    ///
    /// `pipeline` is reused when given, otherwise built from the factory.
    /// Only validation, warm-start and holdout failures abort the run.
    pub fn train(
        &mut self,
        pipeline: Option<Pipeline>,
        x: &Array2<f64>,
        y: &Array2<f64>,
        output_dir: &Path,
        target_names: &[String],
    ) -> Result<TrainingOutcome> {
        self.state = EngineState::Idle;
        if let Err(e) = self.config.validate().and_then(|_| validate_inputs(x, y)) {
            return self.fail(e);
        }

        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let n = x.nrows();
        let batch_size = self.config.batch_size;

        // Idle -> WarmStart
        self.transition(EngineState::WarmStart);
        let mut x = x.to_owned();
        let filled = mean_fill_in_place(&mut x);
        if filled > 0 {
            info!(cells = filled, "Mean-filled missing feature values before fitting");
        }

        let labelled: Vec<usize> = (0..n)
            .filter(|&i| y.row(i).iter().all(|v| v.is_finite()))
            .collect();
        if labelled.is_empty() {
            return self.fail(ForecastError::ValidationError(
                "Every row has a missing or non-finite target".to_string(),
            ));
        }
        if labelled.len() < n {
            warn!(
                rows = n - labelled.len(),
                "Rows with non-finite targets are excluded from warm start and holdout"
            );
        }

        // The holdout is frozen first so the warm start never sees it
        let holdout_size = self.config.holdout_size.min(labelled.len());
        let holdout_rows = draw_rows(&mut rng, &labelled, holdout_size);
        let mut in_holdout = vec![false; n];
        for &i in &holdout_rows {
            in_holdout[i] = true;
        }

        let mut warm_candidates: Vec<usize> = labelled.iter().copied().filter(|&i| !in_holdout[i]).collect();
        if warm_candidates.is_empty() {
            warn!(rows = labelled.len(), "Holdout covers every labelled row, warm start overlaps it");
            warm_candidates = labelled.clone();
        }

        let mut pipeline = pipeline.unwrap_or_else(|| self.factory.create());
        let warm_size = self
            .config
            .warm_start_multiplier
            .saturating_mul(batch_size)
            .min(warm_candidates.len());
        let warm_rows = draw_rows(&mut rng, &warm_candidates, warm_size);
        let x_warm = x.select(Axis(0), &warm_rows);
        let y_warm = y.select(Axis(0), &warm_rows);
        if let Err(e) = pipeline.fit(&x_warm, &y_warm) {
            return self.fail(ForecastError::TrainingError(format!("Warm start failed: {}", e)));
        }
        info!(rows = warm_size, "Warm start fitted");

        // WarmStart -> EpochLoop
        let x_hold = x.select(Axis(0), &holdout_rows);
        let y_hold = y.select(Axis(0), &holdout_rows);
        let holdout = Holdout::new(&x_hold, &y_hold);

        let mut pool: Vec<usize> = (0..n).filter(|&i| !in_holdout[i]).collect();
        if pool.is_empty() {
            warn!(rows = n, "Holdout covers every row, batches are drawn from all rows");
            pool = (0..n).collect();
        }

        self.transition(EngineState::EpochLoop);

        // Only single-batch fits compete for the checkpoint
        let mut best_score = f64::NEG_INFINITY;
        let mut checkpoint: Option<Pipeline> = None;
        let mut origin = CheckpointOrigin::InPlace;

        let warm_start_score = match score_on(&pipeline, holdout) {
            Ok(s) if s.is_finite() => {
                info!(score = s, holdout = holdout_size, "Warm-start holdout score");
                Some(s)
            }
            Ok(s) => {
                warn!(score = s, "Warm-start holdout score is not finite");
                None
            }
            Err(e) => {
                warn!(error = %e, "Could not score warm-start model");
                None
            }
        };

        let batches_per_epoch = pool.len().div_ceil(batch_size);
        let mut outcomes = Vec::with_capacity(batches_per_epoch * self.config.epochs);
        let mut step = 0usize;

        for epoch in 1..=self.config.epochs {
            pool.shuffle(&mut rng);
            debug!(epoch, batches = batches_per_epoch, "Epoch started");

            for (batch, rows) in pool.chunks(batch_size).enumerate() {
                let start = batch * batch_size;
                let end = start + rows.len();
                step += 1;

                let status = match fit_batch(&mut pipeline, &x, y, rows, holdout) {
                    Ok(score) if score > best_score => match refit_clone(&pipeline, &x, y, rows) {
                        Ok(snapshot) => {
                            best_score = score;
                            checkpoint = Some(snapshot);
                            origin = CheckpointOrigin::Batch { epoch, start, end };
                            debug!(epoch, start, end, score, "New best checkpoint");
                            BatchStatus::Scored { score, improved: true }
                        }
                        Err(e) => batch_failure(epoch, start, end, e),
                    },
                    Ok(score) => BatchStatus::Scored { score, improved: false },
                    Err(e) => batch_failure(epoch, start, end, e),
                };

                outcomes.push(BatchOutcome {
                    epoch,
                    batch,
                    start,
                    end,
                    status,
                });

                if self.config.progress_interval > 0 && step % self.config.progress_interval == 0 {
                    info!(
                        epoch,
                        batch = batch + 1,
                        of = batches_per_epoch,
                        best_score = ?finite(best_score),
                        "Training progress"
                    );
                }
            }
        }

        // EpochLoop -> Finalizing
        self.transition(EngineState::Finalizing);
        let model = checkpoint.unwrap_or(pipeline);
        let skipped = outcomes.iter().filter(|b| b.failure().is_some()).count();
        let summary = RunSummary {
            n_samples: n,
            n_features: x.ncols(),
            n_outputs: y.ncols(),
            batch_size,
            epochs: self.config.epochs,
            warm_start_rows: warm_size,
            holdout_rows: holdout_size,
            warm_start_score,
            best_score: finite(best_score),
            checkpoint: origin,
            skipped,
            batches: outcomes,
        };
        info!(
            best_score = ?summary.best_score,
            skipped,
            model = %summary.checkpoint,
            "Epoch loop finished"
        );

        let x_labelled = x.select(Axis(0), &labelled);
        let y_labelled = y.select(Axis(0), &labelled);
        let evaluation = Evaluator::new(self.config.cv_folds)
            .with_random_state(self.config.random_state)
            .evaluate(&model, &x_labelled, &y_labelled, Some(holdout));

        let metrics_path = match write_metrics(output_dir, &self.metrics_file, &evaluation, &summary) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "Failed to write metrics file");
                None
            }
        };

        let context = ReportContext {
            target_names,
            evaluation: Some(&evaluation),
            summary: Some(&summary),
        };
        let report_path = match Reporter::new(self.report_config.clone()).report(&model, holdout, output_dir, context) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "Report generation failed, the trained model is still returned");
                None
            }
        };

        // Finalizing -> Done
        self.transition(EngineState::Done);
        Ok(TrainingOutcome {
            model,
            summary,
            evaluation,
            metrics_path,
            report_path,
        })
    }
}

fn validate_inputs(x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ForecastError::ValidationError(format!(
            "Feature matrix is empty ({} x {})",
            x.nrows(),
            x.ncols()
        )));
    }
    if y.ncols() == 0 {
        return Err(ForecastError::ValidationError("Target matrix has no columns".to_string()));
    }
    if x.nrows() != y.nrows() {
        return Err(ForecastError::ValidationError(format!(
            "Feature rows ({}) and target rows ({}) differ",
            x.nrows(),
            y.nrows()
        )));
    }
    Ok(())
}

/// Sample `k` of `rows` without replacement, returned in ascending order
fn draw_rows(rng: &mut ChaCha8Rng, rows: &[usize], k: usize) -> Vec<usize> {
    let mut picked: Vec<usize> = index::sample(rng, rows.len(), k).into_iter().map(|i| rows[i]).collect();
    picked.sort_unstable();
    picked
}

fn score_on(model: &Pipeline, holdout: Holdout<'_>) -> Result<f64> {
    let pred = model.predict(holdout.x)?;
    r2_score(holdout.y, &pred)
}

/// Refit the live pipeline on one batch and score it on the holdout
fn fit_batch(
    pipeline: &mut Pipeline,
    x: &Array2<f64>,
    y: &Array2<f64>,
    rows: &[usize],
    holdout: Holdout<'_>,
) -> Result<f64> {
    let xb = x.select(Axis(0), rows);
    let yb = y.select(Axis(0), rows);
    pipeline.fit(&xb, &yb)?;
    score_on(pipeline, holdout)
}

/// Fresh clone of `pipeline` fitted on the batch alone
fn refit_clone(pipeline: &Pipeline, x: &Array2<f64>, y: &Array2<f64>, rows: &[usize]) -> Result<Pipeline> {
    let mut snapshot = pipeline.unfitted_clone();
    snapshot.fit(&x.select(Axis(0), rows), &y.select(Axis(0), rows))?;
    Ok(snapshot)
}

fn batch_failure(epoch: usize, start: usize, end: usize, cause: ForecastError) -> BatchStatus {
    let err = ForecastError::BatchFit {
        start,
        end,
        reason: cause.to_string(),
    };
    warn!(epoch, error = %err, "Skipping batch");
    BatchStatus::Failed {
        reason: cause.to_string(),
    }
}

fn finite(score: f64) -> Option<f64> {
    score.is_finite().then_some(score)
}

fn write_metrics(
    output_dir: &Path,
    file_name: &str,
    evaluation: &EvaluationReport,
    summary: &RunSummary,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(file_name);
    let doc = MetricsDocument {
        evaluation,
        training: summary,
    };
    fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
    info!(path = %path.display(), "Metrics written");
    Ok(path)
}
