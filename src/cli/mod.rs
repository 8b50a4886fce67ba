//! Command-line interface for training and prediction.

use clap::{Parser, Subcommand};
use colored::*;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::evaluation::EvaluationReport;
use crate::export::TrainingMode;
use crate::inference::{Prediction, Predictor};
use crate::training::{RunConfig, SessionResult, TrainingSession};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
    let _ = io::stdout().flush();
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn row(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn fmt_metric(v: Option<f64>) -> String {
    v.map_or_else(|| "unavailable".to_string(), |v| format!("{:.4}", v))
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "engagement-forecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train and serve multi-output forecasts for marketing analytics")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model on one or more CSV extracts
    Train {
        /// Input CSV files, concatenated in order
        #[arg(short, long, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Target columns (defaults to engagementRate, sessions, activeUsers)
        #[arg(short, long, num_args = 1..)]
        targets: Vec<String>,

        /// Directory for the model, metrics and report
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Model bundle file name
        #[arg(long, default_value = "model.bin")]
        model_output: String,

        /// Train with the incremental batch engine
        #[arg(long)]
        incremental: bool,

        /// Rows per batch in incremental mode
        #[arg(long)]
        batch_size: Option<usize>,

        /// Epochs in incremental mode
        #[arg(long)]
        epochs: Option<usize>,

        /// JSON run configuration; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Predict from a JSON feature vector (an object, or an array of objects)
    Predict {
        /// Trained model bundle
        #[arg(short, long)]
        model: PathBuf,

        /// JSON file with feature name → value pairs
        #[arg(short, long)]
        features: PathBuf,

        /// Write predictions to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options of the `train` subcommand
pub struct TrainArgs {
    pub files: Vec<PathBuf>,
    pub targets: Vec<String>,
    pub output: PathBuf,
    pub model_output: String,
    pub incremental: bool,
    pub batch_size: Option<usize>,
    pub epochs: Option<usize>,
    pub config: Option<PathBuf>,
}

impl TrainArgs {
    /// Merge flags over the optional config file
    pub fn into_run_config(self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        if !self.files.is_empty() {
            config.files = self.files;
        }
        if !self.targets.is_empty() {
            config.targets = self.targets;
        }
        if self.config.is_none() || self.output != PathBuf::from("results") {
            config.output_dir = self.output;
        }
        if self.config.is_none() || self.model_output != "model.bin" {
            config.model_output = self.model_output;
        }
        config.incremental |= self.incremental;
        if let Some(b) = self.batch_size {
            config.training.batch_size = b;
        }
        if let Some(e) = self.epochs {
            config.training.epochs = e;
        }
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(args: TrainArgs) -> anyhow::Result<()> {
    section("Train");

    let config = args.into_run_config()?;
    if config.files.is_empty() {
        anyhow::bail!("No input files given (use --files or a config with \"files\")");
    }
    config.validate()?;

    row("Files", &config.files.len().to_string());
    row("Mode", if config.incremental { "incremental" } else { "full" });
    if config.incremental {
        row("Batch size", &config.training.batch_size.to_string());
        row("Epochs", &config.training.epochs.to_string());
    }
    println!();

    step_run("Training");
    let start = Instant::now();
    let result = TrainingSession::new(config).run()?;
    step_done(&format!("{:.1?}", start.elapsed()));

    print_session(&result);
    Ok(())
}

fn print_session(result: &SessionResult) {
    section("Result");
    row("Targets", &result.target_names.join(", "));
    row("Features", &result.feature_names.len().to_string());

    if let Some(drift) = &result.drift {
        if !drift.is_empty() {
            row("Schema drift", &drift.to_string().yellow().to_string());
        }
    }

    print_metrics(&result.evaluation);

    if let Some(summary) = &result.summary {
        row("Batches", &format!("{} ({} skipped)", summary.batches.len(), summary.skipped));
        row("Final model", &summary.checkpoint.to_string());
    }

    println!();
    row("Model", &result.model_path.display().to_string());
    if let Some(path) = &result.metrics_path {
        row("Metrics", &path.display().to_string());
    }
    match &result.report_path {
        Some(path) => row("Report", &path.display().to_string()),
        None => row("Report", &"not generated".yellow().to_string()),
    }
    let mode = match result.mode {
        TrainingMode::Full => "full",
        TrainingMode::Incremental => "incremental",
    };
    println!();
    println!("  {} {}", ok("✓"), format!("Training ({}) finished", mode).white());
    println!();
}

fn print_metrics(evaluation: &EvaluationReport) {
    let cv = &evaluation.cv;
    row(
        "CV R²",
        &format!("{} ± {}", fmt_metric(cv.r2_mean), fmt_metric(cv.r2_std)),
    );
    row(
        "CV RMSE",
        &format!("{} ± {}", fmt_metric(cv.rmse_mean), fmt_metric(cv.rmse_std)),
    );
    if let Some(err) = &cv.error {
        row("CV", &err.yellow().to_string());
    }
    if let Some(v) = &evaluation.validation {
        row("Holdout R²", &fmt_metric(v.r2));
        row("Holdout RMSE", &fmt_metric(v.rmse));
    }
}

pub fn cmd_predict(model: &Path, features: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let predictor = Predictor::load(model)?;

    let text = std::fs::read_to_string(features)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let vectors: Vec<HashMap<String, f64>> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };

    let predictions = vectors
        .iter()
        .map(|v| predictor.predict_one(v))
        .collect::<crate::Result<Vec<Prediction>>>()?;

    let json = if predictions.len() == 1 {
        serde_json::to_string_pretty(&predictions[0])?
    } else {
        serde_json::to_string_pretty(&predictions)?
    };

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("  {} {}", ok("✓"), format!("{} prediction(s) written to {}", predictions.len(), path.display()).white());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::FeatureManifest;
    use crate::export::{BundleMetadata, ModelBundle};
    use crate::training::{BoostingConfig, PipelineFactory};
    use ndarray::Array2;

    #[test]
    fn test_cmd_predict_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 * 0.5);
        let mut pipeline = PipelineFactory::new()
            .with_config(BoostingConfig {
                n_estimators: 5,
                ..Default::default()
            })
            .create();
        pipeline.fit(&x, &y).unwrap();

        let model = dir.path().join("model.bin");
        ModelBundle::new(
            pipeline,
            FeatureManifest::new(vec!["sessions".to_string(), "activeUsers".to_string()]),
            BundleMetadata::new(vec!["engagementRate".to_string()], TrainingMode::Full, 40),
        )
        .save(&model)
        .unwrap();

        let features = dir.path().join("features.json");
        std::fs::write(&features, r#"[{"sessions": 12, "activeUsers": 5}, {"sessions": 3, "bounceRate": 0.4}]"#).unwrap();
        let output = dir.path().join("predictions.json");

        cmd_predict(&model, &features, Some(output.as_path())).unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let rows = written.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["values"]["engagementRate"].is_number());
        assert_eq!(rows[1]["missing_features"][0], "activeUsers");
        assert_eq!(rows[1]["ignored_features"][0], "bounceRate");
    }
}
