//! Diagnostic report: PNG charts plus an HTML page that references them.

use super::{EvaluationReport, Holdout};
use crate::error::{ForecastError, Result};
use crate::training::{RunSummary, Pipeline};
use ndarray::{Array2, ArrayView1, Axis};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{register_font, FontStyle};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub const SCATTER_FILE: &str = "actual_vs_predicted.png";
pub const RESIDUALS_FILE: &str = "residuals.png";
pub const CORRELATION_FILE: &str = "correlation_matrix.png";
pub const REPORT_FILE: &str = "model_report.html";

/// Fonts tried after `ReportConfig::font_path`
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static CHART_FONT: OnceLock<bool> = OnceLock::new();

/// Report configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Refit a copy of an unfitted model on the holdout instead of failing
    pub refit_unfitted: bool,
    /// Chart width in pixels
    pub width: u32,
    /// Chart height in pixels
    pub height: u32,
    /// Residual histogram bins
    pub histogram_bins: usize,
    /// TrueType font for chart text; common system fonts are tried when unset
    pub font_path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            refit_unfitted: true,
            width: 800,
            height: 600,
            histogram_bins: 30,
            font_path: None,
        }
    }
}

impl ReportConfig {
    /// Fail with `ModelNotFitted` rather than refitting
    pub fn strict() -> Self {
        Self {
            refit_unfitted: false,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Optional context rendered alongside the charts
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportContext<'a> {
    pub target_names: &'a [String],
    pub evaluation: Option<&'a EvaluationReport>,
    pub summary: Option<&'a RunSummary>,
}

/// Writes charts and the HTML report
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    config: ReportConfig,
}

fn draw_err<E: std::fmt::Display>(e: E) -> ForecastError {
    ForecastError::ReportGeneration(e.to_string())
}

impl Reporter {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Render the report for `model` on the holdout into `output_dir` and
    /// return the HTML path.
    ///
    /// An unfitted model is refit on the holdout (on a private copy) unless
    /// the config is strict.
    pub fn report(
        &self,
        model: &Pipeline,
        holdout: Holdout<'_>,
        output_dir: &Path,
        context: ReportContext<'_>,
    ) -> Result<PathBuf> {
        let model: Cow<'_, Pipeline> = if model.is_fitted() {
            Cow::Borrowed(model)
        } else if self.config.refit_unfitted {
            warn!("Model is not fitted, refitting a copy on the holdout for the report");
            let mut refit = model.unfitted_clone();
            refit.fit(holdout.x, holdout.y)?;
            Cow::Owned(refit)
        } else {
            return Err(ForecastError::ModelNotFitted);
        };

        let y_pred = model.predict(holdout.x)?;
        let y_true = holdout.y;
        if y_pred.dim() != y_true.dim() {
            return Err(ForecastError::ShapeError {
                expected: format!("{:?}", y_true.dim()),
                actual: format!("{:?}", y_pred.dim()),
            });
        }

        fs::create_dir_all(output_dir)?;
        let names = output_names(y_true.ncols(), context.target_names);
        let text = chart_font(self.config.font_path.as_deref());

        self.draw_scatter(&output_dir.join(SCATTER_FILE), y_true, &y_pred, &names, text)?;
        self.draw_residuals(&output_dir.join(RESIDUALS_FILE), y_true, &y_pred, text)?;

        let labels: Vec<String> = names
            .iter()
            .cloned()
            .chain(names.iter().map(|n| format!("pred_{}", n)))
            .collect();
        let corr = correlation_matrix(y_true, &y_pred)?;
        self.draw_heatmap(&output_dir.join(CORRELATION_FILE), &corr, &labels, text)?;

        let html_path = output_dir.join(REPORT_FILE);
        fs::write(&html_path, render_html(&context))?;
        info!(path = %html_path.display(), "Report written");

        Ok(html_path)
    }

    fn draw_scatter(
        &self,
        path: &Path,
        y_true: &Array2<f64>,
        y_pred: &Array2<f64>,
        names: &[String],
        text: bool,
    ) -> Result<()> {
        let (lo, hi) = padded_range(y_true.iter().chain(y_pred.iter()).copied());

        let root = BitMapBackend::new(path, (self.config.width, self.config.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let mut builder = ChartBuilder::on(&root);
        builder.margin(20);
        if text {
            builder
                .caption("Actual vs. predicted", ("sans-serif", 24))
                .x_label_area_size(40)
                .y_label_area_size(60);
        }
        let mut chart = builder.build_cartesian_2d(lo..hi, lo..hi).map_err(draw_err)?;

        let mut mesh = chart.configure_mesh();
        if text {
            mesh.x_desc("Actual").y_desc("Predicted");
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw().map_err(draw_err)?;

        for (j, name) in names.iter().enumerate() {
            let color = Palette99::pick(j).mix(0.6);
            let points: Vec<(f64, f64)> = y_true
                .column(j)
                .iter()
                .zip(y_pred.column(j).iter())
                .filter(|(a, p)| a.is_finite() && p.is_finite())
                .map(|(a, p)| (*a, *p))
                .collect();
            chart
                .draw_series(points.into_iter().map(|pt| Circle::new(pt, 3, color.filled())))
                .map_err(draw_err)?
                .label(name.as_str())
                .legend(move |(x, y)| Circle::new((x, y), 4, Palette99::pick(j).filled()));
        }

        chart
            .draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], RED.stroke_width(2)))
            .map_err(draw_err)?;

        if text {
            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(draw_err)?;
        }

        root.present().map_err(draw_err)?;
        Ok(())
    }

    fn draw_residuals(&self, path: &Path, y_true: &Array2<f64>, y_pred: &Array2<f64>, text: bool) -> Result<()> {
        let residuals: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| t - p)
            .filter(|r| r.is_finite())
            .collect();

        let (lo, hi) = padded_range(residuals.iter().copied().chain([0.0]));
        let bins = self.config.histogram_bins.max(1);
        let width = (hi - lo) / bins as f64;
        let mut counts = vec![0usize; bins];
        for r in &residuals {
            let idx = (((r - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

        let root = BitMapBackend::new(path, (self.config.width, self.config.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let mut builder = ChartBuilder::on(&root);
        builder.margin(20);
        if text {
            builder
                .caption("Residual distribution", ("sans-serif", 24))
                .x_label_area_size(40)
                .y_label_area_size(60);
        }
        let mut chart = builder
            .build_cartesian_2d(lo..hi, 0.0..max_count * 1.1)
            .map_err(draw_err)?;

        let mut mesh = chart.configure_mesh();
        if text {
            mesh.x_desc("Residual").y_desc("Frequency");
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw().map_err(draw_err)?;

        chart
            .draw_series(counts.iter().enumerate().map(|(i, &c)| {
                let x0 = lo + i as f64 * width;
                Rectangle::new([(x0, 0.0), (x0 + width, c as f64)], BLUE.mix(0.6).filled())
            }))
            .map_err(draw_err)?;

        chart
            .draw_series(LineSeries::new(vec![(0.0, 0.0), (0.0, max_count * 1.1)], RED.stroke_width(2)))
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
        Ok(())
    }

    fn draw_heatmap(&self, path: &Path, corr: &Array2<f64>, labels: &[String], text: bool) -> Result<()> {
        let n = labels.len() as i32;
        let (w, h) = (self.config.width as i32, self.config.height as i32);
        let left = 160;
        let top = 60;
        let bottom = 40;
        let cell = ((w - left - 20) / n.max(1)).min((h - top - bottom) / n.max(1)).max(1);

        let root = BitMapBackend::new(path, (self.config.width, self.config.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let centered =
            |size: i32| TextStyle::from(("sans-serif", size).into_font()).pos(Pos::new(HPos::Center, VPos::Center));
        if text {
            root.draw(&Text::new(
                "Correlation: actual vs. predicted",
                (w / 2, top / 2),
                centered(22),
            ))
            .map_err(draw_err)?;
        }

        for i in 0..n {
            let y0 = top + i * cell;
            if text {
                root.draw(&Text::new(
                    labels[i as usize].clone(),
                    (left - 8, y0 + cell / 2),
                    TextStyle::from(("sans-serif", 13).into_font()).pos(Pos::new(HPos::Right, VPos::Center)),
                ))
                .map_err(draw_err)?;
            }

            for j in 0..n {
                let x0 = left + j * cell;
                let r = corr[[i as usize, j as usize]];
                root.draw(&Rectangle::new([(x0, y0), (x0 + cell, y0 + cell)], coolwarm(r).filled()))
                    .map_err(draw_err)?;
                if text {
                    let value = if r.is_nan() { "nan".to_string() } else { format!("{:.2}", r) };
                    root.draw(&Text::new(value, (x0 + cell / 2, y0 + cell / 2), centered(13)))
                        .map_err(draw_err)?;
                }
            }
        }

        if text {
            for j in 0..n {
                root.draw(&Text::new(
                    labels[j as usize].clone(),
                    (left + j * cell + cell / 2, top + n * cell + 14),
                    centered(12),
                ))
                .map_err(draw_err)?;
            }
        }

        root.present().map_err(draw_err)?;
        Ok(())
    }
}

/// Register a sans-serif chart font once per process and report whether
/// chart text can be drawn. The first configured path wins.
fn chart_font(preferred: Option<&Path>) -> bool {
    *CHART_FONT.get_or_init(|| {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));
        for path in candidates {
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
                debug!(path = %path.display(), "Chart font registered");
                return true;
            }
        }
        warn!("No usable font found, charts are rendered without text");
        false
    })
}

/// Column labels: target names when they match the arity, else `real_i`
fn output_names(n_outputs: usize, target_names: &[String]) -> Vec<String> {
    if target_names.len() == n_outputs {
        target_names.to_vec()
    } else {
        (1..=n_outputs).map(|i| format!("real_{}", i)).collect()
    }
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    if (hi - lo).abs() < 1e-12 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

/// Blue for -1, white for 0, red for +1, grey for undefined
fn coolwarm(r: f64) -> RGBColor {
    if r.is_nan() {
        return RGBColor(200, 200, 200);
    }
    let t = r.clamp(-1.0, 1.0);
    let fade = |c: u8| (255.0 - (255.0 - c as f64) * t.abs()) as u8;
    if t >= 0.0 {
        RGBColor(fade(180), fade(4), fade(38))
    } else {
        RGBColor(fade(59), fade(76), fade(192))
    }
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    if n < 2.0 {
        return f64::NAN;
    }
    let ma = a.sum() / n;
    let mb = b.sum() / n;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return f64::NAN;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Pearson correlation over the columns of `[y_true | y_pred]`
pub fn correlation_matrix(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<Array2<f64>> {
    let stacked = ndarray::concatenate(Axis(1), &[y_true.view(), y_pred.view()])?;
    let k = stacked.ncols();
    Ok(Array2::from_shape_fn((k, k), |(i, j)| {
        if i == j && stacked.column(i).iter().any(|v| *v != stacked[[0, i]]) {
            1.0
        } else {
            pearson(stacked.column(i), stacked.column(j))
        }
    }))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

fn render_html(context: &ReportContext<'_>) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<h1>Predictive Model Report</h1>");
    if !context.target_names.is_empty() {
        let targets: Vec<String> = context.target_names.iter().map(|t| escape_html(t)).collect();
        let _ = writeln!(body, "<p>Targets: {}</p>", targets.join(", "));
    }

    if let Some(eval) = context.evaluation {
        let _ = writeln!(body, "<h2>Metrics</h2>\n<table>\n<tr><th></th><th>R²</th><th>RMSE</th><th>MSE</th></tr>");
        let cv = &eval.cv;
        let _ = writeln!(
            body,
            "<tr><td>Cross-validation</td><td>{} ± {}</td><td>{} ± {}</td><td>{} ± {}</td></tr>",
            fmt_opt(cv.r2_mean),
            fmt_opt(cv.r2_std),
            fmt_opt(cv.rmse_mean),
            fmt_opt(cv.rmse_std),
            fmt_opt(cv.mse_mean),
            fmt_opt(cv.mse_std)
        );
        if let Some(v) = &eval.validation {
            let _ = writeln!(
                body,
                "<tr><td>Holdout</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                fmt_opt(v.r2),
                fmt_opt(v.rmse),
                fmt_opt(v.mse)
            );
        }
        let _ = writeln!(body, "</table>");
        if let Some(err) = &cv.error {
            let _ = writeln!(body, "<p class=\"warn\">Cross-validation unavailable: {}</p>", escape_html(err));
        }
    }

    if let Some(summary) = context.summary {
        let _ = writeln!(body, "<h2>Training run</h2>\n<ul>");
        let _ = writeln!(
            body,
            "<li>{} rows, {} features, {} outputs</li>",
            summary.n_samples, summary.n_features, summary.n_outputs
        );
        let _ = writeln!(
            body,
            "<li>Batch size {}, {} epochs, {} batches ({} skipped)</li>",
            summary.batch_size,
            summary.epochs,
            summary.batches.len(),
            summary.skipped
        );
        let _ = writeln!(body, "<li>Warm-start holdout R²: {}</li>", fmt_opt(summary.warm_start_score));
        let _ = writeln!(body, "<li>Best holdout R²: {}</li>", fmt_opt(summary.best_score));
        let _ = writeln!(body, "<li>Final model: {}</li>\n</ul>", escape_html(&summary.checkpoint.to_string()));

        let skipped: Vec<_> = summary.skipped_batches().collect();
        if !skipped.is_empty() {
            let _ = writeln!(body, "<h3>Skipped batches</h3>\n<table>\n<tr><th>Epoch</th><th>Rows</th><th>Reason</th></tr>");
            for b in skipped {
                let _ = writeln!(
                    body,
                    "<tr><td>{}</td><td>{}..{}</td><td>{}</td></tr>",
                    b.epoch,
                    b.start,
                    b.end,
                    escape_html(b.failure().unwrap_or(""))
                );
            }
            let _ = writeln!(body, "</table>");
        }
    }

    let _ = writeln!(body, "<h2>Actual vs. predicted</h2>\n<img src=\"{}\" alt=\"Actual vs. predicted\">", SCATTER_FILE);
    let _ = writeln!(body, "<h2>Residual distribution</h2>\n<img src=\"{}\" alt=\"Residual distribution\">", RESIDUALS_FILE);
    let _ = writeln!(
        body,
        "<h2>Correlation matrix (actual vs. predicted)</h2>\n<img src=\"{}\" alt=\"Correlation matrix\">",
        CORRELATION_FILE
    );

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Predictive Model Report</title>\n<style>\n\
         body {{ font-family: Arial, sans-serif; margin: 20px; line-height: 1.6; color: #333; }}\n\
         h1, h2, h3 {{ color: #2c3e50; }}\n\
         img {{ max-width: 100%; height: auto; margin: 20px 0; }}\n\
         table {{ border-collapse: collapse; }}\n\
         td, th {{ border: 1px solid #ccc; padding: 4px 10px; }}\n\
         .warn {{ color: #b03a2e; }}\n\
         </style>\n</head>\n<body>\n{}</body>\n</html>\n",
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{BoostingConfig, PipelineFactory};
    use ndarray::array;

    fn light_pipeline() -> Pipeline {
        PipelineFactory::new()
            .with_config(BoostingConfig {
                n_estimators: 5,
                ..Default::default()
            })
            .create()
    }

    fn holdout_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array2::from_shape_fn((40, 2), |(i, j)| i as f64 * (j as f64 + 0.5));
        (x, y)
    }

    #[test]
    fn test_correlation_matrix() {
        let y_true = array![[1.0], [2.0], [3.0]];
        let y_pred = array![[3.0], [2.0], [1.0]];
        let corr = correlation_matrix(&y_true, &y_pred).unwrap();
        assert_eq!(corr.dim(), (2, 2));
        assert!((corr[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((corr[[0, 1]] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_correlation_is_nan() {
        let y_true = array![[1.0], [1.0]];
        let y_pred = array![[0.0], [2.0]];
        let corr = correlation_matrix(&y_true, &y_pred).unwrap();
        assert!(corr[[0, 0]].is_nan());
    }

    #[test]
    fn test_output_names() {
        assert_eq!(output_names(2, &[]), vec!["real_1", "real_2"]);
        let names = vec!["sessions".to_string()];
        assert_eq!(output_names(1, &names), names);
    }

    #[test]
    fn test_strict_mode_rejects_unfitted() {
        let (x, y) = holdout_data();
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(ReportConfig::strict());
        let result = reporter.report(&light_pipeline(), Holdout::new(&x, &y), dir.path(), ReportContext::default());
        assert!(matches!(result, Err(ForecastError::ModelNotFitted)));
    }

    #[test]
    fn test_lenient_mode_refits_copy() {
        let (x, y) = holdout_data();
        let dir = tempfile::tempdir().unwrap();
        let model = light_pipeline();
        let path = Reporter::default()
            .report(&model, Holdout::new(&x, &y), dir.path(), ReportContext::default())
            .unwrap();

        assert!(path.exists());
        assert!(dir.path().join(SCATTER_FILE).exists());
        assert!(dir.path().join(RESIDUALS_FILE).exists());
        assert!(dir.path().join(CORRELATION_FILE).exists());
        assert!(!model.is_fitted());

        let png = fs::read(dir.path().join(SCATTER_FILE)).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("<img src=\"actual_vs_predicted.png\""));
        assert!(html.contains("<img src=\"residuals.png\""));
        assert!(html.contains("<img src=\"correlation_matrix.png\""));
    }
}
