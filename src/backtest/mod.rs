pub mod metrics;

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::ForecastError;
use crate::predictor::{build_predictor_model, Forecaster, PredictorSpecs};

pub use metrics::{percentage_error, ForecastMetrics};

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// Step between evaluated window ends; 0 behaves like 1.
    pub stride: usize,
    pub parallel: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowForecast {
    pub actual: f64,
    pub predicted: f64,
    pub ape: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    /// Index of the forecast target; the window is `series[end - size..end]`.
    pub end: usize,
    pub outcome: Result<WindowForecast, ForecastError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowScore {
    pub window_size: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean absolute percentage error over succeeded windows; NaN if none.
    pub mean_ape: f64,
    pub metrics: ForecastMetrics,
}

/// Window-end indices `size, size + stride, ...` strictly below `len`.
/// Empty when `size == 0` or the series has no point after the first window.
pub fn window_end_indices(len: usize, size: usize, stride: usize) -> Vec<usize> {
    if size == 0 || size >= len {
        return Vec::new();
    }
    (size..len).step_by(stride.max(1)).collect()
}

/// Fits a fresh model on `series[end - size..end]` and scores its forecast
/// of `series[end]`.
pub fn evaluate_window<M, F>(
    series: &[f64],
    end: usize,
    size: usize,
    make: &F,
) -> Result<WindowForecast, ForecastError>
where
    F: Fn() -> M,
    M: Forecaster,
{
    if size == 0 || end < size {
        return Err(ForecastError::WindowTooShort {
            required: size.max(1),
            actual: end.min(size),
        });
    }
    let actual = *series.get(end).ok_or(ForecastError::WindowTooShort {
        required: end + 1,
        actual: series.len(),
    })?;
    if !actual.is_finite() {
        return Err(ForecastError::NonFiniteInput(end));
    }
    let mut model = make();
    model.fit(&series[end - size..end])?;
    let predicted = model.predict()?;
    if !predicted.is_finite() {
        return Err(ForecastError::DegenerateForecast(predicted));
    }
    let ape = percentage_error(actual, predicted).ok_or(ForecastError::ZeroActual)?;
    Ok(WindowForecast {
        actual,
        predicted,
        ape,
    })
}

/// Averages the succeeded windows of one (model, window size) run. Results
/// are folded in slice order, so callers that keep window-end order get
/// bit-identical means regardless of how the windows were computed.
pub fn aggregate(window_size: usize, results: &[WindowResult]) -> WindowScore {
    let mut metrics = ForecastMetrics::with_capacity(results.len());
    let mut failed = 0;
    for r in results {
        match &r.outcome {
            Ok(f) => metrics.observe(f.actual, f.predicted),
            Err(e) => {
                failed += 1;
                tracing::debug!(end = r.end, window = window_size, error = %e, "window discarded");
            }
        }
    }
    WindowScore {
        window_size,
        attempted: results.len(),
        succeeded: metrics.sample_count() as usize,
        failed,
        mean_ape: metrics.mape().unwrap_or(f64::NAN),
        metrics,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedEvaluator {
    cfg: EvaluatorConfig,
}

impl WindowedEvaluator {
    pub fn new(cfg: EvaluatorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> EvaluatorConfig {
        self.cfg
    }

    /// Per-window outcomes in window-end order.
    pub fn run_windows<M, F>(&self, series: &[f64], size: usize, make: &F) -> Vec<WindowResult>
    where
        F: Fn() -> M + Sync,
        M: Forecaster,
    {
        let ends = window_end_indices(series.len(), size, self.cfg.stride);
        let run = |end: usize| WindowResult {
            end,
            outcome: evaluate_window(series, end, size, make),
        };
        if self.cfg.parallel {
            ends.par_iter().map(|&end| run(end)).collect()
        } else {
            ends.iter().map(|&end| run(end)).collect()
        }
    }

    pub fn evaluate<M, F>(&self, series: &[f64], size: usize, make: &F) -> WindowScore
    where
        F: Fn() -> M + Sync,
        M: Forecaster,
    {
        aggregate(size, &self.run_windows(series, size, make))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub symbol: String,
    pub window_sizes: Vec<usize>,
    pub stride: usize,
    /// Model id -> one score per entry of `window_sizes`.
    pub scores: BTreeMap<String, Vec<WindowScore>>,
}

impl SweepReport {
    pub fn model_ids(&self) -> Vec<&str> {
        self.scores.keys().map(String::as_str).collect()
    }

    pub fn mape_curve(&self, model_id: &str) -> Option<Vec<f64>> {
        self.scores
            .get(model_id)
            .map(|scores| scores.iter().map(|s| s.mean_ape).collect())
    }

    /// Window size with the lowest defined MAPE for a model.
    pub fn best_window(&self, model_id: &str) -> Option<(usize, f64)> {
        self.scores
            .get(model_id)?
            .iter()
            .filter(|s| s.mean_ape.is_finite())
            .min_by(|a, b| a.mean_ape.total_cmp(&b.mean_ape))
            .map(|s| (s.window_size, s.mean_ape))
    }
}

/// Scores every model spec at every window size.
pub fn run_sweep(
    symbol: &str,
    series: &[f64],
    window_sizes: &[usize],
    specs: &PredictorSpecs,
    evaluator: &WindowedEvaluator,
) -> SweepReport {
    let mut scores = BTreeMap::new();
    for (id, cfg) in specs {
        let make = || build_predictor_model(cfg);
        let mut curve = Vec::with_capacity(window_sizes.len());
        for &size in window_sizes {
            let score = evaluator.evaluate(series, size, &make);
            tracing::info!(
                model = %id,
                window = size,
                attempted = score.attempted,
                succeeded = score.succeeded,
                mape = score.mean_ape,
                "window size evaluated"
            );
            if score.attempted > 0 && score.succeeded == 0 {
                tracing::warn!(model = %id, window = size, "every window failed");
            }
            curve.push(score);
        }
        scores.insert(id.clone(), curve);
    }
    SweepReport {
        symbol: symbol.to_string(),
        window_sizes: window_sizes.to_vec(),
        stride: evaluator.config().stride.max(1),
        scores,
    }
}
