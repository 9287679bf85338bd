pub mod bayes_ar;
pub mod hmm;
pub mod kalman;
pub mod persistence;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

pub use bayes_ar::{ArCoefficients, BayesArModel, BayesArModelConfig};
pub use hmm::{GaussianHmmModel, GaussianHmmModelConfig};
pub use kalman::{KalmanLevelModel, KalmanLevelModelConfig};
pub use persistence::PersistenceModel;

/// Two-step forecasting contract: fit on a trailing window, then produce the
/// forecast for the step right after it.
pub trait Forecaster {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError>;

    fn predict(&self) -> Result<f64, ForecastError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    GaussianHmm,
    Kalman,
    BayesAr,
    Persistence,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictorConfig {
    pub kind: PredictorKind,
    pub n_states: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub min_var: f64,
    pub lags: usize,
    pub prior_sd_intercept: f64,
    pub prior_sd_coef: f64,
    pub sigma_prior_scale: f64,
}

pub type PredictorSpecs = Vec<(String, PredictorConfig)>;

/// Config-file overrides applied on top of [`default_predictor_specs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PredictorOverrides {
    #[serde(default)]
    pub hmm_states: Option<usize>,
    #[serde(default)]
    pub em_max_iter: Option<usize>,
    #[serde(default)]
    pub ar_lags: Option<usize>,
}

pub fn default_predictor_specs() -> PredictorSpecs {
    let hmm = GaussianHmmModelConfig::default();
    let kalman = KalmanLevelModelConfig::default();
    let ar = BayesArModelConfig::default();
    vec![
        (
            "hmm-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::GaussianHmm,
                n_states: hmm.n_states,
                max_iter: hmm.max_iter,
                tol: hmm.tol,
                min_var: hmm.min_var,
                lags: 0,
                prior_sd_intercept: 0.0,
                prior_sd_coef: 0.0,
                sigma_prior_scale: 0.0,
            },
        ),
        (
            "kalman-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::Kalman,
                n_states: 1,
                max_iter: kalman.max_iter,
                tol: kalman.tol,
                min_var: kalman.min_var,
                lags: 0,
                prior_sd_intercept: 0.0,
                prior_sd_coef: 0.0,
                sigma_prior_scale: 0.0,
            },
        ),
        (
            "bayes-ar1-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::BayesAr,
                n_states: 0,
                max_iter: ar.max_iter,
                tol: ar.tol,
                min_var: ar.min_sigma * ar.min_sigma,
                lags: ar.lags,
                prior_sd_intercept: ar.prior_sd_intercept,
                prior_sd_coef: ar.prior_sd_coef,
                sigma_prior_scale: ar.sigma_prior_scale,
            },
        ),
        (
            "persistence-v1".to_string(),
            PredictorConfig {
                kind: PredictorKind::Persistence,
                n_states: 0,
                max_iter: 0,
                tol: 0.0,
                min_var: 0.0,
                lags: 0,
                prior_sd_intercept: 0.0,
                prior_sd_coef: 0.0,
                sigma_prior_scale: 0.0,
            },
        ),
    ]
}

impl PredictorOverrides {
    pub fn apply(&self, specs: &mut PredictorSpecs) {
        for (_, cfg) in specs.iter_mut() {
            match cfg.kind {
                PredictorKind::GaussianHmm => {
                    if let Some(n) = self.hmm_states {
                        cfg.n_states = n.max(1);
                    }
                    if let Some(it) = self.em_max_iter {
                        cfg.max_iter = it;
                    }
                }
                PredictorKind::Kalman => {
                    if let Some(it) = self.em_max_iter {
                        cfg.max_iter = it;
                    }
                }
                PredictorKind::BayesAr => {
                    if let Some(p) = self.ar_lags {
                        cfg.lags = p.max(1);
                    }
                }
                PredictorKind::Persistence => {}
            }
        }
    }
}

/// Keeps only the requested ids, in the requested order. Unknown ids are
/// returned so the caller can reject them.
pub fn select_predictor_specs(
    specs: &PredictorSpecs,
    ids: &[String],
) -> Result<PredictorSpecs, Vec<String>> {
    let by_id: BTreeMap<&str, &PredictorConfig> =
        specs.iter().map(|(id, cfg)| (id.as_str(), cfg)).collect();
    let mut out = Vec::with_capacity(ids.len());
    let mut unknown = Vec::new();
    for id in ids {
        let key = id.trim().to_ascii_lowercase();
        match by_id.get(key.as_str()) {
            Some(cfg) => out.push((key, **cfg)),
            None => unknown.push(id.clone()),
        }
    }
    if unknown.is_empty() {
        Ok(out)
    } else {
        Err(unknown)
    }
}

pub fn build_predictor_model(cfg: &PredictorConfig) -> PredictorModel {
    match cfg.kind {
        PredictorKind::GaussianHmm => PredictorModel::GaussianHmm(GaussianHmmModel::new(
            GaussianHmmModelConfig {
                n_states: cfg.n_states.max(1),
                max_iter: cfg.max_iter,
                tol: cfg.tol,
                min_var: cfg.min_var,
            },
        )),
        PredictorKind::Kalman => {
            PredictorModel::Kalman(KalmanLevelModel::new(KalmanLevelModelConfig {
                max_iter: cfg.max_iter,
                tol: cfg.tol,
                min_var: cfg.min_var,
            }))
        }
        PredictorKind::BayesAr => PredictorModel::BayesAr(BayesArModel::new(BayesArModelConfig {
            lags: cfg.lags.max(1),
            prior_sd_intercept: cfg.prior_sd_intercept,
            prior_sd_coef: cfg.prior_sd_coef,
            sigma_prior_scale: cfg.sigma_prior_scale,
            min_sigma: cfg.min_var.max(0.0).sqrt(),
            max_iter: cfg.max_iter,
            tol: cfg.tol,
        })),
        PredictorKind::Persistence => PredictorModel::Persistence(PersistenceModel::default()),
    }
}

#[derive(Debug, Clone)]
pub enum PredictorModel {
    GaussianHmm(GaussianHmmModel),
    Kalman(KalmanLevelModel),
    BayesAr(BayesArModel),
    Persistence(PersistenceModel),
}

impl Forecaster for PredictorModel {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError> {
        match self {
            Self::GaussianHmm(m) => m.fit(window),
            Self::Kalman(m) => m.fit(window),
            Self::BayesAr(m) => m.fit(window),
            Self::Persistence(m) => m.fit(window),
        }
    }

    fn predict(&self) -> Result<f64, ForecastError> {
        match self {
            Self::GaussianHmm(m) => m.predict(),
            Self::Kalman(m) => m.predict(),
            Self::BayesAr(m) => m.predict(),
            Self::Persistence(m) => m.predict(),
        }
    }
}

/// Population variance; 0.0 for fewer than two points.
pub(crate) fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_touch_matching_kinds() {
        let mut specs = default_predictor_specs();
        PredictorOverrides {
            hmm_states: Some(2),
            em_max_iter: Some(7),
            ar_lags: Some(3),
        }
        .apply(&mut specs);
        for (_, cfg) in &specs {
            match cfg.kind {
                PredictorKind::GaussianHmm => {
                    assert_eq!(cfg.n_states, 2);
                    assert_eq!(cfg.max_iter, 7);
                }
                PredictorKind::Kalman => assert_eq!(cfg.max_iter, 7),
                PredictorKind::BayesAr => assert_eq!(cfg.lags, 3),
                PredictorKind::Persistence => assert_eq!(cfg.max_iter, 0),
            }
        }
    }

    #[test]
    fn select_reports_unknown_ids() {
        let specs = default_predictor_specs();
        let ids = vec!["KALMAN-v1".to_string(), "arima-v1".to_string()];
        assert_eq!(
            select_predictor_specs(&specs, &ids).unwrap_err(),
            vec!["arima-v1".to_string()]
        );
        let ok = select_predictor_specs(&specs, &["hmm-v1".to_string()]).unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].0, "hmm-v1");
    }

    #[test]
    fn variance_of_constant_is_zero() {
        assert_eq!(variance(&[3.0, 3.0, 3.0]), 0.0);
        assert!((variance(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
