use std::f64::consts::PI;

use crate::error::{check_window, ForecastError};

use super::{variance, Forecaster};

#[derive(Debug, Clone, Copy)]
pub struct KalmanLevelModelConfig {
    pub max_iter: usize,
    pub tol: f64,
    pub min_var: f64,
}

impl Default for KalmanLevelModelConfig {
    fn default() -> Self {
        Self {
            max_iter: 10,
            tol: 1e-4,
            min_var: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LevelParams {
    process_var: f64,
    measure_var: f64,
    init_mean: f64,
    init_var: f64,
}

#[derive(Debug, Clone, Default)]
struct FilterPass {
    pred_mean: Vec<f64>,
    pred_var: Vec<f64>,
    filt_mean: Vec<f64>,
    filt_var: Vec<f64>,
    log_likelihood: f64,
}

#[derive(Debug, Clone, Copy)]
struct FittedLevel {
    params: LevelParams,
    level: f64,
    level_var: f64,
    log_likelihood: f64,
    iterations: usize,
}

/// Local-level (random walk plus noise) Kalman filter. Noise variances and
/// the initial state are re-estimated by EM on every fit.
#[derive(Debug, Clone, Default)]
pub struct KalmanLevelModel {
    cfg: KalmanLevelModelConfig,
    fitted: Option<FittedLevel>,
}

impl KalmanLevelModel {
    pub fn new(cfg: KalmanLevelModelConfig) -> Self {
        Self { cfg, fitted: None }
    }

    pub fn process_var(&self) -> Option<f64> {
        self.fitted.map(|f| f.params.process_var)
    }

    pub fn measure_var(&self) -> Option<f64> {
        self.fitted.map(|f| f.params.measure_var)
    }

    /// Filtered level and its variance at the last observation.
    pub fn level(&self) -> Option<(f64, f64)> {
        self.fitted.map(|f| (f.level, f.level_var))
    }

    pub fn log_likelihood(&self) -> Option<f64> {
        self.fitted.map(|f| f.log_likelihood)
    }

    pub fn iterations(&self) -> Option<usize> {
        self.fitted.map(|f| f.iterations)
    }

    fn floor(&self, v: f64) -> f64 {
        if v.is_finite() {
            v.max(self.cfg.min_var.max(f64::MIN_POSITIVE))
        } else {
            self.cfg.min_var.max(f64::MIN_POSITIVE)
        }
    }

    fn initial_params(&self, window: &[f64]) -> LevelParams {
        let diffs: Vec<f64> = window.windows(2).map(|w| w[1] - w[0]).collect();
        let half = variance(&diffs) / 2.0;
        LevelParams {
            process_var: self.floor(half),
            measure_var: self.floor(half),
            init_mean: window[0],
            init_var: self.floor(variance(window)),
        }
    }

    fn filter(params: &LevelParams, window: &[f64]) -> Result<FilterPass, ForecastError> {
        let n = window.len();
        let mut pass = FilterPass {
            pred_mean: Vec::with_capacity(n),
            pred_var: Vec::with_capacity(n),
            filt_mean: Vec::with_capacity(n),
            filt_var: Vec::with_capacity(n),
            log_likelihood: 0.0,
        };
        for (t, y) in window.iter().enumerate() {
            let (xp, pp) = if t == 0 {
                (params.init_mean, params.init_var)
            } else {
                (
                    pass.filt_mean[t - 1],
                    pass.filt_var[t - 1] + params.process_var,
                )
            };
            let s = pp + params.measure_var;
            let gain = pp / s;
            let innov = y - xp;
            pass.pred_mean.push(xp);
            pass.pred_var.push(pp);
            pass.filt_mean.push(xp + gain * innov);
            pass.filt_var.push((1.0 - gain) * pp);
            pass.log_likelihood += -0.5 * ((2.0 * PI * s).ln() + innov * innov / s);
        }
        if !pass.log_likelihood.is_finite() {
            return Err(ForecastError::Numerical(
                "non-finite Kalman log-likelihood".to_string(),
            ));
        }
        Ok(pass)
    }

    /// RTS smoother followed by the closed-form M-step of the local-level model.
    fn em_update(&self, pass: &FilterPass, window: &[f64]) -> LevelParams {
        let n = window.len();
        let mut sm_mean = pass.filt_mean.clone();
        let mut sm_var = pass.filt_var.clone();
        let mut lag_cov = vec![0.0; n];
        for t in (0..n - 1).rev() {
            let j = if pass.pred_var[t + 1] > 0.0 {
                pass.filt_var[t] / pass.pred_var[t + 1]
            } else {
                0.0
            };
            sm_mean[t] = pass.filt_mean[t] + j * (sm_mean[t + 1] - pass.pred_mean[t + 1]);
            sm_var[t] = pass.filt_var[t] + j * j * (sm_var[t + 1] - pass.pred_var[t + 1]);
            lag_cov[t + 1] = j * sm_var[t + 1];
        }

        let measure_var = window
            .iter()
            .zip(sm_mean.iter().zip(&sm_var))
            .map(|(y, (m, v))| (y - m) * (y - m) + v)
            .sum::<f64>()
            / n as f64;
        let process_var = (1..n)
            .map(|t| {
                let d = sm_mean[t] - sm_mean[t - 1];
                d * d + sm_var[t] + sm_var[t - 1] - 2.0 * lag_cov[t]
            })
            .sum::<f64>()
            / (n - 1) as f64;

        LevelParams {
            process_var: self.floor(process_var),
            measure_var: self.floor(measure_var),
            init_mean: sm_mean[0],
            init_var: self.floor(sm_var[0]),
        }
    }
}

impl Forecaster for KalmanLevelModel {
    fn fit(&mut self, window: &[f64]) -> Result<(), ForecastError> {
        self.fitted = None;
        check_window(window, 2)?;

        let mut params = self.initial_params(window);
        let mut pass = Self::filter(&params, window)?;
        let mut iterations = 0;
        while iterations < self.cfg.max_iter {
            let next = self.em_update(&pass, window);
            let next_pass = Self::filter(&next, window)?;
            iterations += 1;
            let gain = next_pass.log_likelihood - pass.log_likelihood;
            params = next;
            pass = next_pass;
            if gain.abs() < self.cfg.tol {
                break;
            }
        }

        let last = window.len() - 1;
        self.fitted = Some(FittedLevel {
            params,
            level: pass.filt_mean[last],
            level_var: pass.filt_var[last],
            log_likelihood: pass.log_likelihood,
            iterations,
        });
        Ok(())
    }

    fn predict(&self) -> Result<f64, ForecastError> {
        let fitted = self.fitted.ok_or(ForecastError::NotFitted)?;
        if !fitted.level.is_finite() {
            return Err(ForecastError::DegenerateForecast(fitted.level));
        }
        Ok(fitted.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_noisy_level() {
        let window: Vec<f64> = (0..60)
            .map(|i| 50.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let mut m = KalmanLevelModel::default();
        m.fit(&window).unwrap();
        let forecast = m.predict().unwrap();
        assert!((forecast - 50.0).abs() < 0.6, "forecast {forecast}");
        assert!(m.measure_var().unwrap() > 0.0);
        assert!(m.process_var().unwrap() > 0.0);
    }

    #[test]
    fn follows_a_random_walk_closely() {
        let window: Vec<f64> = (0..50).map(|i| 100.0 + 2.0 * i as f64).collect();
        let mut m = KalmanLevelModel::default();
        m.fit(&window).unwrap();
        let (level, var) = m.level().unwrap();
        assert!((level - 198.0).abs() < 2.0, "level {level}");
        assert!(var >= 0.0);
    }

    #[test]
    fn single_point_is_too_short() {
        let mut m = KalmanLevelModel::default();
        assert!(matches!(
            m.fit(&[1.0]),
            Err(ForecastError::WindowTooShort { .. })
        ));
    }
}
